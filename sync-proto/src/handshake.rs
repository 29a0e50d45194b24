use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::hlc::Hlc;

/// The first frame exchanged in each direction on a session.
///
/// `last_modified` is the sender's high-water mark of records originating
/// from the receiver, not from itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
	pub node_id: Uuid,
	pub last_modified: Hlc,
	pub data: Option<Value>,
}

impl Handshake {
	#[must_use]
	pub fn new(node_id: Uuid, last_modified: Hlc, data: Option<Value>) -> Self {
		Self {
			node_id,
			last_modified,
			data,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_null_data_explicitly() {
		let hs = Handshake::new(Uuid::nil(), Hlc::zero(Uuid::nil()), None);
		let json = serde_json::to_value(&hs).unwrap();
		assert_eq!(json["data"], Value::Null);
	}
}
