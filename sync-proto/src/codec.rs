use thiserror::Error;

use crate::{handshake::Handshake, record::Changeset};

/// JSON encode/decode for the two wire message kinds. The codec itself
/// carries no per-connection state; which frame kind is expected next is a
/// property of the `Session`'s phase, not of the codec.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("malformed JSON frame: {0}")]
	Json(#[from] serde_json::Error),
}

#[must_use]
pub fn encode_handshake(handshake: &Handshake) -> String {
	// `Handshake`'s `Serialize` impl always emits `data` (as `null` when
	// absent), so this can't fail.
	serde_json::to_string(handshake).expect("Handshake serialization is infallible")
}

pub fn decode_handshake(text: &str) -> Result<Handshake, CodecError> {
	Ok(serde_json::from_str(text)?)
}

#[must_use]
pub fn encode_changeset(changeset: &Changeset) -> String {
	serde_json::to_string(changeset).expect("Changeset serialization is infallible")
}

pub fn decode_changeset(text: &str) -> Result<Changeset, CodecError> {
	Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
	use uuid::Uuid;

	use super::*;
	use crate::{hlc::Hlc, record::Record};

	#[test]
	fn handshake_round_trips() {
		let hs = Handshake::new(Uuid::nil(), Hlc::zero(Uuid::nil()), None);
		let encoded = encode_handshake(&hs);
		let decoded = decode_handshake(&encoded).unwrap();
		assert_eq!(hs, decoded);
	}

	#[test]
	fn changeset_round_trips() {
		let mut record = Record::new();
		record.set_node_id(Uuid::nil());
		record.set_modified(Hlc::zero(Uuid::nil()));

		let mut changeset = Changeset::new();
		changeset.insert("t".into(), vec![record]);

		let encoded = encode_changeset(&changeset);
		let decoded = decode_changeset(&encoded).unwrap();
		assert_eq!(changeset, decoded);
	}

	#[test]
	fn malformed_frame_is_rejected() {
		assert!(decode_changeset("not json").is_err());
		assert!(decode_handshake("not json").is_err());
	}
}
