use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::hlc::Hlc;

pub const COLUMN_NODE_ID: &str = "node_id";
pub const COLUMN_MODIFIED: &str = "modified";

/// An opaque key-value row. `BTreeMap` rather than `HashMap` keeps
/// serialized output deterministically ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(pub BTreeMap<String, Value>);

impl Record {
	#[must_use]
	pub fn new() -> Self {
		Self(BTreeMap::new())
	}

	#[must_use]
	pub fn modified(&self) -> Option<Hlc> {
		self.0.get(COLUMN_MODIFIED)?.as_str()?.parse().ok()
	}

	pub fn set_modified(&mut self, hlc: Hlc) {
		self.0
			.insert(COLUMN_MODIFIED.to_string(), Value::String(hlc.to_string()));
	}

	#[must_use]
	pub fn node_id(&self) -> Option<Uuid> {
		Uuid::parse_str(self.0.get(COLUMN_NODE_ID)?.as_str()?).ok()
	}

	pub fn set_node_id(&mut self, node_id: Uuid) {
		self.0.insert(
			COLUMN_NODE_ID.to_string(),
			Value::String(node_id.to_string()),
		);
	}

	pub fn rewrite_modified_node_id(&mut self, local: Uuid) {
		if let Some(hlc) = self.modified() {
			self.set_modified(hlc.with_node_id(local));
		}
	}
}

pub type TableChangeset = Vec<Record>;

/// `table name -> table changeset`. Empty tables are elided before
/// transmission, see [`elide_empty_tables`].
pub type Changeset = BTreeMap<String, TableChangeset>;

/// Drops tables whose changeset is empty; empty tables never appear in a
/// transmitted changeset.
#[must_use]
pub fn elide_empty_tables(mut changeset: Changeset) -> Changeset {
	changeset.retain(|_, rows| !rows.is_empty());
	changeset
}

#[must_use]
pub fn is_empty_changeset(changeset: &Changeset) -> bool {
	changeset.values().all(Vec::is_empty)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn uuid(n: u8) -> Uuid {
		Uuid::from_bytes([n; 16])
	}

	#[test]
	fn rewrite_preserves_time_changes_node() {
		let mut record = Record::new();
		record.set_modified(Hlc::new(10, 2, uuid(1)));
		record.rewrite_modified_node_id(uuid(9));

		let hlc = record.modified().unwrap();
		assert_eq!(hlc.physical_millis(), 10);
		assert_eq!(hlc.counter(), 2);
		assert_eq!(hlc.node_id(), uuid(9));
	}

	#[test]
	fn elide_drops_empty_tables_only() {
		let mut changeset = Changeset::new();
		changeset.insert("empty".into(), vec![]);
		changeset.insert("full".into(), vec![Record::new()]);

		let elided = elide_empty_tables(changeset);
		assert_eq!(elided.len(), 1);
		assert!(elided.contains_key("full"));
	}

	#[test]
	fn rewrite_is_noop_without_modified() {
		let mut record = Record::new();
		record.rewrite_modified_node_id(uuid(9));
		assert!(record.modified().is_none());
	}
}
