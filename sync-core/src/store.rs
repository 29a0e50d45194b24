use std::collections::HashSet;

use async_trait::async_trait;
use sync_proto::{Changeset, Hlc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which side of a node-id filter to apply. Exactly one of these is ever in
/// force for a given `last_modified`/`get_changeset` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeIdFilter {
	/// Only records authored by this node.
	Only(Uuid),
	/// Every record *except* those authored by this node.
	Except(Uuid),
}

/// Exactly one of "on this exact HLC" (a live-change event) or "after this
/// HLC" (a catch-up boundary) is ever supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
	ModifiedOn(Hlc),
	ModifiedAfter(Hlc),
}

/// The full filter set for one `get_changeset` call.
#[derive(Debug, Clone)]
pub struct ChangesetQuery {
	pub only_tables: Option<HashSet<String>>,
	pub node_filter: NodeIdFilter,
	pub time_filter: TimeFilter,
}

/// Emitted on `StoreAdapter::subscribe_tables_changed` after each
/// successful local write.
#[derive(Debug, Clone)]
pub struct TableChangeEvent {
	pub hlc: Hlc,
	pub tables: HashSet<String>,
}

/// The backing store's failure mode is deliberately opaque; the engine
/// only needs to log it and keep the session alive.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreError(#[from] Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
	pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
		Self(Box::new(err))
	}
}

/// The narrow interface the engine needs from an HLC-CRDT store. Everything
/// about schema, merge semantics, and HLC arithmetic is the implementor's
/// concern; the engine only ever calls these seven methods.
#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
	/// Stable for the process lifetime.
	fn node_id(&self) -> Uuid;

	async fn all_tables(&self) -> HashSet<String>;

	/// Highest `modified` over records matching `filter`; `Hlc::zero` if
	/// none match.
	async fn last_modified(&self, filter: NodeIdFilter) -> Hlc;

	/// The store's current clock value, used to bound the initial
	/// catch-up window.
	async fn canonical_time(&self) -> Hlc;

	/// A fresh, independent subscription to the hot stream of
	/// `{hlc, tables}` events fired after each successful local write.
	/// Every `Session` gets its own subscription.
	fn subscribe_tables_changed(&self) -> broadcast::Receiver<TableChangeEvent>;

	/// Sorted by `modified` ascending within each table; empty tables
	/// omitted.
	async fn get_changeset(&self, query: ChangesetQuery) -> Changeset;

	/// Idempotent; safe to call with partial overlap. Advances clocks and
	/// fires `subscribe_tables_changed` events as a side effect.
	async fn merge(&self, changeset: Changeset) -> Result<(), StoreError>;
}
