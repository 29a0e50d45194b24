//! In-memory `StoreAdapter`/`ChannelAdapter` test doubles, in the same
//! spirit as a mock database instance: enough behavior to exercise the
//! engine end-to-end without a real store or transport.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use sync_core::{ChangesetQuery, ChannelAdapter, ChannelError, ChannelEvent, NodeIdFilter, StoreAdapter, StoreError, TableChangeEvent, TimeFilter};
use sync_proto::{Changeset, Hlc, Record};

/// A single-node in-memory CRDT store. Each table is append-only and
/// deduplicated by `(node_id, modified)`, which is enough to make `merge`
/// idempotent the way a real CRDT store's primary key would.
pub struct MemoryStore {
	node_id: Uuid,
	tables: Mutex<BTreeMap<String, Vec<Record>>>,
	clock: Mutex<Hlc>,
	changes_tx: broadcast::Sender<TableChangeEvent>,
}

impl MemoryStore {
	pub fn new(node_id: Uuid) -> Arc<Self> {
		let (changes_tx, _) = broadcast::channel(64);
		Arc::new(Self {
			node_id,
			tables: Mutex::new(BTreeMap::new()),
			clock: Mutex::new(Hlc::zero(node_id)),
			changes_tx,
		})
	}

	/// Stands in for a local application write: mints a fresh HLC, stamps
	/// `node_id`/`modified`, stores the row, and fires the change stream,
	/// the same three steps `merge` performs for an incoming changeset.
	pub fn insert(&self, table: &str, mut record: Record) -> Hlc {
		let hlc = {
			let mut clock = self.clock.lock().unwrap();
			let now = clock.physical_millis() + 1;
			*clock = clock.next(self.node_id, now);
			*clock
		};
		record.set_modified(hlc);
		record.set_node_id(self.node_id);

		self.tables
			.lock()
			.unwrap()
			.entry(table.to_string())
			.or_default()
			.push(record);

		let mut tables = HashSet::new();
		tables.insert(table.to_string());
		let _ = self.changes_tx.send(TableChangeEvent { hlc, tables });

		hlc
	}

	pub fn rows(&self, table: &str) -> Vec<Record> {
		self.tables
			.lock()
			.unwrap()
			.get(table)
			.cloned()
			.unwrap_or_default()
	}
}

fn matches_node(record: &Record, filter: NodeIdFilter) -> bool {
	match (record.node_id(), filter) {
		(Some(id), NodeIdFilter::Only(n)) => id == n,
		(Some(id), NodeIdFilter::Except(n)) => id != n,
		(None, _) => false,
	}
}

fn matches_time(record: &Record, filter: TimeFilter) -> bool {
	match (record.modified(), filter) {
		(Some(m), TimeFilter::ModifiedOn(t)) => m == t,
		(Some(m), TimeFilter::ModifiedAfter(t)) => m > t,
		(None, _) => false,
	}
}

#[async_trait]
impl StoreAdapter for MemoryStore {
	fn node_id(&self) -> Uuid {
		self.node_id
	}

	async fn all_tables(&self) -> HashSet<String> {
		self.tables.lock().unwrap().keys().cloned().collect()
	}

	async fn last_modified(&self, filter: NodeIdFilter) -> Hlc {
		let tables = self.tables.lock().unwrap();
		tables
			.values()
			.flatten()
			.filter(|record| matches_node(record, filter))
			.filter_map(Record::modified)
			.max()
			.unwrap_or_else(|| Hlc::zero(self.node_id))
	}

	async fn canonical_time(&self) -> Hlc {
		*self.clock.lock().unwrap()
	}

	fn subscribe_tables_changed(&self) -> broadcast::Receiver<TableChangeEvent> {
		self.changes_tx.subscribe()
	}

	async fn get_changeset(&self, query: ChangesetQuery) -> Changeset {
		let tables = self.tables.lock().unwrap();
		let mut out = Changeset::new();

		for (table, rows) in tables.iter() {
			if let Some(only) = &query.only_tables {
				if !only.contains(table) {
					continue;
				}
			}

			let mut matched: Vec<Record> = rows
				.iter()
				.filter(|record| matches_node(record, query.node_filter))
				.filter(|record| matches_time(record, query.time_filter))
				.cloned()
				.collect();
			matched.sort_by_key(Record::modified);

			if !matched.is_empty() {
				out.insert(table.clone(), matched);
			}
		}

		out
	}

	async fn merge(&self, changeset: Changeset) -> Result<(), StoreError> {
		let mut events: BTreeMap<Hlc, HashSet<String>> = BTreeMap::new();

		{
			let mut tables = self.tables.lock().unwrap();
			for (table, rows) in changeset {
				let entry = tables.entry(table.clone()).or_default();
				for record in rows {
					let key = (record.node_id(), record.modified());
					let already_present = entry
						.iter()
						.any(|existing| (existing.node_id(), existing.modified()) == key);
					if already_present {
						continue;
					}
					if let Some(hlc) = record.modified() {
						events.entry(hlc).or_default().insert(table.clone());
					}
					entry.push(record);
				}
			}
		}

		if let Some((&max_hlc, _)) = events.iter().next_back() {
			let mut clock = self.clock.lock().unwrap();
			if max_hlc > *clock {
				*clock = max_hlc;
			}
		}

		for (hlc, tables) in events {
			let _ = self.changes_tx.send(TableChangeEvent { hlc, tables });
		}

		Ok(())
	}
}

/// An in-process duplex channel: sending on one end delivers to the other's
/// `recv`. Stands in for a WebSocket transport without any actual I/O.
pub struct LoopbackChannel {
	outbound: mpsc::UnboundedSender<String>,
	inbound: AsyncMutex<mpsc::UnboundedReceiver<String>>,
	closed: AtomicBool,
}

#[must_use]
pub fn loopback_pair() -> (Arc<LoopbackChannel>, Arc<LoopbackChannel>) {
	let (a_tx, b_rx) = mpsc::unbounded_channel();
	let (b_tx, a_rx) = mpsc::unbounded_channel();
	(
		Arc::new(LoopbackChannel {
			outbound: a_tx,
			inbound: AsyncMutex::new(a_rx),
			closed: AtomicBool::new(false),
		}),
		Arc::new(LoopbackChannel {
			outbound: b_tx,
			inbound: AsyncMutex::new(b_rx),
			closed: AtomicBool::new(false),
		}),
	)
}

#[async_trait]
impl ChannelAdapter for LoopbackChannel {
	async fn recv(&self) -> Option<ChannelEvent> {
		if self.closed.load(Ordering::SeqCst) {
			return Some(ChannelEvent::Closed {
				code: None,
				reason: None,
			});
		}

		let mut inbound = self.inbound.lock().await;
		match inbound.recv().await {
			Some(text) => Some(ChannelEvent::Message(text)),
			None => Some(ChannelEvent::Closed {
				code: None,
				reason: None,
			}),
		}
	}

	async fn send(&self, text: String) -> Result<(), ChannelError> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(ChannelError::Closed);
		}
		self.outbound
			.send(text)
			.map_err(|error| ChannelError::Send(error.to_string()))
	}

	async fn close(&self, _code: Option<u16>, _reason: Option<String>) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

/// Polls `check` until it returns `true` or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + timeout;
	while !check() {
		if tokio::time::Instant::now() >= deadline {
			panic!("condition not met within timeout");
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}
