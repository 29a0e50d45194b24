use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use sync_proto::{
	decode_changeset, decode_handshake, elide_empty_tables, encode_changeset, encode_handshake,
	Changeset, Handshake, Record,
};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::channel::{ChannelAdapter, ChannelEvent};
use crate::error::SessionError;
use crate::store::{ChangesetQuery, NodeIdFilter, StoreAdapter, TableChangeEvent, TimeFilter};

/// Builds the `data` payload of the outgoing handshake. Exactly one variant
/// is ever supplied for a given `Session`, matching its role: the client
/// variant takes no arguments, the server variant may inspect the peer's
/// node id and `data` before replying.
#[derive(Clone)]
pub enum HandshakeDataBuilder {
	Client(Arc<dyn Fn() -> Option<Value> + Send + Sync>),
	Server(Arc<dyn Fn(Uuid, Option<Value>) -> Option<Value> + Send + Sync>),
}

type ValidateRecordHook =
	Arc<dyn Fn(String, Record) -> BoxFuture<'static, (Record, bool)> + Send + Sync>;
type MapIncomingHook = Arc<dyn Fn(&str, Record) -> Record + Send + Sync>;
type ConnectHook = Arc<dyn Fn(SessionHandle, Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;
type DisconnectHook =
	Arc<dyn Fn(Uuid, Option<u16>, Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;
type ChangesetCountsHook =
	Arc<dyn Fn(Uuid, BTreeMap<String, usize>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Application hooks a `Session` may be configured with. Every hook but
/// the handshake builder is optional; a hook's absence is
/// exactly equivalent to a no-op implementation (validate always passes,
/// map is the identity, notifications go nowhere).
#[derive(Clone)]
pub struct SessionHooks {
	pub handshake_data_builder: HandshakeDataBuilder,
	pub validate_record: Option<ValidateRecordHook>,
	pub map_incoming_changeset: Option<MapIncomingHook>,
	pub on_connect: Option<ConnectHook>,
	pub on_disconnect: Option<DisconnectHook>,
	pub on_changeset_received: Option<ChangesetCountsHook>,
	pub on_changeset_sent: Option<ChangesetCountsHook>,
}

impl SessionHooks {
	#[must_use]
	pub fn new(handshake_data_builder: HandshakeDataBuilder) -> Self {
		Self {
			handshake_data_builder,
			validate_record: None,
			map_incoming_changeset: None,
			on_connect: None,
			on_disconnect: None,
			on_changeset_received: None,
			on_changeset_sent: None,
		}
	}
}

/// Session-wide configuration independent of the hooks.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub is_client: bool,
	/// `None` means all tables the store knows about; `Some` restricts the
	/// session to a subset.
	pub allowed_tables: Option<HashSet<String>>,
	/// Gates the per-record tracing emitted while processing a changeset
	/// frame, on top of the always-on per-frame logging.
	pub verbose: bool,
}

impl SessionConfig {
	#[must_use]
	pub fn client() -> Self {
		Self {
			is_client: true,
			allowed_tables: None,
			verbose: false,
		}
	}

	#[must_use]
	pub fn server() -> Self {
		Self {
			is_client: false,
			allowed_tables: None,
			verbose: false,
		}
	}
}

/// A cheaply-cloneable reference to a live `Session`, usable from outside
/// its own run loop: the registry's targeted disconnect and the reconnect
/// controller's teardown path both need to close a `Session` they don't
/// own.
#[derive(Clone)]
pub struct SessionHandle {
	peer_id: Uuid,
	channel: Arc<dyn ChannelAdapter>,
}

impl SessionHandle {
	#[must_use]
	pub fn peer_id(&self) -> Uuid {
		self.peer_id
	}

	/// Idempotent: closing twice, or closing after the peer already
	/// disconnected, is a no-op left to the channel adapter.
	pub async fn close(&self, code: Option<u16>, reason: Option<String>) {
		self.channel.close(code, reason).await;
	}
}

/// One bidirectional synchronization conversation over one channel. Owns
/// the handshake, the initial catch-up, live forwarding, the
/// incoming-merge pipeline, and teardown.
pub struct Session {
	store: Arc<dyn StoreAdapter>,
	channel: Arc<dyn ChannelAdapter>,
	config: SessionConfig,
	hooks: SessionHooks,
	remote_node_id: Option<Uuid>,
}

impl Session {
	#[must_use]
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		channel: Arc<dyn ChannelAdapter>,
		config: SessionConfig,
		hooks: SessionHooks,
	) -> Self {
		Self {
			store,
			channel,
			config,
			hooks,
			remote_node_id: None,
		}
	}

	/// Runs the full session lifecycle to completion: handshake, catch-up,
	/// live forwarding and incoming merges, then teardown. Only returns an
	/// error for a protocol violation during the handshake itself;
	/// everything after that point is logged and swallowed.
	///
	/// A failure during the handshake returns before `on_connect` is ever
	/// fired, so callers that need to learn about handshake failure (a
	/// reconnect controller, say) must inspect this method's `Result`
	/// rather than rely on `on_disconnect`, which only fires once a
	/// session actually reached the connected state.
	pub async fn run(mut self) -> Result<(), SessionError> {
		let remote = self.perform_handshake().await?;
		self.remote_node_id = Some(remote.node_id);

		tracing::info!(peer = %remote.node_id, is_client = self.config.is_client, "handshake complete");

		// Subscribe before the catch-up snapshot: any write committing in
		// between would otherwise be lost.
		let mut change_rx = self.store.subscribe_tables_changed();
		if self.config.verbose {
			tracing::debug!(peer = %remote.node_id, "subscribed to local change stream before catch-up");
		}

		if let Some(hook) = self.hooks.on_connect.clone() {
			hook(self.handle(), remote.data.clone()).await;
		}

		self.send_catchup(&remote).await;

		let (code, reason) = self.event_loop(&mut change_rx).await;

		// Cancelling the subscription happens synchronously by dropping
		// the receiver here; any merge already in flight was `await`ed to
		// completion inside `handle_incoming_frame` before we ever reached
		// this point, so there is nothing left half-merged.
		drop(change_rx);

		if let Some(hook) = self.hooks.on_disconnect.clone() {
			hook(remote.node_id, code, reason).await;
		}

		Ok(())
	}

	fn handle(&self) -> SessionHandle {
		SessionHandle {
			peer_id: self.remote_node_id.expect("handshake has completed"),
			channel: self.channel.clone(),
		}
	}

	async fn perform_handshake(&self) -> Result<Handshake, SessionError> {
		let local_node = self.store.node_id();

		if self.config.is_client {
			// The peer already has everything we authored, so we advertise
			// the high-water mark of records *not* authored locally, which
			// is exactly the set the server is expected to produce.
			let last_modified = self
				.store
				.last_modified(NodeIdFilter::Except(local_node))
				.await;

			let data = match &self.hooks.handshake_data_builder {
				HandshakeDataBuilder::Client(build) => build(),
				HandshakeDataBuilder::Server(_) => {
					unreachable!("a client session must be configured with a client handshake builder")
				}
			};

			self.send_handshake(&Handshake::new(local_node, last_modified, data))
				.await?;

			self.await_incoming_handshake().await
		} else {
			let remote = self.await_incoming_handshake().await?;

			// The highest timestamp we hold that originated at this
			// specific client.
			let last_modified = self
				.store
				.last_modified(NodeIdFilter::Only(remote.node_id))
				.await;

			let data = match &self.hooks.handshake_data_builder {
				HandshakeDataBuilder::Server(build) => build(remote.node_id, remote.data.clone()),
				HandshakeDataBuilder::Client(_) => {
					unreachable!("a server session must be configured with a server handshake builder")
				}
			};

			self.send_handshake(&Handshake::new(local_node, last_modified, data))
				.await?;

			Ok(remote)
		}
	}

	async fn send_handshake(&self, handshake: &Handshake) -> Result<(), SessionError> {
		self.channel
			.send(encode_handshake(handshake))
			.await
			.map_err(SessionError::from)
	}

	async fn await_incoming_handshake(&self) -> Result<Handshake, SessionError> {
		loop {
			match self.channel.recv().await {
				Some(ChannelEvent::Message(text)) => return Ok(decode_handshake(&text)?),
				Some(ChannelEvent::Error(error)) => {
					tracing::warn!(%error, "channel error while awaiting handshake, continuing");
				}
				Some(ChannelEvent::Closed { .. }) | None => {
					return Err(SessionError::ClosedDuringHandshake)
				}
			}
		}
	}

	async fn send_catchup(&self, remote: &Handshake) {
		let local_node = self.store.node_id();
		let node_filter = if self.config.is_client {
			NodeIdFilter::Only(local_node)
		} else {
			NodeIdFilter::Except(remote.node_id)
		};

		let changeset = self
			.store
			.get_changeset(ChangesetQuery {
				only_tables: self.config.allowed_tables.clone(),
				node_filter,
				time_filter: TimeFilter::ModifiedAfter(remote.last_modified),
			})
			.await;

		self.send_changeset_if_nonempty(changeset).await;
	}

	async fn event_loop(
		&self,
		change_rx: &mut broadcast::Receiver<TableChangeEvent>,
	) -> (Option<u16>, Option<String>) {
		let mut store_gone = false;

		loop {
			tokio::select! {
				incoming = self.channel.recv() => {
					match incoming {
						Some(ChannelEvent::Message(text)) => self.handle_incoming_frame(text).await,
						Some(ChannelEvent::Error(error)) => {
							tracing::warn!(%error, "channel error, continuing");
						}
						Some(ChannelEvent::Closed { code, reason }) => return (code, reason),
						None => return (None, None),
					}
				}
				change = change_rx.recv(), if !store_gone => {
					match change {
						Ok(event) => self.handle_live_change(event).await,
						Err(broadcast::error::RecvError::Lagged(skipped)) => {
							tracing::warn!(skipped, "sync session lagged behind the change stream");
						}
						Err(broadcast::error::RecvError::Closed) => {
							store_gone = true;
						}
					}
				}
			}
		}
	}

	async fn handle_incoming_frame(&self, text: String) {
		let changeset = match decode_changeset(&text) {
			Ok(changeset) => changeset,
			Err(error) => {
				tracing::warn!(%error, "dropping malformed changeset frame, closing with protocol error");
				self.channel
					.close(Some(1002), Some("protocol error".to_string()))
					.await;
				return;
			}
		};

		let local_node = self.store.node_id();
		let mut filtered = Changeset::new();
		let mut counts = BTreeMap::new();

		for (table, rows) in changeset {
			let mut kept = Vec::with_capacity(rows.len());

			for mut record in rows {
				record.rewrite_modified_node_id(local_node);

				let record = if let Some(validate) = self.hooks.validate_record.clone() {
					let (record, is_valid) = validate(table.clone(), record).await;
					if !is_valid {
						if self.config.verbose {
							tracing::debug!(table = %table, "validator rejected incoming record");
						}
						continue;
					}
					record
				} else {
					record
				};

				let record = match self.hooks.map_incoming_changeset.as_ref() {
					Some(map) => map(&table, record),
					None => record,
				};

				kept.push(record);
			}

			if !kept.is_empty() {
				counts.insert(table.clone(), kept.len());
				filtered.insert(table, kept);
			}
		}

		if filtered.is_empty() {
			return;
		}

		let table_names: Vec<String> = counts.keys().cloned().collect();

		if let Some(hook) = self.hooks.on_changeset_received.clone() {
			hook(self.remote_node_id.expect("handshake has completed"), counts).await;
		}

		match self.store.merge(filtered).await {
			Ok(()) if self.config.verbose => {
				tracing::debug!(tables = ?table_names, "merged incoming changeset");
			}
			Ok(()) => {}
			Err(error) => tracing::error!(
				%error,
				"merge failed; relying on the peer's high-water mark to replay on reconnect"
			),
		}
	}

	async fn handle_live_change(&self, event: TableChangeEvent) {
		let only_tables = match &self.config.allowed_tables {
			Some(allowed) => {
				let intersected: HashSet<String> =
					event.tables.intersection(allowed).cloned().collect();
				if intersected.is_empty() {
					return;
				}
				Some(intersected)
			}
			None => Some(event.tables.clone()),
		};

		let local_node = self.store.node_id();
		let node_filter = if self.config.is_client {
			NodeIdFilter::Only(local_node)
		} else {
			NodeIdFilter::Except(self.remote_node_id.expect("handshake has completed"))
		};

		let changeset = self
			.store
			.get_changeset(ChangesetQuery {
				only_tables,
				node_filter,
				time_filter: TimeFilter::ModifiedOn(event.hlc),
			})
			.await;

		self.send_changeset_if_nonempty(changeset).await;
	}

	async fn send_changeset_if_nonempty(&self, changeset: Changeset) {
		let changeset = elide_empty_tables(changeset);
		if changeset.is_empty() {
			return;
		}

		let counts: BTreeMap<String, usize> =
			changeset.iter().map(|(table, rows)| (table.clone(), rows.len())).collect();

		if let Some(hook) = self.hooks.on_changeset_sent.clone() {
			hook(self.remote_node_id.expect("handshake has completed"), counts).await;
		}

		if let Err(error) = self.channel.send(encode_changeset(&changeset)).await {
			tracing::warn!(%error, "failed to send changeset frame");
		}
	}
}
