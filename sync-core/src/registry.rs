use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::channel::ChannelAdapter;
use crate::session::{Session, SessionConfig, SessionHooks};
use crate::store::StoreAdapter;

/// Default WebSocket ping interval: must be non-zero to evict stale peers,
/// since a stale peer otherwise keeps its change-stream subscription alive
/// indefinitely.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(20);

/// Configuration shared by every inbound `Session` the registry accepts.
#[derive(Clone)]
pub struct ServerRegistryConfig {
	pub session: SessionConfig,
	/// `None` disables keepalive pings; the transport layer is expected to
	/// read this and configure itself accordingly.
	pub keepalive: Option<Duration>,
}

impl Default for ServerRegistryConfig {
	fn default() -> Self {
		Self {
			session: SessionConfig::server(),
			keepalive: Some(DEFAULT_KEEPALIVE),
		}
	}
}

/// Tracks live `Session`s server-side: enumeration, lookup by peer id,
/// targeted and bulk disconnect. Mutated only on connect/disconnect,
/// guarded by an `RwLock`.
pub struct ServerRegistry {
	store: Arc<dyn StoreAdapter>,
	config: ServerRegistryConfig,
	sessions: Arc<RwLock<HashMap<Uuid, crate::session::SessionHandle>>>,
	/// One-shot completion signal per live session, fired from
	/// `on_disconnect` right before the session's `run()` returns.
	/// `disconnect`/`disconnect_all` await these so they only return once
	/// the session task has actually wound down, not merely once a close
	/// has been requested.
	terminations: Arc<RwLock<HashMap<Uuid, oneshot::Receiver<()>>>>,
}

impl ServerRegistry {
	#[must_use]
	pub fn new(store: Arc<dyn StoreAdapter>, config: ServerRegistryConfig) -> Self {
		Self {
			store,
			config,
			sessions: Arc::new(RwLock::new(HashMap::new())),
			terminations: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Accepts an already-upgraded channel and spawns a `Session` for it.
	/// Transport-level upgrade happens before this call; the registry only
	/// takes over once a message-oriented channel exists.
	///
	/// The caller's `on_connect`/`on_disconnect` hooks are composed with
	/// the registry's own bookkeeping rather than exposed a raw handle to
	/// the session map, so a caller can observe connects/disconnects
	/// without being able to corrupt registry state directly.
	pub fn accept(&self, channel: Arc<dyn ChannelAdapter>, mut hooks: SessionHooks) {
		let sessions_for_connect = self.sessions.clone();
		let sessions_for_disconnect = self.sessions.clone();
		let terminations_for_connect = self.terminations.clone();
		let user_on_connect = hooks.on_connect.take();
		let user_on_disconnect = hooks.on_disconnect.take();

		let (done_tx, done_rx) = oneshot::channel();
		let done_tx = Arc::new(std::sync::Mutex::new(Some(done_tx)));
		let done_rx = Arc::new(std::sync::Mutex::new(Some(done_rx)));

		hooks.on_connect = Some(Arc::new(move |handle, data| {
			let sessions = sessions_for_connect.clone();
			let terminations = terminations_for_connect.clone();
			let done_rx = done_rx.clone();
			let user_hook = user_on_connect.clone();
			Box::pin(async move {
				sessions.write().await.insert(handle.peer_id(), handle.clone());
				if let Some(done_rx) = done_rx.lock().unwrap().take() {
					terminations.write().await.insert(handle.peer_id(), done_rx);
				}
				if let Some(user_hook) = user_hook {
					user_hook(handle, data).await;
				}
			})
		}));

		hooks.on_disconnect = Some(Arc::new(move |peer_id, code, reason| {
			let sessions = sessions_for_disconnect.clone();
			let done_tx = done_tx.clone();
			let user_hook = user_on_disconnect.clone();
			Box::pin(async move {
				sessions.write().await.remove(&peer_id);
				if let Some(tx) = done_tx.lock().unwrap().take() {
					let _ = tx.send(());
				}
				if let Some(user_hook) = user_hook {
					user_hook(peer_id, code, reason).await;
				}
			})
		}));

		let session = Session::new(self.store.clone(), channel, self.config.session.clone(), hooks);
		tokio::spawn(session.run());
	}

	/// Current number of live sessions.
	pub async fn client_count(&self) -> usize {
		self.sessions.read().await.len()
	}

	/// The transport's configured ping interval, or `None` if disabled.
	#[must_use]
	pub fn keepalive(&self) -> Option<Duration> {
		self.config.keepalive
	}

	/// Closes the session whose peer id matches `node_id` and waits for its
	/// task to actually terminate before returning.
	pub async fn disconnect(&self, node_id: Uuid, code: Option<u16>, reason: Option<String>) {
		let handle = self.sessions.read().await.get(&node_id).cloned();
		if let Some(handle) = handle {
			handle.close(code, reason).await;
			let done = self.terminations.write().await.remove(&node_id);
			if let Some(done) = done {
				let _ = done.await;
			}
		}
	}

	/// Closes every live session and waits for all of their tasks to
	/// actually terminate before returning.
	pub async fn disconnect_all(&self, code: Option<u16>, reason: Option<String>) {
		let node_ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();
		for node_id in node_ids {
			self.disconnect(node_id, code, reason.clone()).await;
		}
	}
}
