use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::channel::ChannelAdapter;
use crate::session::{Session, SessionConfig, SessionHandle, SessionHooks};
use crate::store::StoreAdapter;

/// Minimum and maximum reconnect backoff: schedule is 2, 4, 8, 10, 10, …
/// seconds, doubling from the minimum and capped at the maximum.
pub const MIN_BACKOFF: Duration = Duration::from_secs(2);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Opens a fresh channel to the server. Supplied by the embedding
/// application; dialing a `ws://`/`wss://` URI is a transport concern
/// outside this crate.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
	async fn connect(&self) -> Result<Arc<dyn ChannelAdapter>, ConnectError>;
}

#[derive(Debug, Error)]
#[error("failed to open channel: {0}")]
pub struct ConnectError(pub String);

/// The client connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	Disconnected,
	Connecting,
	Connected,
}

struct Inner {
	/// `true` unless the caller explicitly disconnected; distinguishes an
	/// intentional disconnect from a transport drop.
	online_mode: bool,
	backoff: Duration,
	session: Option<SessionHandle>,
	retry_timer: Option<JoinHandle<()>>,
}

/// Owns a single `Session` at a time and drives the client reconnect
/// lifecycle with exponential backoff. Exposed as both a polled getter
/// (`state`) and a broadcast stream (`subscribe`).
pub struct ReconnectController {
	store: Arc<dyn StoreAdapter>,
	opener: Arc<dyn ChannelOpener>,
	session_config: SessionConfig,
	user_hooks: SessionHooks,
	state_tx: watch::Sender<ClientState>,
	inner: Mutex<Inner>,
}

impl ReconnectController {
	#[must_use]
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		opener: Arc<dyn ChannelOpener>,
		session_config: SessionConfig,
		user_hooks: SessionHooks,
	) -> Arc<Self> {
		let (state_tx, _) = watch::channel(ClientState::Disconnected);
		Arc::new(Self {
			store,
			opener,
			session_config,
			user_hooks,
			state_tx,
			inner: Mutex::new(Inner {
				online_mode: false,
				backoff: MIN_BACKOFF,
				session: None,
				retry_timer: None,
			}),
		})
	}

	#[must_use]
	pub fn state(&self) -> ClientState {
		*self.state_tx.borrow()
	}

	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<ClientState> {
		self.state_tx.subscribe()
	}

	/// No-op unless the current state is `Disconnected`.
	pub async fn connect(self: &Arc<Self>) {
		let mut inner = self.inner.lock().await;
		if self.state() != ClientState::Disconnected {
			return;
		}

		inner.online_mode = true;
		drop(inner);

		self.state_tx.send_replace(ClientState::Connecting);
		self.attempt_connect().await;
	}

	async fn attempt_connect(self: &Arc<Self>) {
		match self.opener.connect().await {
			Ok(channel) => {
				let hooks = self.build_hooks();
				let session = Session::new(
					self.store.clone(),
					channel,
					self.session_config.clone(),
					hooks,
				);

				// State moves to `Connected` once the handshake completes,
				// via the `on_connect` hook wired in `build_hooks`. But a
				// handshake failure returns an `Err` from `run()` without
				// ever firing `on_connect`/`on_disconnect`, so that path is
				// driven off `run()`'s own result instead, or the
				// controller would stay stuck in `Connecting` forever.
				let controller = self.clone();
				tokio::spawn(async move {
					if let Err(error) = session.run().await {
						tracing::warn!(%error, "session ended before handshake completed, scheduling reconnect");
						controller.on_handshake_failed().await;
					}
				});
			}
			Err(error) => {
				tracing::warn!(%error, "failed to open channel, scheduling reconnect");
				self.schedule_retry_if_online().await;
			}
		}
	}

	/// Wraps the user-supplied hooks with the controller's own
	/// connect/disconnect bookkeeping, the same composition pattern the
	/// registry uses for its session map.
	fn build_hooks(self: &Arc<Self>) -> SessionHooks {
		let mut hooks = self.user_hooks.clone();
		let user_on_connect = hooks.on_connect.take();
		let user_on_disconnect = hooks.on_disconnect.take();

		let controller = self.clone();
		hooks.on_connect = Some(Arc::new(move |handle, data| {
			let controller = controller.clone();
			let user_hook = user_on_connect.clone();
			Box::pin(async move {
				controller.on_session_connected(handle.clone()).await;
				if let Some(user_hook) = user_hook {
					user_hook(handle, data).await;
				}
			})
		}));

		let controller = self.clone();
		hooks.on_disconnect = Some(Arc::new(move |peer, code, reason| {
			let controller = controller.clone();
			let user_hook = user_on_disconnect.clone();
			Box::pin(async move {
				controller.on_session_disconnected().await;
				if let Some(user_hook) = user_hook {
					user_hook(peer, code, reason).await;
				}
			})
		}));

		hooks
	}

	async fn on_session_connected(self: &Arc<Self>, handle: SessionHandle) {
		let mut inner = self.inner.lock().await;
		inner.backoff = MIN_BACKOFF;
		inner.session = Some(handle);
		if let Some(timer) = inner.retry_timer.take() {
			timer.abort();
		}
		drop(inner);

		self.state_tx.send_replace(ClientState::Connected);
	}

	async fn on_session_disconnected(self: &Arc<Self>) {
		{
			let mut inner = self.inner.lock().await;
			inner.session = None;
		}

		self.state_tx.send_replace(ClientState::Disconnected);
		self.schedule_retry_if_online().await;
	}

	/// Handles a session task that ended before the handshake completed.
	/// `inner.session` is already `None` on this path since `on_connect`
	/// never ran to populate it, so this only needs to flip the state and
	/// schedule the next retry.
	async fn on_handshake_failed(self: &Arc<Self>) {
		self.state_tx.send_replace(ClientState::Disconnected);
		self.schedule_retry_if_online().await;
	}

	async fn schedule_retry_if_online(self: &Arc<Self>) {
		let mut inner = self.inner.lock().await;
		if !inner.online_mode {
			return;
		}

		let delay = inner.backoff;
		inner.backoff = (inner.backoff * 2).min(MAX_BACKOFF);

		let controller = self.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			controller.state_tx.send_replace(ClientState::Connecting);
			controller.attempt_connect().await;
		});
		inner.retry_timer = Some(timer);
	}

	/// Clears `online_mode`, cancels any pending retry timer, resets
	/// backoff, and closes the current session if any. Terminal: a
	/// further `connect()` call starts the lifecycle over.
	pub async fn disconnect(&self, code: Option<u16>, reason: Option<String>) {
		let mut inner = self.inner.lock().await;
		inner.online_mode = false;
		inner.backoff = MIN_BACKOFF;
		if let Some(timer) = inner.retry_timer.take() {
			timer.abort();
		}
		let session = inner.session.take();
		drop(inner);

		self.state_tx.send_replace(ClientState::Disconnected);

		if let Some(session) = session {
			session.close(code, reason).await;
		}
	}
}
