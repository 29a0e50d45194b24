use async_trait::async_trait;
use thiserror::Error;

/// One event surfaced by a channel's incoming stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
	Message(String),
	Error(String),
	Closed {
		code: Option<u16>,
		reason: Option<String>,
	},
}

#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("channel is already closed")]
	Closed,
	#[error("send failed: {0}")]
	Send(String),
}

/// A message-oriented duplex channel over an arbitrary transport. Typically
/// a WebSocket, but the engine never assumes so.
///
/// Methods take `&self`: implementations hold their read/write halves
/// behind interior mutability, which lets a `Session` share one
/// `Arc<dyn ChannelAdapter>` with the `SessionHandle` its registry/reconnect
/// controller holds for out-of-band `close()`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync + 'static {
	/// Returns `None` once the stream is exhausted after a `Closed` event.
	async fn recv(&self) -> Option<ChannelEvent>;

	async fn send(&self, text: String) -> Result<(), ChannelError>;

	/// Idempotent: closing an already-closed channel is a no-op.
	async fn close(&self, code: Option<u16>, reason: Option<String>);
}
