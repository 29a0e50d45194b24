use thiserror::Error;

use sync_proto::CodecError;

use crate::channel::ChannelError;

/// The only class of failure a `Session` propagates out of `run()`: a
/// protocol violation during the handshake phase itself. Everything past
/// that point (merge failures, hook exceptions, validation rejections) is
/// logged and swallowed instead.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("channel closed before handshake completed")]
	ClosedDuringHandshake,

	#[error("malformed handshake frame: {0}")]
	MalformedHandshake(#[from] CodecError),

	#[error("channel error during handshake: {0}")]
	Channel(#[from] ChannelError),
}
