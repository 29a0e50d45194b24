pub mod channel;
pub mod error;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod sql;
pub mod store;

pub use channel::{ChannelAdapter, ChannelError, ChannelEvent};
pub use error::SessionError;
pub use reconnect::{ChannelOpener, ClientState, ConnectError, ReconnectController};
pub use registry::{ServerRegistry, ServerRegistryConfig};
pub use session::{HandshakeDataBuilder, Session, SessionConfig, SessionHandle, SessionHooks};
pub use sql::inject_sync_filters;
pub use store::{
	ChangesetQuery, NodeIdFilter, StoreAdapter, StoreError, TableChangeEvent, TimeFilter,
};
