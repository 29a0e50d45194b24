//! Wire-level types for the peer-to-peer CRDT sync protocol: the HLC
//! timestamp, the opaque record/changeset shapes, the handshake frame, and
//! their JSON codec. No I/O lives here; see `sync-core` for the session
//! state machine that uses these types over an actual channel.

pub mod codec;
pub mod handshake;
pub mod hlc;
pub mod record;

pub use codec::{decode_changeset, decode_handshake, encode_changeset, encode_handshake, CodecError};
pub use handshake::Handshake;
pub use hlc::{Hlc, HlcParseError};
pub use record::{elide_empty_tables, is_empty_changeset, Changeset, Record, TableChangeset};
