//! Wire protocol for printlink peer-to-peer file transfers.
//!
//! A customer device (sender) announces files to an admin browser
//! (receiver), which asks for their content; approved files are streamed
//! in bounded chunks over one reliable, ordered connection.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use constants::MessageKind;
pub use envelope::{CodecError, decode, encode};
pub use messages::PeerMessage;
pub use types::{ConnectMetadata, FileId, FileMeta, Identity, format_bytes, generate_short_id};
