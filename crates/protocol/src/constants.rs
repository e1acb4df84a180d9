use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size of one `CHUNK` payload slice (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Unsent bytes the transport may buffer before the sender pauses (512 KiB).
pub const BUFFERED_HIGH_WATER: usize = 512 * 1024;

/// How often the chunk loop re-reads the buffered-amount gauge while paused.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timeout for a connection attempt started by the user.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for the unattended reconnect to the last known admin.
pub const AUTO_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of every admin identity.
pub const ADMIN_ID_PREFIX: &str = "ADMIN-";

/// Length of generated short ids (file ids, identity suffixes).
pub const SHORT_ID_LEN: usize = 6;

/// Largest JSON header accepted in a frame (64 KiB).
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Message kind carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Sender -> receiver: a file is available for request.
    #[serde(rename = "META")]
    Meta,
    /// Sender -> receiver: one slice of a file's bytes.
    #[serde(rename = "CHUNK")]
    Chunk,
    /// Sender -> receiver: the last slice of a file has been sent.
    #[serde(rename = "END")]
    End,
    /// Receiver -> sender: please send this file's content.
    #[serde(rename = "REQUEST_DOWNLOAD")]
    RequestDownload,
    /// Sender -> receiver: the operator declined the request.
    #[serde(rename = "DENY_DOWNLOAD")]
    DenyDownload,

    /// Forward compatibility: unknown kinds deserialize here and are
    /// rejected by the decoder.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Meta => "META",
            MessageKind::Chunk => "CHUNK",
            MessageKind::End => "END",
            MessageKind::RequestDownload => "REQUEST_DOWNLOAD",
            MessageKind::DenyDownload => "DENY_DOWNLOAD",
            MessageKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
