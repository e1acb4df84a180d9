//! Public types for the sender engine.

use std::time::Duration;

use printlink_protocol::constants::{AUTO_CONNECT_TIMEOUT, CONNECT_TIMEOUT};
use printlink_protocol::{FileId, FileMeta, Identity};
use printlink_transfer::{Keyed, StreamOptions};

/// Connection status of the sender engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not connected and not trying.
    Idle,
    /// The UI is reading a pairing code.
    Scanning,
    /// Interactive connection attempt in progress.
    Connecting,
    /// Unattended reconnect to the last known admin in progress.
    AutoConnecting,
    Connected,
}

/// Lifecycle of a queued file. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueuedFileStatus {
    Queued,
    MetaSent,
    /// The admin asked for the content; awaiting the operator.
    Requested,
    Transferring,
    Sent,
}

/// Snapshot of one queued file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFile {
    pub meta: FileMeta,
    pub status: QueuedFileStatus,
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalKind {
    Download,
}

/// A request from the admin waiting for the operator's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub file_id: FileId,
    pub file_name: String,
    pub kind: ApprovalKind,
}

impl Keyed for ApprovalRequest {
    type Key = FileId;

    fn key(&self) -> &FileId {
        &self.file_id
    }
}

/// Events emitted by the sender engine.
#[derive(Debug, Clone)]
pub enum SenderEvent {
    StatusChanged(ConnectionStatus),
    /// A queued file changed status or progress.
    FileUpdated(QueuedFile),
    /// The approval queue changed; carries the full queue, oldest first.
    ApprovalsChanged(Vec<ApprovalRequest>),
    /// A connection attempt failed. `auto` attempts should not prompt.
    ConnectFailed {
        target: Identity,
        auto: bool,
        message: String,
    },
    /// The admin side closed the connection.
    Disconnected { peer: Identity },
    /// Streaming stopped before `END` was sent.
    StreamFailed { file_id: FileId, message: String },
}

/// Sender engine configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub stream: StreamOptions,
    pub connect_timeout: Duration,
    pub auto_connect_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            stream: StreamOptions::default(),
            connect_timeout: CONNECT_TIMEOUT,
            auto_connect_timeout: AUTO_CONNECT_TIMEOUT,
        }
    }
}
