//! Public types for the receiver engine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use printlink_protocol::{FileId, FileMeta, Identity};
use printlink_transfer::{Blob, Keyed};

/// Lifecycle of an inbound file.
///
/// `Pending -> Requested -> Transferring -> Complete`, or
/// `Pending | Requested -> Denied`. Only an explicit request moves a
/// file out of `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedFileStatus {
    Pending,
    Requested,
    Transferring,
    Complete,
    Denied,
}

impl ReceivedFileStatus {
    /// Whether a download may be requested from this status.
    pub fn is_requestable(self) -> bool {
        matches!(self, Self::Pending | Self::Denied)
    }
}

/// Snapshot of one file announced by a customer.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Locally generated id.
    pub id: Uuid,
    pub meta: FileMeta,
    pub status: ReceivedFileStatus,
    pub progress: u8,
    pub bytes_received: u64,
    /// Present once the file is complete.
    pub blob: Option<Blob>,
}

impl ReceivedFile {
    pub fn file_id(&self) -> &FileId {
        &self.meta.id
    }
}

/// Snapshot of one connected customer.
#[derive(Debug, Clone)]
pub struct CustomerSnapshot {
    pub peer: Identity,
    pub label: String,
    pub files: Vec<ReceivedFile>,
    pub last_active: DateTime<Utc>,
}

impl CustomerSnapshot {
    pub fn file(&self, file_id: &FileId) -> Option<&ReceivedFile> {
        self.files.iter().find(|f| f.file_id() == file_id)
    }
}

/// One file of one customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileTarget {
    pub peer: Identity,
    pub file_id: FileId,
}

/// A completed file waiting for the operator to print or discard it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintRequest {
    pub target: FileTarget,
    pub customer_label: String,
    pub file_name: String,
}

impl Keyed for PrintRequest {
    type Key = FileTarget;

    fn key(&self) -> &FileTarget {
        &self.target
    }
}

/// Events emitted by the receiver engine.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    /// A customer connected, or reconnected and replaced its old link.
    CustomerConnected(CustomerSnapshot),
    /// A customer's connection closed; its files are gone.
    CustomerRemoved { peer: Identity },
    /// A file was announced, advanced or completed.
    FileUpdated { peer: Identity, file: ReceivedFile },
    /// The print approval queue changed; carries the full queue.
    PrintQueueChanged(Vec<PrintRequest>),
    Printed(FileTarget),
    ExportCompleted {
        peer: Identity,
        archive_name: String,
        entries: usize,
        path: Option<PathBuf>,
    },
}

/// Receiver engine configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Queue a print approval for every file that completes.
    pub print_on_complete: bool,
    /// Directory batch exports are written to. `None` keeps them in memory.
    pub export_dir: Option<PathBuf>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            print_on_complete: true,
            export_dir: None,
        }
    }
}
