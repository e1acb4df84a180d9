use serde::{Deserialize, Serialize};

use crate::constants::MessageKind;
use crate::types::{FileId, FileMeta};

/// Payload of every message that only names a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileRef {
    pub file_id: FileId,
}

/// One message exchanged over a transport connection.
///
/// Messages for a given file arrive in causal order: `Meta` before any
/// `Chunk`, every `Chunk` before `End`. A connection streams the chunks of
/// at most one file at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Meta(FileMeta),
    Chunk { file_id: FileId, data: Vec<u8> },
    End { file_id: FileId },
    RequestDownload { file_id: FileId },
    DenyDownload { file_id: FileId },
}

impl PeerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PeerMessage::Meta(_) => MessageKind::Meta,
            PeerMessage::Chunk { .. } => MessageKind::Chunk,
            PeerMessage::End { .. } => MessageKind::End,
            PeerMessage::RequestDownload { .. } => MessageKind::RequestDownload,
            PeerMessage::DenyDownload { .. } => MessageKind::DenyDownload,
        }
    }

    /// The file this message is about.
    pub fn file_id(&self) -> &FileId {
        match self {
            PeerMessage::Meta(meta) => &meta.id,
            PeerMessage::Chunk { file_id, .. }
            | PeerMessage::End { file_id }
            | PeerMessage::RequestDownload { file_id }
            | PeerMessage::DenyDownload { file_id } => file_id,
        }
    }
}
