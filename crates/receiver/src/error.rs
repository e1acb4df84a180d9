use printlink_protocol::{FileId, Identity, MessageKind};

use crate::types::ReceivedFileStatus;

/// A message that does not fit the receiver's state. Logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("{kind} is not sent by customers")]
    WrongDirection { kind: MessageKind },

    #[error("{kind} for unannounced file {file_id}")]
    UnknownFile { kind: MessageKind, file_id: FileId },

    #[error("{kind} for file {file_id} in status {status:?}")]
    UnexpectedStatus {
        kind: MessageKind,
        file_id: FileId,
        status: ReceivedFileStatus,
    },

    #[error("chunk for {file_id} while {active} is still transferring")]
    ConcurrentTransfer { file_id: FileId, active: FileId },

    #[error("message from a replaced connection")]
    StaleConnection,

    #[error("message from unknown customer {0}")]
    UnknownCustomer(Identity),
}

/// Errors returned by receiver engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("unknown customer: {0}")]
    UnknownCustomer(Identity),

    #[error("customer {peer} has no file {file_id}")]
    UnknownFile { peer: Identity, file_id: FileId },

    #[error("file {file_id} cannot be requested while {status:?}")]
    NotRequestable {
        file_id: FileId,
        status: ReceivedFileStatus,
    },

    #[error("no print request for file {0}")]
    NoPrintRequest(FileId),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("send failed: {0}")]
    Transfer(#[from] printlink_transfer::TransferError),

    #[error("export failed: {0}")]
    Export(#[from] printlink_export::ExportError),

    #[error("print failed: {0}")]
    Print(#[from] crate::print::PrintError),

    #[error("print task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
