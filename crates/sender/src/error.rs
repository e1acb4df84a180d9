use std::time::Duration;

use printlink_protocol::Identity;

/// A connection attempt that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("admin {0} is unreachable")]
    Unreachable(Identity),

    #[error("no answer from {target} within {after:?}")]
    Timeout { target: Identity, after: Duration },
}

/// Errors returned by sender engine operations.
#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("not a valid admin id: {0:?}")]
    InvalidTarget(String),

    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// Another file is streaming or the engine is not idle.
    #[error("engine busy")]
    Busy,

    #[error("store error: {0}")]
    Store(#[from] printlink_store::StoreError),
}
