//! Error types for the transport capability.

use printlink_protocol::Identity;

/// Errors produced by a transport or one of its connections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(Identity),

    #[error("identity already bound: {0}")]
    IdentityTaken(Identity),

    #[error("connection closed")]
    Closed,
}
