//! Sender (customer) side of a printlink transfer.
//!
//! The engine keeps an ordered queue of files, announces them to the admin
//! it is connected to, collects the admin's download requests in a FIFO
//! for the operator, and streams approved files in bounded chunks with
//! backpressure.

mod engine;
mod error;
mod types;

pub use engine::SenderEngine;
pub use error::{ConnectionError, SenderError};
pub use types::{
    ApprovalKind, ApprovalRequest, ConnectionStatus, QueuedFile, QueuedFileStatus, SenderConfig,
    SenderEvent,
};
