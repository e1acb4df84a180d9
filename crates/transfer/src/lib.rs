//! Building blocks shared by the sender and receiver engines: file
//! sources, chunked streaming with backpressure, reassembly, progress
//! math and FIFO approval queues.

mod approval;
mod backpressure;
mod chunked;
mod progress;
mod reassembly;
mod source;
mod streamer;
mod validation;

use std::path::PathBuf;

pub use approval::{ApprovalQueue, Keyed};
pub use backpressure::wait_for_capacity;
pub use chunked::{ChunkReader, checksum_bytes};
pub use progress::{ProgressMeter, percent};
pub use reassembly::{Blob, Reassembly};
pub use source::{SourceFile, detect_mime_type, mime_for_name};
pub use streamer::{StreamOptions, StreamReport, stream_file};
pub use validation::safe_file_name;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("codec error: {0}")]
    Codec(#[from] printlink_protocol::CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] printlink_transport::TransportError),
}
