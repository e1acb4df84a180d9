//! The chunked streaming algorithm.
//!
//! One file at a time: read a slice, wait for the transport buffer to have
//! room, send it as `CHUNK`, repeat, then send `END`.

use std::time::Duration;

use tracing::debug;

use printlink_protocol::constants::{BUFFERED_HIGH_WATER, CHUNK_SIZE, DRAIN_POLL_INTERVAL};
use printlink_protocol::{PeerMessage, encode};
use printlink_transport::Connection;

use crate::backpressure::wait_for_capacity;
use crate::chunked::ChunkReader;
use crate::progress::ProgressMeter;
use crate::source::SourceFile;
use crate::TransferError;

/// Tuning for [`stream_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub poll_interval: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water_mark: BUFFERED_HIGH_WATER,
            poll_interval: DRAIN_POLL_INTERVAL,
        }
    }
}

/// Outcome of a completed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    pub bytes_sent: u64,
    pub chunks: usize,
    /// Hex SHA-256 of the bytes sent.
    pub checksum: String,
    /// Largest buffered amount seen right after a send.
    pub peak_buffered: usize,
}

/// Streams `file` over `conn` as `CHUNK*` followed by `END`.
///
/// `on_progress` is called each time the rounded percentage grows, ending
/// with exactly one call carrying 100.
pub async fn stream_file<C, F>(
    conn: &C,
    file: &SourceFile,
    options: &StreamOptions,
    mut on_progress: F,
) -> Result<StreamReport, TransferError>
where
    C: Connection + ?Sized,
    F: FnMut(u8),
{
    let mut reader = ChunkReader::open(file, options.chunk_size).await?;
    let mut meter = ProgressMeter::new(file.size());
    let mut chunks = 0usize;
    let mut peak_buffered = 0usize;

    while let Some(data) = reader.next_chunk().await? {
        let len = data.len() as u64;
        let frame = encode(&PeerMessage::Chunk {
            file_id: file.id().clone(),
            data,
        })?;

        wait_for_capacity(
            conn,
            frame.len(),
            options.high_water_mark,
            options.poll_interval,
        )
        .await?;
        conn.send(frame)?;
        peak_buffered = peak_buffered.max(conn.buffered_amount());
        chunks += 1;

        if let Some(p) = meter.advance(len).filter(|p| *p < 100) {
            on_progress(p);
        }
    }

    conn.send(encode(&PeerMessage::End {
        file_id: file.id().clone(),
    })?)?;
    meter.finish();
    on_progress(meter.percent());

    let report = StreamReport {
        bytes_sent: reader.offset(),
        chunks,
        checksum: reader.checksum(),
        peak_buffered,
    };
    debug!(
        file_id = %file.id(),
        bytes = report.bytes_sent,
        chunks = report.chunks,
        peak_buffered = report.peak_buffered,
        "File streamed"
    );
    Ok(report)
}
