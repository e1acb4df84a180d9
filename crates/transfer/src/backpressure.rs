use std::time::Duration;

use tracing::trace;

use printlink_transport::{Connection, TransportError};

use crate::TransferError;

/// Waits until the connection can take `next_len` more bytes without its
/// buffered amount passing `high_water`.
///
/// An empty buffer always admits the next frame, so a frame larger than the
/// mark is still sent. Fails once the connection closes.
pub async fn wait_for_capacity<C: Connection + ?Sized>(
    conn: &C,
    next_len: usize,
    high_water: usize,
    poll_interval: Duration,
) -> Result<(), TransferError> {
    let mut paused = false;
    loop {
        if !conn.is_open() {
            return Err(TransportError::Closed.into());
        }

        let buffered = conn.buffered_amount();
        if buffered == 0 || buffered.saturating_add(next_len) <= high_water {
            if paused {
                trace!(buffered, "Transport buffer drained");
            }
            return Ok(());
        }

        if !paused {
            trace!(buffered, next_len, high_water, "Waiting for transport buffer to drain");
            paused = true;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
