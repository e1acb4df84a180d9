use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::progress::ProgressMeter;

/// Upper bound on the up-front buffer reservation (16 MiB).
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Accumulates the chunks of one inbound file.
#[derive(Clone)]
pub struct Reassembly {
    buffer: Vec<u8>,
    hasher: Sha256,
    meter: ProgressMeter,
}

impl Reassembly {
    /// Starts a reassembly for a file declared as `expected_size` bytes.
    pub fn new(expected_size: u64) -> Self {
        Self {
            buffer: Vec::with_capacity(expected_size.min(MAX_PREALLOC) as usize),
            hasher: Sha256::new(),
            meter: ProgressMeter::new(expected_size),
        }
    }

    /// Appends one chunk. Returns the new progress when it changed.
    pub fn push(&mut self, data: &[u8]) -> Option<u8> {
        self.buffer.extend_from_slice(data);
        self.hasher.update(data);
        self.meter.advance(data.len() as u64)
    }

    pub fn bytes_received(&self) -> u64 {
        self.meter.done()
    }

    pub fn percent(&self) -> u8 {
        self.meter.percent()
    }

    /// Materializes the assembled bytes, tagged with `mime_type`.
    pub fn finish(self, mime_type: impl Into<String>) -> Blob {
        let size_matches = self.meter.done() == self.meter.total();
        Blob {
            bytes: self.buffer.into(),
            mime_type: mime_type.into(),
            checksum: hex::encode(self.hasher.finalize()),
            size_matches,
        }
    }
}

impl std::fmt::Debug for Reassembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembly")
            .field("bytes_received", &self.meter.done())
            .field("expected", &self.meter.total())
            .finish()
    }
}

/// A completed file held in memory.
#[derive(Debug, Clone)]
pub struct Blob {
    bytes: Arc<[u8]>,
    mime_type: String,
    checksum: String,
    size_matches: bool,
}

impl Blob {
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Hex SHA-256 of the assembled bytes.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Whether the assembled length equals the declared size.
    pub fn size_matches(&self) -> bool {
        self.size_matches
    }
}
