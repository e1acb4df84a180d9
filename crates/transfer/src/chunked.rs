use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use printlink_protocol::constants::CHUNK_SIZE;

use crate::TransferError;
use crate::source::{Content, SourceFile};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

enum Reader {
    Memory(Arc<[u8]>),
    Disk(tokio::fs::File),
}

/// Reads a source file in fixed-size slices, hashing as it goes.
pub struct ChunkReader {
    reader: Reader,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
    hasher: Sha256,
}

impl ChunkReader {
    /// Opens `file` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`CHUNK_SIZE`] (64 KiB) is used.
    pub async fn open(file: &SourceFile, chunk_size: usize) -> Result<Self, TransferError> {
        let reader = match file.content() {
            Content::Memory(bytes) => Reader::Memory(bytes.clone()),
            Content::Disk(path) => Reader::Disk(tokio::fs::File::open(path).await?),
        };
        let chunk_size = if chunk_size == 0 { CHUNK_SIZE } else { chunk_size };
        Ok(Self {
            reader,
            chunk_size,
            offset: 0,
            file_size: file.size(),
            hasher: Sha256::new(),
        })
    }

    /// Reads the next slice. Returns `None` once `file_size` bytes have been
    /// read or the underlying file ends early.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }
        let read_size = remaining.min(self.chunk_size as u64);

        let buf = match &mut self.reader {
            Reader::Memory(bytes) => {
                let start = self.offset as usize;
                let end = (start + read_size as usize).min(bytes.len());
                bytes.get(start..end).unwrap_or_default().to_vec()
            }
            Reader::Disk(file) => {
                let mut buf = Vec::with_capacity(read_size as usize);
                file.take(read_size).read_to_end(&mut buf).await?;
                buf
            }
        };
        if buf.is_empty() {
            return Ok(None);
        }

        self.hasher.update(&buf);
        self.offset += buf.len() as u64;
        Ok(Some(buf))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Declared file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }

    /// Hex SHA-256 of every byte read so far.
    pub fn checksum(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}
