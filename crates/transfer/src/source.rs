use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use printlink_protocol::{FileId, FileMeta};

use crate::TransferError;

/// Bytes inspected for magic-number detection.
const SNIFF_LEN: usize = 8192;

/// Where a source file's bytes live.
#[derive(Debug, Clone)]
pub(crate) enum Content {
    Memory(Arc<[u8]>),
    Disk(PathBuf),
}

/// A file offered by the sender, with its announced metadata.
#[derive(Debug, Clone)]
pub struct SourceFile {
    meta: FileMeta,
    content: Content,
}

impl SourceFile {
    /// Wraps in-memory bytes. The mime type is detected from the content,
    /// falling back to `name`'s extension.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let bytes: Arc<[u8]> = bytes.into();
        let head = &bytes[..bytes.len().min(SNIFF_LEN)];
        Self {
            meta: FileMeta {
                id: FileId::generate(),
                mime_type: detect_mime_type(&name, head),
                size: bytes.len() as u64,
                name,
            },
            content: Content::Memory(bytes),
        }
    }

    /// References a file on disk. Its size is read now; its bytes are read
    /// while streaming.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());
        let head = read_head(path).await?;
        Ok(Self {
            meta: FileMeta {
                id: FileId::generate(),
                mime_type: detect_mime_type(&name, &head),
                size: metadata.len(),
                name,
            },
            content: Content::Disk(path.to_path_buf()),
        })
    }

    /// Replaces the generated id.
    pub fn with_id(mut self, id: FileId) -> Self {
        self.meta.id = id;
        self
    }

    /// Overrides the guessed mime type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.meta.mime_type = mime_type.into();
        self
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn id(&self) -> &FileId {
        &self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn size(&self) -> u64 {
        self.meta.size
    }

    pub(crate) fn content(&self) -> &Content {
        &self.content
    }
}

async fn read_head(path: &Path) -> Result<Vec<u8>, TransferError> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(head)
}

/// Detects a mime type from the leading bytes of a file using magic
/// numbers, falling back to the extension of `name`.
pub fn detect_mime_type(name: &str, head: &[u8]) -> String {
    match infer::get(head) {
        Some(kind) => kind.mime_type().to_string(),
        None => mime_for_name(name).to_string(),
    }
}

/// Guesses a mime type from a file name's extension.
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
