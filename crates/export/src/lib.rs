//! Batch export: packs completed files into one zip archive.
//!
//! ```text
//! Ana_Maria_Files.zip
//! └── Ana_Maria_Files/
//!     ├── flyer.pdf
//!     └── poster.png
//! ```

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use zip::CompressionMethod;
use zip::write::{FileOptions, ZipWriter};

use printlink_transfer::safe_file_name;

/// Errors from building or writing an archive.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("no completed files selected")]
    NoEligibleFiles,

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One file to place in the archive.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

/// A finished archive held in memory.
#[derive(Debug, Clone)]
pub struct Archive {
    file_name: String,
    folder: String,
    entry_names: Vec<String>,
    bytes: Vec<u8>,
}

impl Archive {
    /// Suggested download name, `<folder>.zip`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Entry names inside the folder, in archive order.
    pub fn entry_names(&self) -> &[String] {
        &self.entry_names
    }

    pub fn entry_count(&self) -> usize {
        self.entry_names.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Writes the archive into `dir` under [`file_name`](Self::file_name).
    ///
    /// The data goes to a temporary name first so a failed write leaves no
    /// partial archive behind.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        let partial = dir.join(format!("{}.part", self.file_name));
        if let Err(e) = tokio::fs::write(&partial, &self.bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        tokio::fs::rename(&partial, &path).await?;
        info!(path = %path.display(), bytes = self.bytes.len(), "Archive written");
        Ok(path)
    }
}

/// Replaces every character outside `[A-Za-z0-9]` with `_`.
pub fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Folder name used inside the archive for a customer label.
pub fn folder_name(label: &str) -> String {
    format!("{}_Files", sanitize_label(label))
}

/// Builds an archive with one entry per file, nested in a folder named
/// after `label`.
///
/// Compression runs on the blocking pool. Fails with
/// [`ExportError::NoEligibleFiles`] when `entries` is empty.
pub async fn build_archive(label: &str, entries: Vec<ExportEntry>) -> Result<Archive, ExportError> {
    if entries.is_empty() {
        return Err(ExportError::NoEligibleFiles);
    }

    let folder = folder_name(label);
    let total: usize = entries.iter().map(|e| e.bytes.len()).sum();
    debug!(folder = %folder, files = entries.len(), bytes = total, "Building archive");

    let archive = tokio::task::spawn_blocking(move || write_zip(folder, &entries)).await??;
    info!(
        archive = %archive.file_name,
        entries = archive.entry_count(),
        bytes = archive.bytes.len(),
        "Archive built"
    );
    Ok(archive)
}

fn write_zip(folder: String, entries: &[ExportEntry]) -> Result<Archive, ExportError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.add_directory(format!("{folder}/"), options)?;

    let mut taken = HashSet::new();
    let mut entry_names = Vec::with_capacity(entries.len());
    for entry in entries {
        let base = safe_file_name(&entry.name).unwrap_or_else(|| "file".to_string());
        let name = unique_name(&base, &mut taken);
        writer.start_file(format!("{folder}/{name}"), options)?;
        writer.write_all(&entry.bytes)?;
        entry_names.push(name);
    }

    let bytes = writer.finish()?.into_inner();
    Ok(Archive {
        file_name: format!("{folder}.zip"),
        folder,
        entry_names,
        bytes,
    })
}

/// Returns `name`, or `name (n).ext` if it is already taken.
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u32;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
