//! Print hand-off for approved files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use printlink_transfer::safe_file_name;

#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("printer rejected job: {0}")]
    Rejected(String),
}

/// One approved file on its way to the printer.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub customer_label: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Destination for approved print jobs. Called from the blocking pool.
pub trait PrintSink: Send + Sync + 'static {
    fn print(&self, job: &PrintJob) -> Result<(), PrintError>;
}

/// Writes each job as a file into a spool directory watched by the
/// print server.
#[derive(Debug, Clone)]
pub struct SpoolDirPrinter {
    dir: PathBuf,
}

impl SpoolDirPrinter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job: &PrintJob) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let label = printlink_export::sanitize_label(&job.customer_label);
        let name = safe_file_name(&job.file_name).unwrap_or_else(|| "file".to_string());
        self.dir.join(format!("{stamp}_{}_{label}_{name}", &unique[..8]))
    }
}

impl PrintSink for SpoolDirPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), PrintError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.job_path(job);
        // Never replace a job that is still waiting in the spool.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&job.bytes)?;
        info!(
            path = %path.display(),
            bytes = job.bytes.len(),
            mime = %job.mime_type,
            "Print job spooled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spool_writes_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let printer = SpoolDirPrinter::new(dir.path().join("spool"));
        let job = PrintJob {
            customer_label: "Ana María".into(),
            file_name: "../flyer.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: Arc::from(&b"%PDF"[..]),
        };

        printer.print(&job).unwrap();

        let entries: Vec<_> = std::fs::read_dir(printer.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_Ana_Mar_a_flyer.pdf"), "{name}");
        assert_eq!(std::fs::read(&entries[0]).unwrap(), b"%PDF");
    }

    #[test]
    fn identical_jobs_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let printer = SpoolDirPrinter::new(dir.path());
        let job = PrintJob {
            customer_label: "Ana".into(),
            file_name: "menu.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: Arc::from(&b"%PDF"[..]),
        };

        for _ in 0..5 {
            printer.print(&job).unwrap();
        }

        let count = std::fs::read_dir(printer.dir()).unwrap().count();
        assert_eq!(count, 5);
    }
}
