//! # Spool Directory Backend
//!
//! Writes each job as its own file in a directory. Useful for printers
//! served by a watcher process (CUPS hot folder, a print server share) and for
//! dry runs without hardware.
//!
//! Files are named `{YYYYMMDD_HHMMSS}_{seq}.{ext}` where `seq` counts jobs in
//! this process, so names sort in submission order.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;

use crate::dispatch::PrintBackend;
use crate::error::LabelfeedError;

#[derive(Debug)]
pub struct SpoolBackend {
    id: String,
    dir: PathBuf,
    extension: String,
    sequence: AtomicU64,
}

impl SpoolBackend {
    /// Spool into `dir` (created if missing) with the given file extension.
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Result<Self, LabelfeedError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            LabelfeedError::Transport(format!("Failed to create spool {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            id: format!("spool:{}", dir.display()),
            dir,
            extension: extension.trim_start_matches('.').to_string(),
            sequence: AtomicU64::new(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.dir
            .join(format!("{}_{:05}.{}", stamp, seq, self.extension))
    }
}

impl PrintBackend for SpoolBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn submit(&self, payload: &[u8]) -> Result<(), LabelfeedError> {
        let path = self.job_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                LabelfeedError::Transport(format!("Failed to spool {}: {}", path.display(), e))
            })?;
        file.write_all(payload)
            .and_then(|()| file.sync_data())
            .map_err(|e| LabelfeedError::Transport(format!("Write failed: {}", e)))?;
        tracing::debug!(path = %path.display(), "job spooled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_file_per_job_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolBackend::new(dir.path().join("pcb"), ".tspl").unwrap();
        spool.submit(b"first").unwrap();
        spool.submit(b"second").unwrap();

        let mut files: Vec<PathBuf> = fs::read_dir(spool.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();

        assert_eq!(files.len(), 2);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "first");
        assert_eq!(fs::read_to_string(&files[1]).unwrap(), "second");
        assert!(files[0].to_string_lossy().ends_with("_00001.tspl"));
    }

    #[test]
    fn test_unwritable_spool_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolBackend::new(dir.path().join("gone"), "zpl").unwrap();
        fs::remove_dir(spool.dir()).unwrap();
        assert!(matches!(
            spool.submit(b"x"),
            Err(LabelfeedError::Transport(_))
        ));
    }
}
