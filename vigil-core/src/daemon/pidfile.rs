//! Single-instance PID file
//!
//! The daemon writes its PID (pure ASCII integer) to a well-known file on
//! startup. A pre-existing file pointing at a live process that is not self
//! aborts startup; a stale file from a crashed run is overwritten. The file
//! is removed on clean exit, signal-driven or normal.

use crate::error::{Error, Result};
use crate::procs::scanner::is_pid_alive;
use std::path::{Path, PathBuf};

/// Held PID file; removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the PID file, enforcing the single-instance invariant.
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(existing) = read_pid(&path) {
            if existing != std::process::id() && is_pid_alive(existing) {
                return Err(Error::AlreadyRunning(existing));
            }
            tracing::info!(pid = existing, "replacing stale PID file");
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now (used by signal handlers before exiting).
    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read a PID from the file, if present and well-formed.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// The PID from the file, but only when that process is alive.
pub fn live_pid(path: &Path) -> Option<u32> {
    read_pid(path).filter(|pid| is_pid_alive(*pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_own_pid_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".exporter.pid");

        {
            let pidfile = PidFile::acquire(path.clone()).unwrap();
            assert_eq!(read_pid(pidfile.path()), Some(std::process::id()));
            assert_eq!(live_pid(&path), Some(std::process::id()));
        }
        assert!(!path.exists());
    }

    #[test]
    fn live_foreign_pid_blocks_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".exporter.pid");
        // PID 1 is init: alive and never us.
        std::fs::write(&path, "1").unwrap();

        match PidFile::acquire(path.clone()) {
            Err(Error::AlreadyRunning(1)) => {}
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        // The existing file is left untouched.
        assert_eq!(read_pid(&path), Some(1));
    }

    #[test]
    fn stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".exporter.pid");
        std::fs::write(&path, "999999999").unwrap();

        let pidfile = PidFile::acquire(path.clone()).unwrap();
        assert_eq!(read_pid(pidfile.path()), Some(std::process::id()));
    }

    #[test]
    fn garbage_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".exporter.pid");
        std::fs::write(&path, "not a pid").unwrap();

        assert!(PidFile::acquire(path).is_ok());
    }
}
