//! Keep-alive lock held by the background context while it monitors.
//!
//! The lock is a marker file in the data directory carrying the owner's pid
//! and start time. It is removed when the guard drops, so a file found at
//! startup means the previous owner never shut down.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::HostError;
use crate::types::current_time_ms;

const LOCK_FILE: &str = "monitoring.lock";

pub struct KeepAliveLock {
    path: PathBuf,
    stale_owner: Option<String>,
}

impl KeepAliveLock {
    pub fn acquire(data_dir: &Path) -> Result<Self, HostError> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE);

        let stale_owner = fs::read_to_string(&path).ok().map(|s| s.trim().to_string());
        if let Some(owner) = &stale_owner {
            warn!("Taking over stale keep-alive lock ({})", owner);
        }

        fs::write(&path, format!("pid={} since={}", std::process::id(), current_time_ms()))?;
        info!("🔒 Keep-alive lock held at {}", path.display());
        Ok(Self { path, stale_owner })
    }

    /// Contents of a lock left behind by an owner that never released it
    pub fn stale_owner(&self) -> Option<&str> {
        self.stale_owner.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeepAliveLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("🔓 Keep-alive lock released"),
            Err(e) => debug!("Keep-alive lock already gone: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_released_on_drop() {
        let dir = tempdir().unwrap();
        let lock = KeepAliveLock::acquire(dir.path()).unwrap();
        let path = lock.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(lock.stale_owner(), None);
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_released_on_unwind() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let result = std::panic::catch_unwind(|| {
            let _lock = KeepAliveLock::acquire(&data_dir).unwrap();
            panic!("pipeline blew up");
        });
        assert!(result.is_err());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_leftover_lock_is_reported() {
        let dir = tempdir().unwrap();
        std::mem::forget(KeepAliveLock::acquire(dir.path()).unwrap());

        let lock = KeepAliveLock::acquire(dir.path()).unwrap();
        assert!(lock.stale_owner().unwrap().starts_with("pid="));
    }
}
