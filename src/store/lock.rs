//! Single-instance lock for a base directory.
//!
//! The core has exactly one designated writer for the credit ledger and tick
//! counter. The lock file is created exclusively; a lock left behind by a dead
//! process is detected through its PID and replaced.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: chrono::DateTime<chrono::Utc>,
}

/// Held for the lifetime of an orchestrator process; released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock at `path`, replacing it if its owner is gone.
    pub fn acquire(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        match Self::create_exclusive(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<LockInfo>(&s).ok());
                match holder {
                    Some(info) if info.pid != std::process::id() && process_alive(info.pid) => {
                        Err(StoreError::Locked {
                            pid: info.pid,
                            path: path.display().to_string(),
                        })
                    }
                    _ => {
                        tracing::warn!(
                            event = "stale_lock_replaced",
                            path = %path.display(),
                            "replacing stale engine lock"
                        );
                        std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                        Self::create_exclusive(&path).map_err(|e| StoreError::io(&path, e))
                    }
                }
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn create_exclusive(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now(),
        };
        let json = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 doesn't actually send a signal;
    // it only checks whether the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    // EPERM: the process exists but belongs to another user.
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // On non-unix, fall back to trusting the lock file.
    true
}
