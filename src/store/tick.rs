//! Persisted global tick counter.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::atomic::{read_json, write_json_atomic};
use crate::error::StoreResult;

/// Durable home of the current tick.
pub trait TickStore: Send + Sync {
    /// The tick that runs next.
    fn load(&self) -> u64;
    /// Persist the tick that runs next.
    fn save(&self, tick: u64) -> StoreResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TickFile {
    current_tick: u64,
}

/// `config/tick.json`-backed tick counter.
#[derive(Debug, Clone)]
pub struct FsTickStore {
    path: PathBuf,
}

impl FsTickStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TickStore for FsTickStore {
    fn load(&self) -> u64 {
        match read_json::<TickFile>(&self.path) {
            Ok(Some(file)) => file.current_tick,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(
                    event = "tick_file_unreadable",
                    path = %self.path.display(),
                    error = %e,
                    "tick counter unreadable, starting from 0"
                );
                0
            }
        }
    }

    fn save(&self, tick: u64) -> StoreResult<()> {
        write_json_atomic(&self.path, &TickFile { current_tick: tick })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_starts_at_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsTickStore::new(dir.path().join("tick.json"));
        assert_eq!(store.load(), 0);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsTickStore::new(dir.path().join("tick.json"));
        store.save(42).unwrap();
        assert_eq!(FsTickStore::new(dir.path().join("tick.json")).load(), 42);
    }

    #[test]
    fn corrupt_file_falls_back_to_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tick.json");
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(FsTickStore::new(path).load(), 0);
    }
}
