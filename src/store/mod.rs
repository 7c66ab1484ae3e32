//! Durable storage primitives shared by every on-disk record.
//!
//! - [`atomic`]: write-to-temporary-then-rename for all JSON/TOML records
//! - [`tick`]: the persisted global tick counter
//! - [`lock`]: single-instance lock so only one orchestrator writes a base dir

pub mod atomic;
pub mod lock;
pub mod tick;

pub use atomic::{read_json, write_json_atomic, write_atomic};
pub use lock::InstanceLock;
pub use tick::{FsTickStore, TickStore};
