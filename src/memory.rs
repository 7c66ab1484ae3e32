//! Per-agent key/value memory with typed update operations.
//!
//! One JSON record per key under `agents/<dir>/memory/<key>.json`. There is
//! exactly one current record per (agent, key); `append` and `merge` fold
//! history into the value itself.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::resume::Agent;
use crate::error::{MemoryError, MemoryResult, StoreError, json_type_name};
use crate::store::{read_json, write_json_atomic};

// ── Keys ────────────────────────────────────────────────────────────────

static RE_MEMORY_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("memory key pattern is valid"));

const MAX_KEY_LEN: usize = 128;

/// Keys become file names, so only a conservative alphabet is allowed.
pub fn validate_key(key: &str) -> MemoryResult<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(MemoryError::InvalidKey {
            key: key.into(),
            reason: format!("longer than {MAX_KEY_LEN} bytes"),
        });
    }
    if !RE_MEMORY_KEY.is_match(key) {
        return Err(MemoryError::InvalidKey {
            key: key.into(),
            reason: "must match ^[A-Za-z0-9_-]+$".into(),
        });
    }
    Ok(())
}

// ── Records ─────────────────────────────────────────────────────────────

/// How an incoming value combines with the stored one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOp {
    #[default]
    Set,
    Append,
    Merge,
}

impl MemoryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Append => "append",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "append" => Ok(Self::Append),
            "merge" => Ok(Self::Merge),
            other => Err(format!("unknown memory operation \"{other}\" (use set, append or merge)")),
        }
    }
}

/// Current value of one agent/key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub operation: MemoryOp,
    #[serde(default)]
    pub tick: u64,
    #[serde(alias = "timestamp")]
    pub timestamp_utc: DateTime<Utc>,
    pub agent: String,
}

/// Fold `incoming` into `existing` according to `op`.
pub fn apply_op(
    key: &str,
    existing: Option<Value>,
    incoming: Value,
    op: MemoryOp,
) -> MemoryResult<Value> {
    match op {
        MemoryOp::Set => Ok(incoming),
        MemoryOp::Append => {
            let mut list = match existing {
                None => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
            };
            list.push(incoming);
            Ok(Value::Array(list))
        }
        MemoryOp::Merge => {
            let mut base = match existing {
                None => Map::new(),
                Some(Value::Object(map)) => map,
                Some(other) => {
                    return Err(MemoryError::TypeMismatch {
                        key: key.into(),
                        operation: op.to_string(),
                        expected: "mapping".into(),
                        found: format!("stored {}", json_type_name(&other)),
                    });
                }
            };
            match incoming {
                Value::Object(update) => {
                    base.extend(update);
                    Ok(Value::Object(base))
                }
                other => Err(MemoryError::TypeMismatch {
                    key: key.into(),
                    operation: op.to_string(),
                    expected: "mapping".into(),
                    found: format!("incoming {}", json_type_name(&other)),
                }),
            }
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────────

/// Durable home of agent memory.
pub trait MemoryStore: Send + Sync {
    /// Current record for `key`. Reads never mutate.
    fn load(&self, agent: &Agent, key: &str) -> MemoryResult<Option<MemoryRecord>>;

    /// Apply `op` with `value` and persist the resulting record.
    fn save(
        &self,
        agent: &Agent,
        key: &str,
        value: Value,
        op: MemoryOp,
        tick: u64,
    ) -> MemoryResult<MemoryRecord>;

    /// Stored keys, sorted.
    fn list_keys(&self, agent: &Agent) -> MemoryResult<Vec<String>>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, agent: &Agent, key: &str) -> MemoryResult<bool>;

    /// Up to `max_items` records in key order. Unreadable records are skipped.
    fn snapshot(&self, agent: &Agent, max_items: usize) -> MemoryResult<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for key in self.list_keys(agent)?.into_iter().take(max_items) {
            match self.load(agent, &key) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(agent = %agent.name, key = %key, error = %e, "skipping unreadable memory record"),
            }
        }
        Ok(records)
    }
}

/// Filesystem memory under each agent's `memory/` directory.
#[derive(Debug, Clone)]
pub struct FsMemoryStore {
    max_value_bytes: usize,
}

impl FsMemoryStore {
    pub fn new(max_value_bytes: usize) -> Self {
        Self { max_value_bytes }
    }

    fn record_path(agent: &Agent, key: &str) -> std::path::PathBuf {
        agent.paths().memory_dir().join(format!("{key}.json"))
    }
}

impl MemoryStore for FsMemoryStore {
    fn load(&self, agent: &Agent, key: &str) -> MemoryResult<Option<MemoryRecord>> {
        validate_key(key)?;
        Ok(read_json(&Self::record_path(agent, key))?)
    }

    fn save(
        &self,
        agent: &Agent,
        key: &str,
        value: Value,
        op: MemoryOp,
        tick: u64,
    ) -> MemoryResult<MemoryRecord> {
        validate_key(key)?;
        let existing = match op {
            MemoryOp::Set => None,
            MemoryOp::Append | MemoryOp::Merge => self.load(agent, key)?.map(|r| r.value),
        };
        let value = apply_op(key, existing, value, op)?;

        let size = serde_json::to_vec(&value)
            .map_err(|e| StoreError::Encode {
                what: format!("memory value {key}"),
                message: e.to_string(),
            })?
            .len();
        if size > self.max_value_bytes {
            return Err(MemoryError::TooLarge {
                key: key.into(),
                size,
                limit: self.max_value_bytes,
            });
        }

        let record = MemoryRecord {
            key: key.into(),
            value,
            operation: op,
            tick,
            timestamp_utc: Utc::now(),
            agent: agent.name.clone(),
        };
        write_json_atomic(&Self::record_path(agent, key), &record)?;
        tracing::debug!(agent = %agent.name, key, operation = %op, tick, "memory saved");
        Ok(record)
    }

    fn list_keys(&self, agent: &Agent) -> MemoryResult<Vec<String>> {
        let dir = agent.paths().memory_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e).into()),
        };
        let mut keys: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
            .filter(|k| validate_key(k).is_ok())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, agent: &Agent, key: &str) -> MemoryResult<bool> {
        validate_key(key)?;
        let path = Self::record_path(agent, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e).into()),
        }
    }
}

/// Render a memory snapshot as a context block.
pub fn render_snapshot(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return "No stored memory.".to_string();
    }
    let mut out = String::from("MEMORY:");
    for record in records {
        out.push_str(&format!("\n- {}: {}", record.key, record.value));
    }
    out
}
