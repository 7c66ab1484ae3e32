//! Append-only outboxes and the derived virtual inbox.
//!
//! Each agent owns `agents/<dir>/outbox/`, holding one JSON file per entry
//! named `{tick:08}_{id}.json`. Entries are never rewritten; the retention
//! sweep deletes whole files. A reader's inbox is computed on demand from the
//! outboxes its resume permits it to read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::resume::Agent;
use crate::config::InboxConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::write_json_atomic;

/// Entry kind the engine uses when recording tool results.
pub const TOOL_RESULT_KIND: &str = "tool_result";

/// One immutable outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub tick: u64,
    /// Producer, stamped by the engine.
    pub agent: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Delivery hint only; reading is governed by permissions.
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Fields written by other versions, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutboxEntry {
    fn sort_key(&self) -> (u64, DateTime<Utc>, &str, &str) {
        (self.tick, self.created_at, &self.agent, &self.id)
    }

    /// File name inside the producer's outbox directory.
    pub fn file_name(&self) -> String {
        format!("{:08}_{}.json", self.tick, self.id)
    }
}

/// The producer-controlled part of an entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboxDraft {
    pub kind: String,
    pub payload: Value,
    pub tags: Vec<String>,
    pub recipients: Option<Vec<String>>,
}

impl OutboxDraft {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            ..Self::default()
        }
    }
}

/// Durable home of outbox entries.
pub trait OutboxStore: Send + Sync {
    /// Stamp and durably write one entry to `agent`'s outbox.
    fn append(&self, agent: &Agent, tick: u64, draft: OutboxDraft) -> StoreResult<OutboxEntry>;

    /// `agent`'s own entries, oldest first; with a limit, the newest `limit`.
    fn read_own(&self, agent: &Agent, limit: Option<usize>) -> StoreResult<Vec<OutboxEntry>>;

    /// Number of entries in `agent`'s outbox.
    fn count(&self, agent: &Agent) -> StoreResult<usize>;

    /// Entries `reader` may see on `tick`, oldest first and bounded.
    fn assemble_inbox(
        &self,
        reader: &Agent,
        agents: &[Agent],
        tick: u64,
        bounds: &InboxConfig,
    ) -> StoreResult<Vec<OutboxEntry>>;

    /// Delete entries more than `max_age_ticks` older than `current_tick`.
    /// Must only be called between ticks. Returns how many were removed.
    fn prune(&self, current_tick: u64, max_age_ticks: u64) -> StoreResult<usize>;
}

/// Filesystem outboxes under `<base>/agents/`.
#[derive(Debug, Clone)]
pub struct FsOutboxStore {
    agents_dir: PathBuf,
}

impl FsOutboxStore {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
        }
    }

    /// Entry files of one outbox with their tick prefix, sorted by name.
    fn entry_files(outbox: &Path) -> StoreResult<Vec<(Option<u64>, PathBuf)>> {
        let entries = match std::fs::read_dir(outbox) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(outbox, e)),
        };
        let mut files: Vec<(Option<u64>, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
            .map(|p| (tick_from_file_name(&p), p))
            .collect();
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    /// Parsed entries with `tick >= min_tick`. Unparseable files are skipped.
    fn load_entries(outbox: &Path, min_tick: u64) -> StoreResult<Vec<OutboxEntry>> {
        let mut out = Vec::new();
        for (tick, path) in Self::entry_files(outbox)? {
            if tick.is_some_and(|t| t < min_tick) {
                continue;
            }
            match load_entry(&path) {
                Ok(entry) if entry.tick >= min_tick => out.push(entry),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        event = "outbox_read_failed",
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable outbox entry"
                    );
                }
            }
        }
        Ok(out)
    }
}

fn load_entry(path: &Path) -> StoreResult<OutboxEntry> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// `00000042_abc.json` -> `Some(42)`.
fn tick_from_file_name(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (prefix, _) = stem.split_once('_')?;
    prefix.parse().ok()
}

impl OutboxStore for FsOutboxStore {
    fn append(&self, agent: &Agent, tick: u64, draft: OutboxDraft) -> StoreResult<OutboxEntry> {
        let entry = OutboxEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            tick,
            agent: agent.name.clone(),
            kind: draft.kind,
            payload: draft.payload,
            tags: draft.tags,
            recipients: draft.recipients,
            created_at: Utc::now(),
            extra: Map::new(),
        };
        let path = agent.paths().outbox_dir().join(entry.file_name());
        write_json_atomic(&path, &entry)?;
        tracing::debug!(agent = %agent.name, tick, kind = %entry.kind, id = %entry.id, "outbox entry written");
        Ok(entry)
    }

    fn read_own(&self, agent: &Agent, limit: Option<usize>) -> StoreResult<Vec<OutboxEntry>> {
        let mut entries = Self::load_entries(&agent.paths().outbox_dir(), 0)?;
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries = entries.split_off(skip);
        }
        Ok(entries)
    }

    fn count(&self, agent: &Agent) -> StoreResult<usize> {
        Ok(Self::entry_files(&agent.paths().outbox_dir())?.len())
    }

    fn assemble_inbox(
        &self,
        reader: &Agent,
        agents: &[Agent],
        tick: u64,
        bounds: &InboxConfig,
    ) -> StoreResult<Vec<OutboxEntry>> {
        let min_tick = if bounds.max_age_ticks == 0 {
            0
        } else {
            tick.saturating_sub(bounds.max_age_ticks)
        };

        let mut inbox = Vec::new();
        for producer in agents.iter().filter(|p| reader.can_read(&p.name)) {
            inbox.extend(Self::load_entries(&producer.paths().outbox_dir(), min_tick)?);
        }
        inbox.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let skip = inbox.len().saturating_sub(bounds.max_entries);
        Ok(inbox.split_off(skip))
    }

    fn prune(&self, current_tick: u64, max_age_ticks: u64) -> StoreResult<usize> {
        let agent_dirs = match std::fs::read_dir(&self.agents_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.agents_dir, e)),
        };

        let mut removed = 0;
        let mut unprefixed = 0;
        for agent_dir in agent_dirs.filter_map(|e| e.ok()).map(|e| e.path()) {
            if !agent_dir.is_dir() {
                continue;
            }
            for (tick, path) in Self::entry_files(&agent_dir.join("outbox"))? {
                let Some(tick) = tick else {
                    // Not written by append; age unknown, so it is kept.
                    unprefixed += 1;
                    tracing::debug!(
                        event = "outbox_unprefixed_skipped",
                        path = %path.display(),
                        "outbox file without a tick prefix left in place"
                    );
                    continue;
                };
                if current_tick.saturating_sub(tick) <= max_age_ticks {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::error!(
                        event = "outbox_cleanup_failed",
                        path = %path.display(),
                        error = %e,
                        "failed to prune outbox entry"
                    ),
                }
            }
        }
        if removed > 0 {
            tracing::info!(event = "outbox_pruned", tick = current_tick, removed, "outbox entries pruned");
        }
        if unprefixed > 0 {
            tracing::debug!(tick = current_tick, unprefixed, "outbox files without a tick prefix were not pruned");
        }
        Ok(removed)
    }
}

/// Render inbox entries as a context block of at most `max_chars` characters.
pub fn render_inbox(entries: &[OutboxEntry], max_chars: usize) -> String {
    if entries.is_empty() {
        return "No incoming messages.".to_string();
    }
    let mut out = String::from("INCOMING MESSAGES:");
    let mut used = out.chars().count();
    for entry in entries {
        let text = match entry.payload.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => entry.payload.to_string(),
        };
        let line = format!(
            "\n[tick {} {}] From {} ({}): {text}",
            entry.tick,
            entry.created_at.to_rfc3339(),
            entry.agent,
            entry.kind
        );
        let len = line.chars().count();
        if used + len > max_chars {
            out.push_str("\n... (truncated)");
            break;
        }
        out.push_str(&line);
        used += len;
    }
    out
}
