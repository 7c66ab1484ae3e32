//! Engine configuration, persisted as TOML in `<base>/config/engine.toml`.
//!
//! Every field has a serde default, so a missing or partial file is valid.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::tools::shell_exec::is_interpreter;

/// Errors from configuration loading.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read engine config: {path}")]
    #[diagnostic(
        code(lemming::config::read),
        help("Ensure the config file is readable, or delete it to use defaults.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse engine config {path}: {message}")]
    #[diagnostic(
        code(lemming::config::parse),
        help("Check the TOML syntax and field types in the engine config file.")
    )]
    Parse { path: String, message: String },

    #[error("engine config is invalid: {}", problems.join("; "))]
    #[diagnostic(
        code(lemming::config::invalid),
        help("Fix each listed problem in engine.toml.")
    )]
    Invalid { problems: Vec<String> },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep between ticks in continuous mode.
    pub tick_interval_secs: u64,
    /// Stop continuous mode after this many ticks (0 = unlimited).
    pub max_ticks: u64,
    pub inbox: InboxConfig,
    pub retention: RetentionConfig,
    pub memory: MemoryConfig,
    pub credits: CreditDefaults,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub summary: SummaryConfig,
    pub tools: ToolLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            max_ticks: 0,
            inbox: InboxConfig::default(),
            retention: RetentionConfig::default(),
            memory: MemoryConfig::default(),
            credits: CreditDefaults::default(),
            model: ModelConfig::default(),
            retry: RetryConfig::default(),
            summary: SummaryConfig::default(),
            tools: ToolLimits::default(),
        }
    }
}

/// Bounds on the virtual inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub max_entries: usize,
    /// Entries older than this many ticks are left out (0 = no age bound).
    pub max_age_ticks: u64,
    pub max_chars: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_age_ticks: 100,
            max_chars: 8000,
        }
    }
}

/// Outbox retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_ticks: u64,
    pub prune_interval_ticks: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_ticks: 100,
            prune_interval_ticks: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of memory records rendered into an agent's context.
    pub context_max_items: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_max_items: 20,
        }
    }
}

/// Credit settings for resumes that omit them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditDefaults {
    pub default_max_credits: f64,
    pub default_soft_cap: f64,
    pub default_cost_per_action: f64,
}

impl Default for CreditDefaults {
    fn default() -> Self {
        Self {
            default_max_credits: 1000.0,
            default_soft_cap: 500.0,
            default_cost_per_action: 0.01,
        }
    }
}

/// Model invoker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub default_model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            default_model: "llama3.2".into(),
            temperature: 0.2,
            timeout_secs: 120,
        }
    }
}

/// Retry and circuit-breaker policy around the model invoker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub failure_threshold: u32,
    pub open_cooldown_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            failure_threshold: 5,
            open_cooldown_secs: 60,
        }
    }
}

/// Periodic summary turn: the named agent is forced to run every
/// `every_n_ticks` ticks, and its notes are kept in `logs/summary_<tick>.txt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub agent: String,
    /// 0 disables the summary turn.
    pub every_n_ticks: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            agent: "manager".into(),
            every_n_ticks: 12,
        }
    }
}

impl SummaryConfig {
    /// Whether `agent` takes its summary turn on `tick`.
    pub fn is_due(&self, agent: &str, tick: u64) -> bool {
        self.every_n_ticks > 0 && agent == self.agent && tick % self.every_n_ticks == 0
    }
}

/// One executable the `shell` tool may run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutableRule {
    /// Standalone switches the caller may pass (exact tokens).
    pub allowed_flags: Vec<String>,
    /// Insert `--` before operands, so operands may begin with `-`.
    pub end_of_options: bool,
}

impl ExecutableRule {
    fn flags(flags: &[&str]) -> Self {
        Self {
            allowed_flags: flags.iter().map(|f| f.to_string()).collect(),
            end_of_options: false,
        }
    }

    fn delimited(flags: &[&str]) -> Self {
        Self {
            end_of_options: true,
            ..Self::flags(flags)
        }
    }
}

/// Limits and policies for the tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLimits {
    pub command_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub max_file_read_bytes: usize,
    pub max_file_write_bytes: usize,
    pub max_memory_value_bytes: usize,
    /// Also write each tool result as a `tool_result` outbox entry.
    pub record_tool_results: bool,
    pub executables: BTreeMap<String, ExecutableRule>,
}

impl Default for ToolLimits {
    fn default() -> Self {
        let executables = BTreeMap::from([
            ("cat".into(), ExecutableRule::delimited(&[])),
            ("date".into(), ExecutableRule::default()),
            ("diff".into(), ExecutableRule::delimited(&["-u"])),
            ("echo".into(), ExecutableRule::default()),
            ("grep".into(), ExecutableRule::delimited(&["-i", "-n", "-c", "-r", "-l"])),
            ("head".into(), ExecutableRule::delimited(&[])),
            ("ls".into(), ExecutableRule::delimited(&["-l", "-a", "-la", "-1"])),
            ("mkdir".into(), ExecutableRule::delimited(&["-p"])),
            ("pwd".into(), ExecutableRule::default()),
            ("sort".into(), ExecutableRule::delimited(&["-r", "-n", "-u"])),
            ("tail".into(), ExecutableRule::delimited(&[])),
            ("uniq".into(), ExecutableRule::delimited(&["-c"])),
            ("wc".into(), ExecutableRule::delimited(&["-l", "-w", "-c"])),
        ]);
        Self {
            command_timeout_secs: 30,
            max_output_bytes: 64 * 1024,
            max_file_read_bytes: 1024 * 1024,
            max_file_write_bytes: 100 * 1024,
            max_memory_value_bytes: 50 * 1024,
            record_tool_results: true,
            executables,
        }
    }
}

impl ToolLimits {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    /// Drop interpreters and shells from the executable allowlist, returning
    /// the names removed.
    pub fn filter_interpreters(&mut self) -> Vec<String> {
        let denied: Vec<String> = self
            .executables
            .keys()
            .filter(|name| is_interpreter(name))
            .cloned()
            .collect();
        for name in &denied {
            self.executables.remove(name);
        }
        denied
    }
}

impl EngineConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file atomically.
    pub fn save(&self, path: &Path) -> crate::error::StoreResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| crate::error::StoreError::Encode {
            what: path.display().to_string(),
            message: e.to_string(),
        })?;
        crate::store::write_atomic(path, content.as_bytes())
    }

    /// Problems an operator should fix. Empty means valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.retention.prune_interval_ticks == 0 {
            problems.push("retention.prune_interval_ticks must be > 0".to_string());
        }
        if self.inbox.max_entries == 0 {
            problems.push("inbox.max_entries must be > 0".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be > 0".to_string());
        }
        for name in self.tools.executables.keys() {
            if is_interpreter(name) {
                problems.push(format!(
                    "tools.executables.{name}: interpreters and shells cannot be allowlisted"
                ));
            }
            if name.contains('/') {
                problems.push(format!(
                    "tools.executables.{name}: executables are named, not given as paths"
                ));
            }
        }
        problems
    }

    /// Fail with every problem at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join("engine.toml")).unwrap();
        assert_eq!(config.inbox.max_entries, 50);
        assert!(config.problems().is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "tick_interval_secs = 3\n[inbox]\nmax_entries = 7\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.tick_interval_secs, 3);
        assert_eq!(config.inbox.max_entries, 7);
        assert_eq!(config.inbox.max_chars, 8000);
        assert_eq!(config.retention.prune_interval_ticks, 10);
    }

    #[test]
    fn interpreter_in_allowlist_is_a_problem() {
        let mut config = EngineConfig::default();
        config
            .tools
            .executables
            .insert("python3".into(), ExecutableRule::default());
        let problems = config.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("python3"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn interpreters_are_filtered_at_runtime() {
        let mut limits = ToolLimits::default();
        limits.executables.insert("bash".into(), ExecutableRule::default());
        limits.executables.insert("node".into(), ExecutableRule::default());
        assert_eq!(limits.filter_interpreters(), vec!["bash", "node"]);
        assert!(limits.executables.contains_key("ls"));
        assert!(!limits.executables.contains_key("bash"));
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        let mut config = EngineConfig::default();
        config.max_ticks = 12;
        config.save(&path).unwrap();
        let back = EngineConfig::load(&path).unwrap();
        assert_eq!(back.max_ticks, 12);
        assert_eq!(back.tools.executables, config.tools.executables);
    }

    #[test]
    fn summary_turn_is_due_on_its_interval_only() {
        let summary = SummaryConfig::default();
        assert!(summary.is_due("manager", 0));
        assert!(summary.is_due("manager", 24));
        assert!(!summary.is_due("manager", 13));
        assert!(!summary.is_due("coder", 12));

        let disabled = SummaryConfig {
            every_n_ticks: 0,
            ..SummaryConfig::default()
        };
        assert!(!disabled.is_due("manager", 0));
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "tick_interval_secs = \"soon\"").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
