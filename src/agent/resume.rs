//! Resume records and the `Agent` domain type.
//!
//! A resume is the declarative record that fully describes one agent. It is
//! re-read from disk at the start of every tick; nothing in memory outlives a
//! tick. The canonical identifier is the resume's `name`, which may differ
//! from the directory the resume lives in.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::CreditDefaults;
use crate::error::{ResumeError, ResumeResult};
use crate::paths::{AgentPaths, validate_agent_name};

/// Wildcard entry in `permissions.read_outboxes`.
pub const ALL_OUTBOXES: &str = "*";

// ---------------------------------------------------------------------------
// On-disk record
// ---------------------------------------------------------------------------

/// Firing schedule: every `run_every_n_ticks`, shifted by `phase_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub run_every_n_ticks: i64,
    #[serde(default)]
    pub phase_offset: i64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            run_every_n_ticks: 1,
            phase_offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsRecord {
    #[serde(default)]
    pub read_outboxes: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditsRecord {
    pub max_credits: f64,
    pub soft_cap: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_action: Option<f64>,
}

/// Which model an agent asks the invoker for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// `resume.json` as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub permissions: PermissionsRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<CreditsRecord>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
    /// Fields this version does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Resume {
    /// A minimal resume with defaults for everything but name and instructions.
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            short_description: None,
            schedule: Schedule::default(),
            permissions: PermissionsRecord::default(),
            credits: None,
            instructions: instructions.into(),
            model: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Parse a resume file.
    pub fn read(path: &Path) -> ResumeResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| ResumeError::Store(crate::error::StoreError::io(path, e)))?;
        serde_json::from_slice(&bytes).map_err(|e| ResumeError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Problems that make the resume unusable; such agents are skipped.
    pub fn blocking_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(e) = validate_agent_name(&self.name) {
            problems.push(format!("name: {e}"));
        }
        if let Some(credits) = &self.credits {
            for (field, value) in [
                ("credits.max_credits", Some(credits.max_credits)),
                ("credits.soft_cap", Some(credits.soft_cap)),
                ("credits.cost_per_action", credits.cost_per_action),
            ] {
                if value.is_some_and(|v| !(v.is_finite() && v >= 0.0)) {
                    problems.push(format!("{field} must be a finite number >= 0"));
                }
            }
        }
        problems
    }

    /// Every problem, including those the engine tolerates at run time.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.blocking_problems();
        if self.schedule.run_every_n_ticks <= 0 {
            problems.push("schedule.run_every_n_ticks must be > 0".to_string());
        }
        if self.instructions.trim().is_empty() {
            problems.push("instructions must be a non-empty string".to_string());
        }
        if let Some(model) = &self.model {
            if model.key.trim().is_empty() {
                problems.push("model.key must be a non-empty string".to_string());
            }
            if model.temperature.is_some_and(|t| !(0.0..=2.0).contains(&t)) {
                problems.push("model.temperature must be within 0.0..=2.0".to_string());
            }
        }
        for name in &self.permissions.read_outboxes {
            if name != ALL_OUTBOXES && validate_agent_name(name).is_err() {
                problems.push(format!("permissions.read_outboxes: invalid agent name \"{name}\""));
            }
        }
        problems
    }
}

// ---------------------------------------------------------------------------
// Domain type
// ---------------------------------------------------------------------------

/// Whose outboxes an agent may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxAccess {
    /// Every other agent.
    All,
    Named(BTreeSet<String>),
}

impl OutboxAccess {
    pub fn from_names(names: &[String]) -> Self {
        if names.iter().any(|n| n == ALL_OUTBOXES) {
            Self::All
        } else {
            Self::Named(names.iter().cloned().collect())
        }
    }

    pub fn allows(&self, producer: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.contains(producer),
        }
    }

    fn to_names(&self) -> Vec<String> {
        match self {
            Self::All => vec![ALL_OUTBOXES.to_string()],
            Self::Named(names) => names.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub read_outboxes: OutboxAccess,
    pub tools: BTreeSet<String>,
}

/// Budget terms from the resume. The running balance lives in the ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditTerms {
    pub max_credits: f64,
    pub soft_cap: f64,
    pub cost_per_action: f64,
}

/// A loaded, validated agent.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Canonical identifier.
    pub name: String,
    /// Storage directory; normally `agents/<name>/`.
    pub dir: PathBuf,
    pub title: Option<String>,
    pub schedule: Schedule,
    pub permissions: Permissions,
    pub credits: CreditTerms,
    pub instructions: String,
    pub model: Option<ModelSpec>,
}

impl Agent {
    /// Build an agent from its resume. `dir` is where the resume was found.
    pub fn from_resume(
        resume: &Resume,
        dir: impl Into<PathBuf>,
        defaults: &CreditDefaults,
    ) -> ResumeResult<Self> {
        let dir = dir.into();
        let problems = resume.blocking_problems();
        if !problems.is_empty() {
            return Err(ResumeError::Invalid {
                path: AgentPaths::at(&dir).resume_file().display().to_string(),
                problems,
            });
        }

        let credits = match &resume.credits {
            Some(c) => CreditTerms {
                max_credits: c.max_credits,
                soft_cap: c.soft_cap,
                cost_per_action: c.cost_per_action.unwrap_or(defaults.default_cost_per_action),
            },
            None => CreditTerms {
                max_credits: defaults.default_max_credits,
                soft_cap: defaults.default_soft_cap,
                cost_per_action: defaults.default_cost_per_action,
            },
        };

        Ok(Self {
            name: resume.name.clone(),
            dir,
            title: resume.title.clone(),
            schedule: resume.schedule,
            permissions: Permissions {
                read_outboxes: OutboxAccess::from_names(&resume.permissions.read_outboxes),
                tools: resume.permissions.tools.iter().cloned().collect(),
            },
            credits,
            instructions: resume.instructions.clone(),
            model: resume.model.clone(),
        })
    }

    pub fn paths(&self) -> AgentPaths {
        AgentPaths::at(&self.dir)
    }

    /// Whether this agent's resume allowlists `tool`.
    pub fn can_use(&self, tool: &str) -> bool {
        self.permissions.tools.contains(tool)
    }

    /// Whether this agent may read `producer`'s outbox. Never its own.
    pub fn can_read(&self, producer: &str) -> bool {
        producer != self.name && self.permissions.read_outboxes.allows(producer)
    }

    /// Serialize back into a resume record (drops unknown fields).
    pub fn to_resume(&self) -> Resume {
        Resume {
            name: self.name.clone(),
            title: self.title.clone(),
            short_description: None,
            schedule: self.schedule,
            permissions: PermissionsRecord {
                read_outboxes: self.permissions.read_outboxes.to_names(),
                tools: self.permissions.tools.iter().cloned().collect(),
            },
            credits: Some(CreditsRecord {
                max_credits: self.credits.max_credits,
                soft_cap: self.credits.soft_cap,
                cost_per_action: Some(self.credits.cost_per_action),
            }),
            instructions: self.instructions.clone(),
            model: self.model.clone(),
            extra: serde_json::Map::new(),
        }
    }
}
