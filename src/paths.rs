//! Filesystem layout for a lemming base directory.
//!
//! Provides `BasePaths` (engine-wide files) and `AgentPaths` (per-agent
//! directories). The filesystem is the single source of truth: every path the
//! engine touches is derived here.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Directory name that discovery skips; it holds a copyable resume skeleton.
pub const TEMPLATE_DIR: &str = "agent_template";

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("agent name cannot be empty")]
    #[diagnostic(
        code(lemming::paths::empty_name),
        help("Give the agent a non-empty name in its resume.")
    )]
    EmptyName,

    #[error("agent name \"{name}\" contains path separators")]
    #[diagnostic(
        code(lemming::paths::separator),
        help("Agent names are used as directory names; use letters, digits, '_' or '-'.")
    )]
    Separator { name: String },

    #[error("agent name \"{name}\" is invalid")]
    #[diagnostic(
        code(lemming::paths::reserved),
        help("'.' and '..' are reserved directory names.")
    )]
    Reserved { name: String },

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(lemming::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Reject names that would escape the agents directory.
pub fn validate_agent_name(name: &str) -> PathResult<()> {
    if name.is_empty() {
        return Err(PathError::EmptyName);
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(PathError::Separator { name: name.into() });
    }
    if name == "." || name == ".." {
        return Err(PathError::Reserved { name: name.into() });
    }
    Ok(())
}

/// Engine-wide directories and files under one base directory.
#[derive(Debug, Clone)]
pub struct BasePaths {
    /// The base directory itself.
    pub root: PathBuf,
    /// `<base>/config/`
    pub config_dir: PathBuf,
    /// `<base>/agents/`
    pub agents_dir: PathBuf,
    /// `<base>/shared/`, the shared sandbox root.
    pub shared_dir: PathBuf,
}

impl BasePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            agents_dir: root.join("agents"),
            shared_dir: root.join("shared"),
            root,
        }
    }

    /// `<base>/config/engine.toml`
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("engine.toml")
    }

    /// `<base>/config/credits.json`
    pub fn credits_file(&self) -> PathBuf {
        self.config_dir.join("credits.json")
    }

    /// `<base>/config/tick.json`
    pub fn tick_file(&self) -> PathBuf {
        self.config_dir.join("tick.json")
    }

    /// `<base>/config/org_graph_derived.json`
    pub fn org_graph_file(&self) -> PathBuf {
        self.config_dir.join("org_graph_derived.json")
    }

    /// `<base>/config/engine.lock`
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir.join("engine.lock")
    }

    /// Paths for the agent stored in `agents/<dir_name>/`.
    pub fn agent(&self, dir_name: &str) -> PathResult<AgentPaths> {
        validate_agent_name(dir_name)?;
        Ok(AgentPaths::at(self.agents_dir.join(dir_name)))
    }

    /// Create the base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.agents_dir, &self.shared_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }
}

/// Directories belonging to a single agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub dir: PathBuf,
}

impl AgentPaths {
    /// Paths rooted at an agent's storage directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn resume_file(&self) -> PathBuf {
        self.dir.join("resume.json")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.dir.join("outbox")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.dir.join("memory")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.dir.join("workspace")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    /// Create the agent's subdirectories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [
            self.outbox_dir(),
            self.memory_dir(),
            self.workspace_dir(),
            self.logs_dir(),
        ] {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> PathResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_pass() {
        validate_agent_name("valid_agent").unwrap();
        validate_agent_name("agent-123").unwrap();
    }

    #[test]
    fn traversal_names_rejected() {
        assert!(matches!(validate_agent_name(""), Err(PathError::EmptyName)));
        assert!(matches!(validate_agent_name(".."), Err(PathError::Reserved { .. })));
        assert!(matches!(validate_agent_name("."), Err(PathError::Reserved { .. })));
        assert!(matches!(
            validate_agent_name("../evil"),
            Err(PathError::Separator { .. })
        ));
        assert!(matches!(
            validate_agent_name("/etc/passwd"),
            Err(PathError::Separator { .. })
        ));
    }

    #[test]
    fn agent_paths_layout() {
        let base = BasePaths::new("/srv/org");
        let agent = base.agent("planner").unwrap();
        assert_eq!(agent.dir, PathBuf::from("/srv/org/agents/planner"));
        assert_eq!(agent.outbox_dir(), PathBuf::from("/srv/org/agents/planner/outbox"));
        assert_eq!(agent.workspace_dir(), PathBuf::from("/srv/org/agents/planner/workspace"));
        assert!(base.agent("../bad").is_err());
        assert_eq!(base.tick_file(), PathBuf::from("/srv/org/config/tick.json"));
    }
}
