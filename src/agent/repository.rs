//! Agent discovery and creation over `<base>/agents/`.
//!
//! Discovery never fails because of a single bad resume: each problem becomes
//! a [`ResumeIssue`], is logged, and the agent is skipped. Only an agents
//! directory that exists but cannot be listed is an error.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::CreditDefaults;
use crate::error::{ResumeError, ResumeResult, StoreError, StoreResult};
use crate::paths::{BasePaths, TEMPLATE_DIR};
use crate::store::write_json_atomic;

use super::resume::{Agent, Resume};

/// Why a directory under `agents/` did not yield a clean agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    ResumeMissing,
    ResumeInvalid,
    /// The agent loaded, but its resume name differs from its directory.
    NameMismatch,
    DuplicateName,
    /// The agent loaded, but explicit validation would reject it.
    Advisory,
}

impl IssueKind {
    /// Event name used in logs.
    pub fn event(self) -> &'static str {
        match self {
            Self::ResumeMissing => "resume_missing",
            Self::ResumeInvalid => "resume_invalid",
            Self::NameMismatch => "resume_name_mismatch",
            Self::DuplicateName => "duplicate_agent_name",
            Self::Advisory => "resume_advisory",
        }
    }

    /// Whether `lemming validate` treats this as a failure.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::NameMismatch)
    }
}

#[derive(Debug, Clone)]
pub struct ResumeIssue {
    pub dir: PathBuf,
    pub kind: IssueKind,
    pub message: String,
}

/// Result of scanning the agents directory.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Loaded agents, ordered by directory name.
    pub agents: Vec<Agent>,
    pub issues: Vec<ResumeIssue>,
}

/// Durable home of agent resumes.
pub trait AgentRepository: Send + Sync {
    /// Load every usable agent.
    fn discover(&self) -> StoreResult<Discovery>;

    /// Look an agent up by canonical name.
    fn find(&self, name: &str) -> StoreResult<Option<Agent>> {
        Ok(self.discover()?.agents.into_iter().find(|a| a.name == name))
    }

    /// Persist a new resume and create the agent's directories.
    fn create(&self, resume: &Resume) -> ResumeResult<Agent>;

    /// Every issue, including tolerated ones, for explicit validation.
    fn validate(&self) -> StoreResult<Vec<ResumeIssue>>;
}

/// Filesystem-backed repository.
#[derive(Debug, Clone)]
pub struct FsAgentRepository {
    paths: BasePaths,
    defaults: CreditDefaults,
}

impl FsAgentRepository {
    pub fn new(paths: BasePaths, defaults: CreditDefaults) -> Self {
        Self { paths, defaults }
    }

    fn agent_dirs(&self) -> StoreResult<Vec<PathBuf>> {
        let agents_dir = &self.paths.agents_dir;
        let entries = match std::fs::read_dir(agents_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(agents_dir, e)),
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| p.file_name().is_some_and(|n| n != TEMPLATE_DIR))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Scan and collect issues without logging them.
    fn scan(&self) -> StoreResult<(Discovery, Vec<(usize, Resume)>)> {
        let mut discovery = Discovery::default();
        let mut resumes = Vec::new();
        let mut seen = HashSet::new();

        for dir in self.agent_dirs()? {
            let resume_path = dir.join("resume.json");
            if !resume_path.exists() {
                discovery.issues.push(ResumeIssue {
                    dir,
                    kind: IssueKind::ResumeMissing,
                    message: "no resume.json".into(),
                });
                continue;
            }

            let resume = match Resume::read(&resume_path) {
                Ok(resume) => resume,
                Err(e) => {
                    discovery.issues.push(ResumeIssue {
                        dir,
                        kind: IssueKind::ResumeInvalid,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let agent = match Agent::from_resume(&resume, &dir, &self.defaults) {
                Ok(agent) => agent,
                Err(e) => {
                    discovery.issues.push(ResumeIssue {
                        dir,
                        kind: IssueKind::ResumeInvalid,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if dir_name != agent.name {
                discovery.issues.push(ResumeIssue {
                    dir: dir.clone(),
                    kind: IssueKind::NameMismatch,
                    message: format!(
                        "resume name \"{}\" differs from directory \"{dir_name}\"",
                        agent.name
                    ),
                });
            }

            if !seen.insert(agent.name.clone()) {
                discovery.issues.push(ResumeIssue {
                    dir,
                    kind: IssueKind::DuplicateName,
                    message: format!("agent name \"{}\" is already taken", agent.name),
                });
                continue;
            }

            resumes.push((discovery.agents.len(), resume));
            discovery.agents.push(agent);
        }
        Ok((discovery, resumes))
    }
}

impl AgentRepository for FsAgentRepository {
    fn discover(&self) -> StoreResult<Discovery> {
        let (discovery, _) = self.scan()?;
        for issue in &discovery.issues {
            tracing::warn!(
                event = issue.kind.event(),
                path = %issue.dir.display(),
                error = %issue.message,
                "agent resume problem"
            );
        }
        Ok(discovery)
    }

    fn create(&self, resume: &Resume) -> ResumeResult<Agent> {
        let problems = resume.problems();
        if !problems.is_empty() {
            return Err(ResumeError::Invalid {
                path: resume.name.clone(),
                problems,
            });
        }
        if resume.name == TEMPLATE_DIR {
            return Err(ResumeError::InvalidName {
                name: resume.name.clone(),
                reason: "reserved for the agent template, which discovery skips".into(),
            });
        }
        if self.find(&resume.name)?.is_some() {
            return Err(ResumeError::AlreadyExists {
                name: resume.name.clone(),
            });
        }

        let agent_paths = self
            .paths
            .agent(&resume.name)
            .map_err(|e| ResumeError::InvalidName {
                name: resume.name.clone(),
                reason: e.to_string(),
            })?;
        if agent_paths.resume_file().exists() {
            return Err(ResumeError::AlreadyExists {
                name: resume.name.clone(),
            });
        }
        agent_paths.ensure_dirs()?;
        write_json_atomic(&agent_paths.resume_file(), resume)?;

        tracing::info!(agent = %resume.name, path = %agent_paths.dir.display(), "agent created");
        Agent::from_resume(resume, agent_paths.dir, &self.defaults)
    }

    fn validate(&self) -> StoreResult<Vec<ResumeIssue>> {
        let (discovery, resumes) = self.scan()?;
        let mut issues = discovery.issues;
        for (index, resume) in resumes {
            let agent = &discovery.agents[index];
            for problem in resume.problems() {
                issues.push(ResumeIssue {
                    dir: agent.dir.clone(),
                    kind: IssueKind::Advisory,
                    message: problem,
                });
            }
        }
        Ok(issues)
    }
}
