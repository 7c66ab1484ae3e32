//! Built-in tool catalog: file I/O, restricted command execution, memory
//! access, and agent introspection/creation.

pub mod agent_management;
pub mod file_io;
pub mod memory_access;
pub mod shell_exec;

pub use agent_management::{CreateAgentTool, ListAgentsTool};
pub use file_io::{FileListTool, FileReadTool, FileWriteTool};
pub use memory_access::{MemoryReadTool, MemoryWriteTool};
pub use shell_exec::ShellExecTool;

use super::tool::ToolRegistry;

/// Registry holding every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(FileReadTool));
    registry.register(Box::new(FileWriteTool));
    registry.register(Box::new(FileListTool));
    registry.register(Box::new(ShellExecTool));
    registry.register(Box::new(MemoryReadTool));
    registry.register(Box::new(MemoryWriteTool));
    registry.register(Box::new(ListAgentsTool));
    registry.register(Box::new(CreateAgentTool));
    registry
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::agent::repository::{AgentRepository, FsAgentRepository};
    use crate::agent::resume::{Agent, Resume};
    use crate::agent::tool::{ToolCall, ToolContext, ToolDispatcher, ToolResult};
    use crate::config::{CreditDefaults, ToolLimits};
    use crate::memory::FsMemoryStore;
    use crate::paths::BasePaths;
    use crate::sandbox::PathSandbox;

    /// One agent named `worker` with the given tools, on a fresh base dir.
    pub struct Harness {
        _dir: tempfile::TempDir,
        pub paths: BasePaths,
        pub agent: Agent,
        pub sandbox: PathSandbox,
        pub memory: FsMemoryStore,
        pub repo: FsAgentRepository,
        pub limits: ToolLimits,
        dispatcher: ToolDispatcher,
    }

    impl Harness {
        pub fn new(tools: &[&str]) -> Self {
            let dir = tempfile::TempDir::new().unwrap();
            let paths = BasePaths::new(dir.path().canonicalize().unwrap());
            paths.ensure_dirs().unwrap();
            let repo = FsAgentRepository::new(paths.clone(), CreditDefaults::default());

            let mut resume = Resume::new("worker", "do the work");
            resume.permissions.tools = tools.iter().map(|s| s.to_string()).collect();
            let agent = repo.create(&resume).unwrap();
            let sandbox =
                PathSandbox::new("worker", agent.paths().workspace_dir(), &paths.shared_dir).unwrap();
            let limits = ToolLimits::default();

            Self {
                _dir: dir,
                paths,
                agent,
                sandbox,
                memory: FsMemoryStore::new(limits.max_memory_value_bytes),
                repo,
                limits,
                dispatcher: ToolDispatcher::with_builtin_tools(),
            }
        }

        pub fn call(&self, tool: &str, args: serde_json::Value) -> ToolResult {
            let ctx = ToolContext {
                agent: &self.agent,
                tick: 1,
                sandbox: &self.sandbox,
                memory: &self.memory,
                agents: &self.repo,
                limits: &self.limits,
            };
            let call = ToolCall {
                tool: tool.into(),
                args: args.as_object().cloned().unwrap_or_default(),
            };
            self.dispatcher.invoke(&ctx, &call)
        }
    }
}
