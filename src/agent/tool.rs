//! Tool system: trait-based tools with runtime registration.
//!
//! Tools are an agent's only way to cause side effects beyond its outbox and
//! memory. Each tool implements the [`Tool`] trait and is registered in a
//! [`ToolRegistry`]; the [`ToolDispatcher`] mediates every call:
//!
//! 1. the tool must be in the calling agent's `permissions.tools`;
//! 2. every [`ParamKind::Path`] argument is resolved through the agent's
//!    [`PathSandbox`] before the tool sees it;
//! 3. the tool runs, and any error becomes a failed [`ToolResult`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::repository::AgentRepository;
use crate::agent::resume::Agent;
use crate::config::ToolLimits;
use crate::memory::MemoryStore;
use crate::sandbox::{PathSandbox, SECURITY_TARGET};

use super::error::{ToolError, ToolOutcome};

/// How the dispatcher treats a parameter before the tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Free-form string.
    Text,
    /// Filesystem path; resolved through the sandbox.
    Path,
    /// Any JSON value.
    Json,
    /// Integer.
    Integer,
    /// List of strings.
    List,
}

/// Description of a tool's interface.
#[derive(Debug, Clone)]
pub struct ToolSignature {
    /// Unique name of the tool.
    pub name: String,
    /// What this tool does.
    pub description: String,
    /// Parameters the tool accepts.
    pub parameters: Vec<ToolParam>,
}

/// A single parameter in a tool's signature.
#[derive(Debug, Clone)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub kind: ParamKind,
}

impl ToolParam {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            kind,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// A tool call as requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Input to a tool execution: raw arguments plus sandbox-resolved paths.
#[derive(Debug, Clone, Default)]
pub struct ToolInput {
    args: Map<String, Value>,
    paths: HashMap<String, PathBuf>,
}

impl ToolInput {
    pub fn new(args: Map<String, Value>) -> Self {
        Self {
            args,
            paths: HashMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    /// A string parameter; numbers and booleans are accepted in text form.
    pub fn get(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Get a required string parameter.
    pub fn require(&self, name: &str, tool: &str) -> ToolOutcome<String> {
        self.get(name).ok_or_else(|| ToolError::MissingParam {
            tool: tool.into(),
            name: name.into(),
        })
    }

    pub fn integer(&self, name: &str, tool: &str) -> ToolOutcome<Option<i64>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64()),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(tool, name, "expected an integer")),
            Some(_) => Err(invalid(tool, name, "expected an integer")),
        }
    }

    /// A list of strings; a single string is treated as a one-element list.
    pub fn list(&self, name: &str, tool: &str) -> ToolOutcome<Option<Vec<String>>> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .map(Some)
                .ok_or_else(|| invalid(tool, name, "expected a list of strings")),
            Some(_) => Err(invalid(tool, name, "expected a list of strings")),
        }
    }

    /// The sandbox-resolved path for a [`ParamKind::Path`] parameter.
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    pub fn require_path(&self, name: &str, tool: &str) -> ToolOutcome<&Path> {
        self.path(name).ok_or_else(|| ToolError::MissingParam {
            tool: tool.into(),
            name: name.into(),
        })
    }
}

fn invalid(tool: &str, name: &str, message: &str) -> ToolError {
    ToolError::InvalidParam {
        tool: tool.into(),
        name: name.into(),
        message: message.into(),
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    /// Create a failed output.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// A failed output that still carries captured output.
    pub fn failed_with_output(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Some(output.into()),
            error: Some(error.into()),
        }
    }
}

/// Everything a tool may touch during one call.
pub struct ToolContext<'a> {
    pub agent: &'a Agent,
    pub tick: u64,
    pub sandbox: &'a PathSandbox,
    pub memory: &'a dyn MemoryStore,
    pub agents: &'a dyn AgentRepository,
    pub limits: &'a ToolLimits,
}

/// A tool an agent can execute.
pub trait Tool: Send + Sync {
    /// Describe this tool's interface.
    fn signature(&self) -> ToolSignature;

    /// Execute the tool. Path parameters are already sandbox-resolved.
    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. If a tool with the same name exists, it is replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let sig = tool.signature();
        self.tools.insert(sig.name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|b| b.as_ref())
    }

    /// All registered tool signatures, sorted by name.
    pub fn list(&self) -> Vec<ToolSignature> {
        self.tools.values().map(|t| t.signature()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Mediates every tool call: permission, sandbox, execution.
#[derive(Debug)]
pub struct ToolDispatcher {
    registry: ToolRegistry,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Dispatcher over the full built-in catalog.
    pub fn with_builtin_tools() -> Self {
        Self::new(super::tools::builtin_registry())
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Signatures of the tools `agent` may call.
    pub fn available_to(&self, agent: &Agent) -> Vec<ToolSignature> {
        self.registry
            .list()
            .into_iter()
            .filter(|sig| agent.can_use(&sig.name))
            .collect()
    }

    /// Run one call on behalf of `ctx.agent`. Never fails: every problem
    /// becomes a failed result.
    pub fn invoke(&self, ctx: &ToolContext<'_>, call: &ToolCall) -> ToolResult {
        match self.try_invoke(ctx, call) {
            Ok(result) => {
                tracing::info!(
                    agent = %ctx.agent.name,
                    tick = ctx.tick,
                    tool = %call.tool,
                    success = result.success,
                    "tool executed"
                );
                result
            }
            Err(e) => {
                if !matches!(
                    e,
                    ToolError::PermissionDenied { .. }
                        | ToolError::Sandbox(_)
                        | ToolError::CommandRejected { .. }
                ) {
                    tracing::warn!(
                        agent = %ctx.agent.name,
                        tick = ctx.tick,
                        tool = %call.tool,
                        error = %e,
                        "tool failed"
                    );
                }
                ToolResult::err(e.to_string())
            }
        }
    }

    fn try_invoke(&self, ctx: &ToolContext<'_>, call: &ToolCall) -> ToolOutcome<ToolResult> {
        if !ctx.agent.can_use(&call.tool) {
            tracing::warn!(
                target: SECURITY_TARGET,
                event = "tool_denied",
                agent = %ctx.agent.name,
                tick = ctx.tick,
                tool = %call.tool,
                "tool not in agent's allowlist"
            );
            return Err(ToolError::PermissionDenied {
                agent: ctx.agent.name.clone(),
                tool: call.tool.clone(),
            });
        }

        let tool = self
            .registry
            .get(&call.tool)
            .ok_or_else(|| ToolError::NotFound {
                name: call.tool.clone(),
            })?;
        let signature = tool.signature();

        let mut input = ToolInput::new(call.args.clone());
        for param in &signature.parameters {
            if param.required && input.value(&param.name).is_none() {
                return Err(ToolError::MissingParam {
                    tool: signature.name.clone(),
                    name: param.name.clone(),
                });
            }
            if param.kind != ParamKind::Path {
                continue;
            }
            let Some(raw) = input.value(&param.name) else {
                continue;
            };
            let raw = raw
                .as_str()
                .ok_or_else(|| invalid(&signature.name, &param.name, "expected a path string"))?;
            let resolved = ctx.sandbox.resolve(raw)?;
            input.paths.insert(param.name.clone(), resolved);
        }

        tool.execute(ctx, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::repository::FsAgentRepository;
    use crate::agent::resume::Resume;
    use crate::config::CreditDefaults;
    use crate::memory::FsMemoryStore;
    use crate::paths::BasePaths;

    struct EchoPathTool;
    impl Tool for EchoPathTool {
        fn signature(&self) -> ToolSignature {
            ToolSignature {
                name: "echo_path".into(),
                description: "A test tool".into(),
                parameters: vec![ToolParam::required("path", ParamKind::Path, "a path")],
            }
        }
        fn execute(&self, _ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
            let path = input.require_path("path", "echo_path")?;
            Ok(ToolResult::ok(path.display().to_string()))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        agent: Agent,
        sandbox: PathSandbox,
        memory: FsMemoryStore,
        repo: FsAgentRepository,
        limits: ToolLimits,
    }

    impl Harness {
        fn new(tools: &[&str]) -> Self {
            let dir = tempfile::TempDir::new().unwrap();
            let paths = BasePaths::new(dir.path());
            let mut resume = Resume::new("worker", "work");
            resume.permissions.tools = tools.iter().map(|s| s.to_string()).collect();
            let agent = Agent::from_resume(
                &resume,
                paths.agents_dir.join("worker"),
                &CreditDefaults::default(),
            )
            .unwrap();
            let sandbox =
                PathSandbox::new("worker", agent.paths().workspace_dir(), &paths.shared_dir).unwrap();
            Self {
                agent,
                sandbox,
                memory: FsMemoryStore::new(1024),
                repo: FsAgentRepository::new(paths, CreditDefaults::default()),
                limits: ToolLimits::default(),
                _dir: dir,
            }
        }

        fn ctx(&self) -> ToolContext<'_> {
            ToolContext {
                agent: &self.agent,
                tick: 0,
                sandbox: &self.sandbox,
                memory: &self.memory,
                agents: &self.repo,
                limits: &self.limits,
            }
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoPathTool));
        ToolDispatcher::new(registry)
    }

    fn call(path: &str) -> ToolCall {
        let mut args = Map::new();
        args.insert("path".into(), Value::String(path.into()));
        ToolCall {
            tool: "echo_path".into(),
            args,
        }
    }

    #[test]
    fn register_and_list() {
        let d = dispatcher();
        assert_eq!(d.registry().len(), 1);
        assert_eq!(d.registry().list()[0].name, "echo_path");
        assert!(d.registry().get("nonexistent").is_none());
    }

    #[test]
    fn unpermitted_tool_is_denied() {
        let h = Harness::new(&[]);
        let result = dispatcher().invoke(&h.ctx(), &call("a.txt"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("permission denied"));
        assert!(dispatcher().available_to(&h.agent).is_empty());
    }

    #[test]
    fn path_params_are_resolved_before_execution() {
        let h = Harness::new(&["echo_path"]);
        let result = dispatcher().invoke(&h.ctx(), &call("sub/a.txt"));
        assert!(result.success);
        assert!(result.output.unwrap().ends_with("workspace/sub/a.txt"));
    }

    #[test]
    fn escaping_path_never_reaches_the_tool() {
        let h = Harness::new(&["echo_path"]);
        let result = dispatcher().invoke(&h.ctx(), &call("../../../../etc/passwd"));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("outside the sandbox"));
    }

    #[test]
    fn missing_required_param_fails() {
        let h = Harness::new(&["echo_path"]);
        let empty = ToolCall {
            tool: "echo_path".into(),
            args: Map::new(),
        };
        let result = dispatcher().invoke(&h.ctx(), &empty);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required parameter"));
    }

    #[test]
    fn allowlisted_but_unknown_tool_fails() {
        let h = Harness::new(&["ghost"]);
        let ghost = ToolCall {
            tool: "ghost".into(),
            args: Map::new(),
        };
        let result = dispatcher().invoke(&h.ctx(), &ghost);
        assert!(result.error.unwrap().contains("tool not found"));
    }

    #[test]
    fn input_accessors() {
        let input = ToolInput::default()
            .with_param("n", 5)
            .with_param("s", "7")
            .with_param("l", serde_json::json!(["a", "b"]));
        assert_eq!(input.get("n").as_deref(), Some("5"));
        assert_eq!(input.integer("s", "t").unwrap(), Some(7));
        assert_eq!(input.list("l", "t").unwrap().unwrap(), vec!["a", "b"]);
        assert_eq!(input.list("missing", "t").unwrap(), None);
    }
}
