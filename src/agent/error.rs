//! Agent-layer error types with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::{MemoryError, ResumeError, SandboxError, StoreError};

use super::llm::ProviderError;

/// Errors raised while a tool runs. The dispatcher turns every one of these
/// into a failed `ToolResult`; none escapes the agent's turn.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("tool not found: \"{name}\"")]
    #[diagnostic(
        code(lemming::tool::not_found),
        help("Only tools from the built-in catalog can be called. Check the tool list in the prompt.")
    )]
    NotFound { name: String },

    #[error("permission denied: agent \"{agent}\" may not use tool \"{tool}\"")]
    #[diagnostic(
        code(lemming::tool::permission_denied),
        help("Add the tool to permissions.tools in the agent's resume.")
    )]
    PermissionDenied { agent: String, tool: String },

    #[error("{tool}: missing required parameter \"{name}\"")]
    #[diagnostic(
        code(lemming::tool::missing_param),
        help("Pass every required parameter in the tool call's args.")
    )]
    MissingParam { tool: String, name: String },

    #[error("{tool}: invalid parameter \"{name}\": {message}")]
    #[diagnostic(
        code(lemming::tool::invalid_param),
        help("Check the parameter's expected type in the tool list.")
    )]
    InvalidParam {
        tool: String,
        name: String,
        message: String,
    },

    #[error("{tool}: command rejected: {reason}")]
    #[diagnostic(
        code(lemming::tool::command_rejected),
        help(
            "Only allowlisted executables run, without a shell. Flags must be listed in the \
             executable's allowed_flags; interpreters and shells are never allowed."
        )
    )]
    CommandRejected { tool: String, reason: String },

    #[error("{tool}: {message}")]
    #[diagnostic(
        code(lemming::tool::execution),
        help("The tool encountered an error. Check the inner cause for details.")
    )]
    Execution { tool: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for tool execution.
pub type ToolOutcome<T> = std::result::Result<T, ToolError>;

/// Failure of one agent's turn. Caught at the per-agent boundary, logged with
/// its [`kind`](AgentRunError::kind), and never propagated past the tick.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentRunError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl AgentRunError {
    /// Stable error-kind label for logs and tick reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider_failure",
            Self::Sandbox(_) => "sandbox_unavailable",
            Self::Memory(_) => "memory",
            Self::Store(_) => "storage",
        }
    }
}

/// Convenience alias for one agent's turn.
pub type AgentRunResult<T> = std::result::Result<T, AgentRunError>;
