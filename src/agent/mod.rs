//! Agent layer: resumes, the engine-agent contract, context assembly, the
//! model invoker boundary, and the tool system.
//!
//! - **Resumes** (declarative agent records, re-read every tick)
//! - **Contract** (tolerant parsing of an agent's decision output)
//! - **Context** (role-tagged prompt blocks)
//! - **Tools** (trait impls with runtime registration, mediated by a dispatcher)

pub mod context;
pub mod contract;
pub mod error;
pub mod llm;
pub mod repository;
pub mod resume;
pub mod tool;
pub mod tools;

pub use context::{ContextInputs, build_context, build_request};
pub use contract::{ContractReport, EngineContract, MemoryUpdate};
pub use error::{AgentRunError, AgentRunResult, ToolError, ToolOutcome};
pub use llm::{
    InvocationRequest, ModelInvoker, OllamaInvoker, PromptBlock, ProviderError, ResilientInvoker,
    RetryPolicy, Role,
};
pub use repository::{AgentRepository, Discovery, FsAgentRepository, IssueKind, ResumeIssue};
pub use resume::{Agent, OutboxAccess, Resume, Schedule};
pub use tool::{
    ParamKind, Tool, ToolCall, ToolContext, ToolDispatcher, ToolInput, ToolParam, ToolRegistry,
    ToolResult, ToolSignature,
};
