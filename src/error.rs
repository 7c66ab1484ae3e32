//! Rich diagnostic error types for the lemming engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so operators know exactly what went wrong
//! and how to fix it. Most of these never escape a tick: the orchestrator turns
//! them into logged, per-agent outcomes. Only [`StoreError`] coming out of the
//! tick boundary is fatal.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the lemming engine.
#[derive(Debug, Error, Diagnostic)]
pub enum LemmingError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resume(#[from] ResumeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] crate::paths::PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] crate::agent::llm::ProviderError),
}

/// Convenience alias for engine-level operations.
pub type LemmingResult<T> = std::result::Result<T, LemmingError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    #[diagnostic(
        code(lemming::store::io),
        help(
            "A filesystem operation failed. Check that the base directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {what}: {message}")]
    #[diagnostic(
        code(lemming::store::encode),
        help("The record could not be serialized. This is a bug; please report it.")
    )]
    Encode { what: String, message: String },

    #[error("failed to decode {path}: {message}")]
    #[diagnostic(
        code(lemming::store::decode),
        help(
            "The file exists but is not valid JSON for this record type. \
             Restore it from a backup or delete it to start fresh."
        )
    )]
    Decode { path: String, message: String },

    #[error("engine already running (pid {pid}, lock {path})")]
    #[diagnostic(
        code(lemming::store::locked),
        help(
            "Only one orchestrator may write to a base directory at a time. \
             Stop the other process, or delete the lock file if it is stale."
        )
    )]
    Locked { pid: u32, path: String },

    #[error("unknown agent: \"{name}\"")]
    #[diagnostic(
        code(lemming::store::unknown_agent),
        help("List known agents with `lemming agents`.")
    )]
    UnknownAgent { name: String },
}

impl StoreError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Convenience alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Resume (configuration) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResumeError {
    #[error("invalid agent name \"{name}\": {reason}")]
    #[diagnostic(
        code(lemming::resume::invalid_name),
        help("Agent names must be non-empty and must not contain path separators or be '.'/'..'.")
    )]
    InvalidName { name: String, reason: String },

    #[error("malformed resume {path}: {message}")]
    #[diagnostic(
        code(lemming::resume::malformed),
        help("Check the resume against the documented schema (name, schedule, permissions, instructions).")
    )]
    Malformed { path: String, message: String },

    #[error("resume {path} is invalid: {}", problems.join("; "))]
    #[diagnostic(
        code(lemming::resume::invalid),
        help("Fix each listed problem, then run `lemming validate` again.")
    )]
    Invalid { path: String, problems: Vec<String> },

    #[error("agent \"{name}\" already exists")]
    #[diagnostic(
        code(lemming::resume::already_exists),
        help("Pick a different name; agent names are unique identifiers.")
    )]
    AlreadyExists { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Layout(#[from] crate::paths::PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for resume operations.
pub type ResumeResult<T> = std::result::Result<T, ResumeError>;

// ---------------------------------------------------------------------------
// Sandbox errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SandboxError {
    #[error("access denied: \"{requested}\" resolves outside the sandbox")]
    #[diagnostic(
        code(lemming::sandbox::outside),
        help("Tools may only touch the agent's workspace directory and the shared directory.")
    )]
    OutsideSandbox { requested: String, resolved: String },

    #[error("access denied: \"{requested}\" escapes the sandbox through a symbolic link")]
    #[diagnostic(
        code(lemming::sandbox::symlink_escape),
        help("A symbolic link inside the sandbox points outside of it. Remove the link.")
    )]
    SymlinkEscape { requested: String, target: String },

    #[error("access denied: \"{requested}\" is not a valid path")]
    #[diagnostic(
        code(lemming::sandbox::invalid_path),
        help("Paths must be non-empty and must not contain NUL bytes.")
    )]
    InvalidPath { requested: String },

    #[error("sandbox root {root} is unavailable: {source}")]
    #[diagnostic(
        code(lemming::sandbox::root_unavailable),
        help("The workspace or shared directory could not be created or canonicalized.")
    )]
    RootUnavailable {
        root: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for sandbox resolution.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

// ---------------------------------------------------------------------------
// Memory errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("invalid memory key \"{key}\": {reason}")]
    #[diagnostic(
        code(lemming::memory::invalid_key),
        help("Memory keys may only contain ASCII letters, digits, '_' and '-'.")
    )]
    InvalidKey { key: String, reason: String },

    #[error("type mismatch for memory key \"{key}\": {operation} expects {expected}, found {found}")]
    #[diagnostic(
        code(lemming::memory::type_mismatch),
        help("Use `set` to replace the value, or send a value of the expected type.")
    )]
    TypeMismatch {
        key: String,
        operation: String,
        expected: String,
        found: String,
    },

    #[error("memory value for \"{key}\" is {size} bytes, limit is {limit}")]
    #[diagnostic(
        code(lemming::memory::too_large),
        help("Store large content in the workspace with file_write and keep a reference in memory.")
    )]
    TooLarge { key: String, size: usize, limit: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Short JSON type name used in diagnostics.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "mapping",
    }
}
