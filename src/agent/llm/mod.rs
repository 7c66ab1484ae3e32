//! Model Invoker boundary.
//!
//! The engine hands an invoker an ordered list of role-tagged text blocks and
//! gets raw text back; what the text means is the contract parser's business.
//! [`OllamaInvoker`] talks to a local Ollama server; [`ResilientInvoker`]
//! wraps any invoker with retry and a circuit breaker.

pub mod resilient;

pub use resilient::{CircuitState, ResilientInvoker, RetryPolicy};

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ModelConfig;

/// Errors from the model invoker.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ProviderError {
    #[error("model server is not reachable at {url}: {message}")]
    #[diagnostic(
        code(lemming::provider::unavailable),
        help("Start Ollama with `ollama serve`, or point [model].base_url at a running server.")
    )]
    Unavailable { url: String, message: String },

    #[error("model request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(lemming::provider::timeout),
        help("Increase [model].timeout_secs or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },

    #[error("model server returned status {status}: {message}")]
    #[diagnostic(
        code(lemming::provider::status),
        help("Check that the model is pulled (`ollama pull <model>`) and the request is valid.")
    )]
    Status { status: u16, message: String },

    #[error("failed to parse model response: {message}")]
    #[diagnostic(
        code(lemming::provider::parse_error),
        help("The model server returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("model circuit is open; calls are suspended for {cooldown_secs}s after repeated failures")]
    #[diagnostic(
        code(lemming::provider::circuit_open),
        help("The model server failed repeatedly. Calls resume automatically after the cooldown.")
    )]
    CircuitOpen { cooldown_secs: u64 },

    #[error("model call failed after {attempts} attempt(s): {last}")]
    #[diagnostic(
        code(lemming::provider::exhausted),
        help("Every retry failed. Check the model server's health and logs.")
    )]
    Exhausted { attempts: u32, last: String },
}

impl ProviderError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::ParseError { .. } | Self::CircuitOpen { .. } | Self::Exhausted { .. } => false,
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Who a prompt block speaks as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

/// One role-tagged text block of an agent's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBlock {
    pub role: Role,
    pub content: String,
}

impl PromptBlock {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Everything an invoker needs for one agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Calling agent, for logs.
    pub agent: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub blocks: Vec<PromptBlock>,
}

/// The external collaborator that turns a context into raw decision text.
pub trait ModelInvoker: Send + Sync {
    fn invoke(&self, request: &InvocationRequest) -> ProviderResult<String>;
}

impl<T: ModelInvoker + ?Sized> ModelInvoker for Box<T> {
    fn invoke(&self, request: &InvocationRequest) -> ProviderResult<String> {
        (**self).invoke(request)
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Invoker for Ollama's `/api/chat`.
pub struct OllamaInvoker {
    base_url: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl OllamaInvoker {
    pub fn new(config: &ModelConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn map_error(&self, error: ureq::Error) -> ProviderError {
        match error {
            ureq::Error::Status(status, resp) => ProviderError::Status {
                status,
                message: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => {
                let message = transport.to_string();
                if message.contains("timed out") {
                    ProviderError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    ProviderError::Unavailable {
                        url: self.base_url.clone(),
                        message,
                    }
                }
            }
        }
    }
}

/// JSON body for one `/api/chat` request.
fn chat_body(request: &InvocationRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .blocks
        .iter()
        .map(|b| serde_json::json!({"role": b.role.as_str(), "content": b.content}))
        .collect();
    let mut options = serde_json::json!({"temperature": request.temperature});
    if let Some(max_tokens) = request.max_tokens {
        options["num_predict"] = max_tokens.into();
    }
    serde_json::json!({
        "model": request.model,
        "messages": messages,
        "stream": false,
        "format": "json",
        "options": options,
    })
}

/// Pull the assistant text out of a `/api/chat` response body.
fn parse_chat_response(body: &str) -> ProviderResult<String> {
    let json: serde_json::Value = serde_json::from_str(body).map_err(|e| ProviderError::ParseError {
        message: e.to_string(),
    })?;
    json["message"]["content"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ProviderError::ParseError {
            message: "missing 'message.content' field".into(),
        })
}

impl ModelInvoker for OllamaInvoker {
    fn invoke(&self, request: &InvocationRequest) -> ProviderResult<String> {
        let body = chat_body(request);
        tracing::debug!(agent = %request.agent, model = %request.model, blocks = request.blocks.len(), "invoking model");
        let resp = self
            .agent
            .post(&self.chat_url())
            .send_json(body)
            .map_err(|e| self.map_error(e))?;
        let text = resp.into_string().map_err(|e| ProviderError::ParseError {
            message: e.to_string(),
        })?;
        parse_chat_response(&text)
    }
}

impl std::fmt::Debug for OllamaInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaInvoker")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InvocationRequest {
        InvocationRequest {
            agent: "planner".into(),
            model: "llama3.2".into(),
            temperature: 0.2,
            max_tokens: Some(256),
            blocks: vec![PromptBlock::system("be brief"), PromptBlock::user("hi")],
        }
    }

    #[test]
    fn body_carries_blocks_in_order() {
        let body = chat_body(&request());
        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["options"]["num_predict"], 256);
    }

    #[test]
    fn response_content_is_extracted() {
        let text = parse_chat_response(r#"{"message": {"role": "assistant", "content": "{}"}}"#).unwrap();
        assert_eq!(text, "{}");
        assert!(matches!(
            parse_chat_response(r#"{"done": true}"#),
            Err(ProviderError::ParseError { .. })
        ));
    }

    #[test]
    fn unreachable_server_is_retryable_error() {
        let config = ModelConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..ModelConfig::default()
        };
        let err = OllamaInvoker::new(&config).invoke(&request()).unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[test]
    fn retryability() {
        let status = |status| ProviderError::Status {
            status,
            message: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!ProviderError::CircuitOpen { cooldown_secs: 1 }.is_retryable());
    }
}
