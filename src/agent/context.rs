//! BuildContext: the role-tagged prompt blocks an agent sees each turn.
//!
//! Block order is fixed: identity and instructions, the output contract with
//! the agent's tools, its memory snapshot, then its inbox.

use crate::config::ModelConfig;
use crate::memory::{MemoryRecord, render_snapshot};
use crate::outbox::{OutboxEntry, render_inbox};

use super::llm::{InvocationRequest, PromptBlock};
use super::resume::Agent;
use super::tool::{ParamKind, ToolSignature};

const CONTRACT_TEXT: &str = "Respond with a single JSON object with these keys:
  \"outbox_entries\": list of {\"kind\": string, \"payload\": any JSON, \"tags\": [string], \"recipients\": [string]}
  \"tool_calls\": list of {\"tool\": string, \"args\": object}
  \"memory_updates\": list of {\"key\": string, \"value\": any JSON, \"op\": \"set\" | \"append\" | \"merge\"}
  \"notes\": string
Omit nothing; use empty lists when there is nothing to do.";

/// Inputs for one agent's context.
pub struct ContextInputs<'a> {
    pub agent: &'a Agent,
    pub tick: u64,
    pub memory: &'a [MemoryRecord],
    pub inbox: &'a [OutboxEntry],
    pub tools: &'a [ToolSignature],
    pub inbox_max_chars: usize,
}

fn kind_label(kind: ParamKind) -> &'static str {
    match kind {
        ParamKind::Text => "string",
        ParamKind::Path => "path",
        ParamKind::Json => "json",
        ParamKind::Integer => "integer",
        ParamKind::List => "list",
    }
}

/// One line per tool: `name(param: kind, [optional: kind]) - description`.
pub fn render_tools(tools: &[ToolSignature]) -> String {
    if tools.is_empty() {
        return "You have no tools.".to_string();
    }
    let mut out = String::from("TOOLS:");
    for tool in tools {
        let params: Vec<String> = tool
            .parameters
            .iter()
            .map(|p| {
                let param = format!("{}: {}", p.name, kind_label(p.kind));
                if p.required { param } else { format!("[{param}]") }
            })
            .collect();
        out.push_str(&format!("\n- {}({}) - {}", tool.name, params.join(", "), tool.description));
    }
    out
}

/// Compose the prompt blocks for one turn.
pub fn build_context(inputs: &ContextInputs<'_>) -> Vec<PromptBlock> {
    let agent = inputs.agent;
    let identity = match &agent.title {
        Some(title) => format!("You are agent \"{}\" ({title}).", agent.name),
        None => format!("You are agent \"{}\".", agent.name),
    };
    vec![
        PromptBlock::system(format!("{identity}\n\nINSTRUCTIONS:\n{}", agent.instructions)),
        PromptBlock::system(format!("{CONTRACT_TEXT}\n\n{}", render_tools(inputs.tools))),
        PromptBlock::user(render_snapshot(inputs.memory)),
        PromptBlock::user(format!(
            "Current tick: {}\n\n{}",
            inputs.tick,
            render_inbox(inputs.inbox, inputs.inbox_max_chars)
        )),
    ]
}

/// Wrap blocks into a request, applying the agent's model overrides.
pub fn build_request(agent: &Agent, blocks: Vec<PromptBlock>, model: &ModelConfig) -> InvocationRequest {
    let spec = agent.model.as_ref();
    InvocationRequest {
        agent: agent.name.clone(),
        model: spec
            .map(|m| m.key.clone())
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| model.default_model.clone()),
        temperature: spec.and_then(|m| m.temperature).unwrap_or(model.temperature),
        max_tokens: spec.and_then(|m| m.max_tokens),
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::Role;
    use crate::agent::resume::{ModelSpec, Resume};
    use crate::agent::tool::ToolParam;
    use crate::config::CreditDefaults;

    fn agent() -> Agent {
        let mut resume = Resume::new("scout", "Find things.");
        resume.title = Some("Scout".into());
        Agent::from_resume(&resume, "scout", &CreditDefaults::default()).unwrap()
    }

    #[test]
    fn blocks_are_ordered_and_tagged() {
        let agent = agent();
        let tools = vec![ToolSignature {
            name: "file_read".into(),
            description: "Read".into(),
            parameters: vec![
                ToolParam::required("path", ParamKind::Path, "p"),
                ToolParam::optional("n", ParamKind::Integer, "n"),
            ],
        }];
        let blocks = build_context(&ContextInputs {
            agent: &agent,
            tick: 7,
            memory: &[],
            inbox: &[],
            tools: &tools,
            inbox_max_chars: 1000,
        });
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].role, Role::System);
        assert!(blocks[0].content.contains("\"scout\" (Scout)"));
        assert!(blocks[0].content.ends_with("Find things."));
        assert!(blocks[1].content.contains("- file_read(path: path, [n: integer]) - Read"));
        assert_eq!(blocks[2].content, "No stored memory.");
        assert_eq!(blocks[3].role, Role::User);
        assert!(blocks[3].content.starts_with("Current tick: 7"));
        assert!(blocks[3].content.ends_with("No incoming messages."));
    }

    #[test]
    fn request_uses_agent_model_overrides() {
        let mut agent = agent();
        let config = ModelConfig::default();
        let request = build_request(&agent, vec![], &config);
        assert_eq!(request.model, "llama3.2");
        assert_eq!(request.temperature, 0.2);

        agent.model = Some(ModelSpec {
            key: "qwen2.5".into(),
            temperature: Some(0.7),
            max_tokens: Some(64),
        });
        let request = build_request(&agent, vec![], &config);
        assert_eq!(request.model, "qwen2.5");
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, Some(64));
    }

    #[test]
    fn no_tools_is_stated() {
        assert_eq!(render_tools(&[]), "You have no tools.");
    }
}
