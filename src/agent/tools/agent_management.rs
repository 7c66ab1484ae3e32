//! Agent management tools: list the population and create new agents.
//!
//! A created agent can never hold a tool its creator lacks, so these tools
//! cannot be used to widen anyone's capabilities.

use crate::agent::error::{ToolError, ToolOutcome};
use crate::agent::resume::{CreditsRecord, Resume, Schedule};
use crate::agent::tool::{ParamKind, Tool, ToolContext, ToolInput, ToolParam, ToolResult, ToolSignature};

// ---------------------------------------------------------------------------
// list_agents
// ---------------------------------------------------------------------------

pub struct ListAgentsTool;

impl Tool for ListAgentsTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "list_agents".into(),
            description: "List every agent with its title and schedule.".into(),
            parameters: vec![],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, _input: ToolInput) -> ToolOutcome<ToolResult> {
        let discovery = ctx.agents.discover()?;
        if discovery.agents.is_empty() {
            return Ok(ToolResult::ok("No agents."));
        }
        let lines: Vec<String> = discovery
            .agents
            .iter()
            .map(|a| {
                format!(
                    "- {} ({}): every {} tick(s), offset {}",
                    a.name,
                    a.title.as_deref().unwrap_or("untitled"),
                    a.schedule.run_every_n_ticks,
                    a.schedule.phase_offset
                )
            })
            .collect();
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// create_agent
// ---------------------------------------------------------------------------

pub struct CreateAgentTool;

const CREATE: &str = "create_agent";

impl Tool for CreateAgentTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: CREATE.into(),
            description: "Create a new agent. Requested tools must be a subset of your own.".into(),
            parameters: vec![
                ToolParam::required("name", ParamKind::Text, "Unique agent name."),
                ToolParam::required("instructions", ParamKind::Text, "Standing instructions."),
                ToolParam::optional("title", ParamKind::Text, "Human-readable title."),
                ToolParam::optional("run_every_n_ticks", ParamKind::Integer, "Firing period (default 1)."),
                ToolParam::optional("phase_offset", ParamKind::Integer, "Firing offset (default 0)."),
                ToolParam::optional("read_outboxes", ParamKind::List, "Agents whose outboxes it reads, or \"*\"."),
                ToolParam::optional("tools", ParamKind::List, "Tools it may use."),
                ToolParam::optional("max_credits", ParamKind::Text, "Credit budget (default from config)."),
            ],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let name = input.require("name", CREATE)?;
        let mut resume = Resume::new(name.trim(), input.require("instructions", CREATE)?);
        resume.title = input.get("title");
        resume.schedule = Schedule {
            run_every_n_ticks: input.integer("run_every_n_ticks", CREATE)?.unwrap_or(1),
            phase_offset: input.integer("phase_offset", CREATE)?.unwrap_or(0),
        };
        resume.permissions.read_outboxes = input.list("read_outboxes", CREATE)?.unwrap_or_default();

        let tools = input.list("tools", CREATE)?.unwrap_or_default();
        if let Some(excess) = tools.iter().find(|t| !ctx.agent.can_use(t)) {
            return Err(ToolError::PermissionDenied {
                agent: ctx.agent.name.clone(),
                tool: excess.clone(),
            });
        }
        resume.permissions.tools = tools;

        if let Some(raw) = input.get("max_credits") {
            let max_credits: f64 = raw.trim().parse().map_err(|_| ToolError::InvalidParam {
                tool: CREATE.into(),
                name: "max_credits".into(),
                message: "expected a number".into(),
            })?;
            resume.credits = Some(CreditsRecord {
                max_credits,
                soft_cap: max_credits / 2.0,
                cost_per_action: None,
            });
        }

        let agent = ctx.agents.create(&resume)?;
        tracing::info!(
            agent = %ctx.agent.name,
            tick = ctx.tick,
            created = %agent.name,
            "agent created by tool"
        );
        Ok(ToolResult::ok(format!("Created agent \"{}\"", agent.name)))
    }
}
