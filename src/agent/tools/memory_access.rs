//! Memory tools: read and update the calling agent's own key/value memory.

use crate::agent::error::{ToolError, ToolOutcome};
use crate::agent::tool::{ParamKind, Tool, ToolContext, ToolInput, ToolParam, ToolResult, ToolSignature};
use crate::memory::MemoryOp;

pub struct MemoryReadTool;

impl Tool for MemoryReadTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "memory_read".into(),
            description: "Read one key from your own memory.".into(),
            parameters: vec![ToolParam::required("key", ParamKind::Text, "Memory key ([A-Za-z0-9_-]+).")],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let key = input.require("key", "memory_read")?;
        match ctx.memory.load(ctx.agent, &key)? {
            Some(record) => {
                let rendered = serde_json::to_string_pretty(&record.value)
                    .unwrap_or_else(|_| record.value.to_string());
                Ok(ToolResult::ok(rendered))
            }
            None => Ok(ToolResult::err(format!("no memory stored under \"{key}\""))),
        }
    }
}

pub struct MemoryWriteTool;

impl Tool for MemoryWriteTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "memory_write".into(),
            description: "Update one key in your own memory. op: set (default) overwrites, \
                          append adds to a list, merge shallow-updates a mapping."
                .into(),
            parameters: vec![
                ToolParam::required("key", ParamKind::Text, "Memory key ([A-Za-z0-9_-]+)."),
                ToolParam::required("value", ParamKind::Json, "Any JSON value."),
                ToolParam::optional("op", ParamKind::Text, "set | append | merge"),
            ],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let key = input.require("key", "memory_write")?;
        let value = input
            .value("value")
            .cloned()
            .ok_or_else(|| ToolError::MissingParam {
                tool: "memory_write".into(),
                name: "value".into(),
            })?;
        let op = match input.get("op") {
            Some(raw) => raw.parse::<MemoryOp>().map_err(|message| ToolError::InvalidParam {
                tool: "memory_write".into(),
                name: "op".into(),
                message,
            })?,
            None => MemoryOp::Set,
        };

        let record = ctx.memory.save(ctx.agent, &key, value, op, ctx.tick)?;
        Ok(ToolResult::ok(format!("Memory \"{}\" updated ({})", record.key, record.operation)))
    }
}
