//! The engine-agent contract: what an agent's raw output must turn into.
//!
//! Parsing never fails. Missing keys default to empty, malformed items are
//! dropped, and text that is not a JSON object becomes a notes-only contract.
//! Everything that needed fixing is recorded in a [`ContractReport`] so the
//! caller can log a contract violation.

use serde_json::{Map, Value};

use crate::memory::MemoryOp;
use crate::outbox::OutboxDraft;

use super::tool::ToolCall;

/// Top-level keys of the contract.
pub const CONTRACT_KEYS: [&str; 4] = ["outbox_entries", "tool_calls", "memory_updates", "notes"];

/// One requested memory change.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUpdate {
    pub key: String,
    pub value: Value,
    pub op: MemoryOp,
}

/// An agent's decision for one turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineContract {
    pub outbox_entries: Vec<OutboxDraft>,
    pub tool_calls: Vec<ToolCall>,
    pub memory_updates: Vec<MemoryUpdate>,
    pub notes: String,
}

/// What parsing had to repair.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractReport {
    /// Top-level keys that were absent or unusable and got defaults.
    pub defaulted: Vec<&'static str>,
    /// Items that were dropped, with the reason.
    pub dropped: Vec<String>,
    /// The output was not a JSON object and was wrapped into `notes`.
    pub raw_text_wrapped: bool,
}

impl ContractReport {
    pub fn is_violation(&self) -> bool {
        self.raw_text_wrapped || !self.defaulted.is_empty() || !self.dropped.is_empty()
    }
}

/// Strip the first Markdown code fence, returning its body. An unclosed fence
/// runs to the end of the text. Text without a fence is returned trimmed.
pub fn strip_fences(text: &str) -> &str {
    let mut offset = 0;
    let mut body_start = None;
    for line in text.split_inclusive('\n') {
        let end = offset + line.len();
        match body_start {
            None if line.starts_with("```") => body_start = Some(end),
            Some(start) if line.starts_with("```") => return text[start..offset].trim(),
            _ => {}
        }
        offset = end;
    }
    match body_start {
        Some(start) => text[start..].trim(),
        None => text.trim(),
    }
}

/// Locate a JSON object in `text`: the whole text, or the span from the first
/// `{` to the last `}` when prose surrounds it.
fn find_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str(text) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Parse raw model output into a contract plus a repair report.
pub fn parse(raw: &str) -> (EngineContract, ContractReport) {
    let text = strip_fences(raw);
    let mut report = ContractReport::default();

    let Some(mut map) = find_object(text) else {
        report.raw_text_wrapped = true;
        report.defaulted = CONTRACT_KEYS[..3].to_vec();
        let notes = match serde_json::from_str::<Value>(text) {
            Ok(Value::String(s)) => s,
            _ => text.to_string(),
        };
        return (
            EngineContract {
                notes,
                ..EngineContract::default()
            },
            report,
        );
    };

    let contract = EngineContract {
        outbox_entries: items(&mut map, "outbox_entries", &mut report, outbox_entry),
        tool_calls: items(&mut map, "tool_calls", &mut report, tool_call),
        memory_updates: items(&mut map, "memory_updates", &mut report, memory_update),
        notes: match map.remove("notes") {
            None | Some(Value::Null) => {
                report.defaulted.push("notes");
                String::new()
            }
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        },
    };
    (contract, report)
}

/// Parse the list under `key`, dropping items `convert` rejects.
fn items<T>(
    map: &mut Map<String, Value>,
    key: &'static str,
    report: &mut ContractReport,
    convert: fn(Value) -> Result<T, String>,
) -> Vec<T> {
    let list = match map.remove(key) {
        None | Some(Value::Null) => {
            report.defaulted.push(key);
            return Vec::new();
        }
        Some(Value::Array(list)) => list,
        Some(_) => {
            report.defaulted.push(key);
            report.dropped.push(format!("{key}: expected a list"));
            return Vec::new();
        }
    };
    let mut out = Vec::with_capacity(list.len());
    for (index, item) in list.into_iter().enumerate() {
        match convert(item) {
            Ok(parsed) => out.push(parsed),
            Err(reason) => report.dropped.push(format!("{key}[{index}]: {reason}")),
        }
    }
    out
}

fn string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    }
}

fn outbox_entry(item: Value) -> Result<OutboxDraft, String> {
    let mut obj = match item {
        Value::String(text) => return Ok(OutboxDraft::new("message", serde_json::json!({ "text": text }))),
        Value::Object(obj) => obj,
        _ => return Err("expected an object".into()),
    };
    let kind = match obj.remove("kind") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
        _ => "message".into(),
    };
    let payload = match obj.remove("payload") {
        Some(payload) => payload,
        None => match obj.remove("text").or_else(|| obj.remove("content")) {
            Some(Value::String(text)) => serde_json::json!({ "text": text }),
            _ => return Err("missing payload".into()),
        },
    };
    let recipients = obj.remove("recipients").map(|v| string_list(Some(v)));
    Ok(OutboxDraft {
        kind,
        payload,
        tags: string_list(obj.remove("tags")),
        recipients,
    })
}

fn tool_call(item: Value) -> Result<ToolCall, String> {
    let Value::Object(mut obj) = item else {
        return Err("expected an object".into());
    };
    let tool = match obj.remove("tool").or_else(|| obj.remove("name")) {
        Some(Value::String(tool)) if !tool.trim().is_empty() => tool,
        _ => return Err("missing tool name".into()),
    };
    let args = match obj.remove("args").or_else(|| obj.remove("arguments")) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args,
        Some(_) => return Err(format!("{tool}: args must be an object")),
    };
    Ok(ToolCall { tool, args })
}

fn memory_update(item: Value) -> Result<MemoryUpdate, String> {
    let Value::Object(mut obj) = item else {
        return Err("expected an object".into());
    };
    let key = match obj.remove("key") {
        Some(Value::String(key)) => key,
        _ => return Err("missing key".into()),
    };
    let value = obj.remove("value").ok_or_else(|| format!("{key}: missing value"))?;
    let op = match obj.remove("op").or_else(|| obj.remove("operation")) {
        None | Some(Value::Null) => MemoryOp::Set,
        Some(Value::String(op)) => op.parse().map_err(|e| format!("{key}: {e}"))?,
        Some(_) => return Err(format!("{key}: op must be a string")),
    };
    Ok(MemoryUpdate { key, value, op })
}
