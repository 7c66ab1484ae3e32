//! File tools: read, write and list inside the agent's sandbox.
//!
//! Paths arrive already resolved by the dispatcher, so these tools never see
//! a location outside the workspace or shared roots.

use crate::agent::error::{ToolError, ToolOutcome};
use crate::agent::tool::{ParamKind, Tool, ToolContext, ToolInput, ToolParam, ToolResult, ToolSignature};
use crate::error::StoreError;
use crate::store::write_atomic;

fn execution(tool: &str, message: impl Into<String>) -> ToolError {
    ToolError::Execution {
        tool: tool.into(),
        message: message.into(),
    }
}

// ===========================================================================
// FileReadTool
// ===========================================================================

pub struct FileReadTool;

impl Tool for FileReadTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "file_read".into(),
            description: "Read a UTF-8 text file from the workspace or shared directory.".into(),
            parameters: vec![ToolParam::required(
                "path",
                ParamKind::Path,
                "File path, relative to the workspace.",
            )],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let path = input.require_path("path", "file_read")?;
        let meta = std::fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
        if meta.is_dir() {
            return Err(execution("file_read", "path is a directory; use file_list"));
        }
        let limit = ctx.limits.max_file_read_bytes;
        if meta.len() > limit as u64 {
            return Err(execution(
                "file_read",
                format!("file is {} bytes, limit is {limit}", meta.len()),
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| execution("file_read", "file is not valid UTF-8 text"))?;
        Ok(ToolResult::ok(content))
    }
}

// ===========================================================================
// FileWriteTool
// ===========================================================================

pub struct FileWriteTool;

impl Tool for FileWriteTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "file_write".into(),
            description: "Write (replace) a text file in the workspace or shared directory. \
                          Parent directories are created."
                .into(),
            parameters: vec![
                ToolParam::required("path", ParamKind::Path, "File path, relative to the workspace."),
                ToolParam::required("content", ParamKind::Text, "Full file content."),
            ],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let path = input.require_path("path", "file_write")?;
        let content = input.require("content", "file_write")?;

        let limit = ctx.limits.max_file_write_bytes;
        if content.len() > limit {
            return Err(execution(
                "file_write",
                format!("content is {} bytes, limit is {limit}", content.len()),
            ));
        }
        if path.is_dir() {
            return Err(execution("file_write", "path is a directory"));
        }

        write_atomic(path, content.as_bytes())?;
        Ok(ToolResult::ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            ctx.sandbox.display_path(path)
        )))
    }
}

// ===========================================================================
// FileListTool
// ===========================================================================

pub struct FileListTool;

impl Tool for FileListTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: "file_list".into(),
            description: "List a directory. Directories are suffixed with '/'.".into(),
            parameters: vec![ToolParam::optional(
                "path",
                ParamKind::Path,
                "Directory, relative to the workspace (default: the workspace).",
            )],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let dir = input.path("path").unwrap_or(ctx.sandbox.workspace());
        if !dir.is_dir() {
            return Err(execution("file_list", "path is not a directory"));
        }
        let entries = std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if e.file_type().is_ok_and(|t| t.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        names.sort();
        if names.is_empty() {
            return Ok(ToolResult::ok("(empty)"));
        }
        Ok(ToolResult::ok(names.join("\n")))
    }
}
