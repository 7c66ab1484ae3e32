//! Restricted command execution.
//!
//! Commands run with argument-vector semantics: the string form is split with
//! `shlex` and handed to the executable directly, never to a shell. Only
//! executables named in `[tools.executables]` run, and never an interpreter or
//! shell. Flags must be listed in the executable's `allowed_flags`; any other
//! argument starting with `-` is rejected unless the executable opts into
//! `end_of_options`, in which case the engine inserts `--` before operands.
//! Operands that look like paths go through the sandbox. The child gets a
//! cleared environment (only `PATH`), a null stdin, the workspace as its
//! working directory, a hard timeout and capped output.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::agent::error::{ToolError, ToolOutcome};
use crate::agent::tool::{ParamKind, Tool, ToolContext, ToolInput, ToolParam, ToolResult, ToolSignature};
use crate::config::ExecutableRule;
use crate::sandbox::SECURITY_TARGET;

const TOOL: &str = "shell";

/// `PATH` given to children when the engine's own is unset.
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Programs that can run arbitrary code or other programs. Allowlisting any
/// of them would defeat every other rule here.
const INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "mksh", "csh", "tcsh", "fish", "ash", "busybox",
    "python", "pypy", "perl", "ruby", "node", "nodejs", "deno", "bun", "php", "lua", "luajit",
    "tclsh", "wish", "expect", "osascript", "pwsh", "powershell", "cmd", "awk", "gawk", "mawk",
    "nawk", "sed", "env", "xargs", "exec", "eval", "sudo", "su", "doas", "nohup", "timeout",
    "nice", "ionice", "setsid", "strace", "ssh", "script", "make", "vim", "vi", "emacs",
    "find", "tar", "git", "less", "more", "man", "watch",
];

/// Whether `name` is a general-purpose interpreter or command runner.
/// Version suffixes are ignored (`python3.12` counts as `python`).
pub fn is_interpreter(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name).to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base);
    let stem = base.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-');
    INTERPRETERS.contains(&base) || INTERPRETERS.contains(&stem)
}

fn reject(reason: impl Into<String>) -> ToolError {
    ToolError::CommandRejected {
        tool: TOOL.into(),
        reason: reason.into(),
    }
}

/// An argument vector that passed every policy check.
#[derive(Debug, PartialEq, Eq)]
struct VettedCommand {
    program: String,
    args: Vec<String>,
}

/// Split flags from operands and apply the executable's flag policy.
fn vet_arguments(program: &str, rule: &ExecutableRule, rest: &[String]) -> ToolOutcome<(Vec<String>, Vec<String>)> {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    for arg in rest {
        if rule.allowed_flags.iter().any(|f| f == arg) {
            flags.push(arg.clone());
        } else if arg.starts_with('-') {
            if !rule.end_of_options {
                return Err(reject(format!("flag \"{arg}\" is not allowed for {program}")));
            }
            operands.push(arg.clone());
        } else {
            operands.push(arg.clone());
        }
    }
    Ok((flags, operands))
}

/// Whether an operand names something on disk and must be sandboxed.
fn looks_like_path(ctx: &ToolContext<'_>, operand: &str) -> bool {
    operand.contains('/')
        || operand == "."
        || operand == ".."
        || ctx.sandbox.workspace().join(operand).symlink_metadata().is_ok()
}

fn vet(ctx: &ToolContext<'_>, argv: Vec<String>) -> ToolOutcome<VettedCommand> {
    let Some((program, rest)) = argv.split_first() else {
        return Err(reject("empty command"));
    };
    if program.contains('/') {
        return Err(reject("executables are named, not given as paths"));
    }
    if is_interpreter(program) {
        return Err(reject(format!("{program} is an interpreter or shell and never runs")));
    }
    let rule = ctx
        .limits
        .executables
        .get(program)
        .ok_or_else(|| reject(format!("{program} is not in the executable allowlist")))?;

    let (flags, operands) = vet_arguments(program, rule, rest)?;
    for operand in &operands {
        if looks_like_path(ctx, operand) {
            ctx.sandbox.resolve(operand)?;
        }
    }

    let mut args = flags;
    if rule.end_of_options && !operands.is_empty() {
        args.push("--".into());
    }
    args.extend(operands);
    Ok(VettedCommand {
        program: program.clone(),
        args,
    })
}

/// Read a pipe to the end, keeping at most `cap` bytes.
fn drain_capped(mut reader: impl Read, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

fn render_stream(label: &str, bytes: &[u8], truncated: bool) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let text = String::from_utf8_lossy(bytes);
    if truncated {
        format!("{label} (truncated at {} bytes):\n{text}\n", bytes.len())
    } else {
        format!("{label}:\n{text}\n")
    }
}

/// Run a vetted command in the agent's workspace.
fn run(ctx: &ToolContext<'_>, command: &VettedCommand) -> ToolOutcome<ToolResult> {
    let timeout = ctx.limits.command_timeout();
    let cap = ctx.limits.max_output_bytes;
    let path_var = std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into());

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(ctx.sandbox.workspace())
        .env_clear()
        .env("PATH", path_var)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolError::Execution {
            tool: TOOL.into(),
            message: format!("failed to start {}: {e}", command.program),
        })?;

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(|s| std::thread::spawn(move || drain_capped(s, cap)));
    let stderr = child.stderr.take().map(|s| std::thread::spawn(move || drain_capped(s, cap)));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Execution {
                    tool: TOOL.into(),
                    message: format!("command timed out after {}s", timeout.as_secs()),
                });
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                let _ = child.kill();
                return Err(ToolError::Execution {
                    tool: TOOL.into(),
                    message: format!("failed to wait on command: {e}"),
                });
            }
        }
    };

    let join = |h: Option<std::thread::JoinHandle<(Vec<u8>, bool)>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    let (out, out_truncated) = join(stdout);
    let (err, err_truncated) = join(stderr);

    let exit_code = status.code().unwrap_or(-1);
    let report = format!(
        "exit code: {exit_code}\n{}{}",
        render_stream("stdout", &out, out_truncated),
        render_stream("stderr", &err, err_truncated)
    );
    if status.success() {
        Ok(ToolResult::ok(report))
    } else {
        Ok(ToolResult::failed_with_output(
            report,
            format!("{} exited with code {exit_code}", command.program),
        ))
    }
}

/// Run an allowlisted executable without a shell.
pub struct ShellExecTool;

impl Tool for ShellExecTool {
    fn signature(&self) -> ToolSignature {
        ToolSignature {
            name: TOOL.into(),
            description: "Run an allowlisted executable in the workspace (no shell: pipes, \
                          redirection and substitution are not interpreted)."
                .into(),
            parameters: vec![
                ToolParam::optional("command", ParamKind::Text, "Command line, split like a POSIX shell would."),
                ToolParam::optional("argv", ParamKind::List, "Argument vector; used instead of command."),
            ],
        }
    }

    fn execute(&self, ctx: &ToolContext<'_>, input: ToolInput) -> ToolOutcome<ToolResult> {
        let argv = match input.list("argv", TOOL)? {
            Some(argv) => argv,
            None => {
                let line = input.require("command", TOOL)?;
                shlex::split(&line).ok_or_else(|| reject("unbalanced quotes in command"))?
            }
        };

        let command = vet(ctx, argv).inspect_err(|e| {
            if matches!(e, ToolError::CommandRejected { .. }) {
                tracing::warn!(
                    target: SECURITY_TARGET,
                    event = "command_rejected",
                    agent = %ctx.agent.name,
                    tick = ctx.tick,
                    error = %e,
                    "command rejected"
                );
            }
        })?;
        run(ctx, &command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::test_support::Harness;
    use serde_json::json;

    #[test]
    fn interpreters_are_recognized() {
        for name in [
            "python3", "python3.12", "/usr/bin/bash", "node", "perl5", "sh", "awk", "env",
            // -exec, --to-command, aliases and hooks, pagers with '!' escapes
            "find", "/usr/bin/tar", "git", "less", "more", "man", "watch",
        ] {
            assert!(is_interpreter(name), "{name}");
        }
        for name in ["ls", "cat", "grep", "wc", "shasum"] {
            assert!(!is_interpreter(name), "{name}");
        }
    }

    #[test]
    fn flag_policy() {
        let rule = ExecutableRule {
            allowed_flags: vec!["-l".into()],
            end_of_options: false,
        };
        let (flags, operands) = vet_arguments("ls", &rule, &["-l".into(), "dir".into()]).unwrap();
        assert_eq!(flags, vec!["-l"]);
        assert_eq!(operands, vec!["dir"]);
        assert!(vet_arguments("ls", &rule, &["-R".into()]).is_err());

        let delimited = ExecutableRule {
            allowed_flags: vec![],
            end_of_options: true,
        };
        let (_, operands) = vet_arguments("cat", &delimited, &["-n".into()]).unwrap();
        assert_eq!(operands, vec!["-n"]);
    }

    #[cfg(unix)]
    #[test]
    fn echo_runs_without_shell_expansion() {
        let h = Harness::new(&["shell"]);
        let result = h.call("shell", json!({"command": "echo hello $(whoami) `id`"}));
        assert!(result.success, "{result:?}");
        let output = result.output.unwrap();
        assert!(output.contains("hello $(whoami) `id`"));
    }

    #[test]
    fn interpreter_is_rejected_even_if_allowlisted() {
        let mut h = Harness::new(&["shell"]);
        h.limits
            .executables
            .insert("python3".into(), ExecutableRule::default());
        let result = h.call("shell", json!({"argv": ["python3", "-c", "print(1)"]}));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("interpreter"));
    }

    #[test]
    fn unlisted_executable_is_rejected() {
        let h = Harness::new(&["shell"]);
        let result = h.call("shell", json!({"command": "curl http://example.com"}));
        assert!(result.error.unwrap().contains("allowlist"));
        let result = h.call("shell", json!({"command": "/bin/ls"}));
        assert!(result.error.unwrap().contains("named"));
    }

    #[test]
    fn chained_commands_do_not_smuggle_flags() {
        let h = Harness::new(&["shell"]);
        let result = h.call("shell", json!({"command": "echo hi; rm -rf ."}));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("\"-rf\""));
    }

    #[test]
    fn operands_are_sandboxed() {
        let h = Harness::new(&["shell"]);
        let result = h.call("shell", json!({"command": "cat /etc/passwd"}));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("outside the sandbox"));
        let result = h.call("shell", json!({"command": "ls ../.."}));
        assert!(!result.success);
    }

    #[cfg(unix)]
    #[test]
    fn cat_gets_null_stdin_and_workspace_cwd() {
        let h = Harness::new(&["shell"]);
        std::fs::write(h.sandbox.workspace().join("-n"), "dash file\n").unwrap();
        let result = h.call("shell", json!({"argv": ["cat", "-n"]}));
        assert!(result.success, "{result:?}");
        assert!(result.output.unwrap().contains("dash file"));

        let result = h.call("shell", json!({"command": "cat"}));
        assert!(result.success, "{result:?}");
        assert_eq!(result.output.as_deref(), Some("exit code: 0\n"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let mut h = Harness::new(&["shell"]);
        h.limits.command_timeout_secs = 1;
        h.limits
            .executables
            .insert("sleep".into(), ExecutableRule::default());
        let started = Instant::now();
        let result = h.call("shell", json!({"command": "sleep 10"}));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn output_is_capped() {
        let mut h = Harness::new(&["shell"]);
        h.limits.max_output_bytes = 4;
        let result = h.call("shell", json!({"command": "echo abcdefgh"}));
        let output = result.output.unwrap();
        assert!(output.contains("truncated at 4 bytes"));
        assert!(output.contains("abcd"));
        assert!(!output.contains("abcde"));
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let h = Harness::new(&["shell"]);
        let result = h.call("shell", json!({"command": "echo 'oops"}));
        assert!(result.error.unwrap().contains("unbalanced"));
    }
}
