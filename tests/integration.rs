//! End-to-end tick tests for the lemming engine.
//!
//! These drive full ticks over a temporary base directory with a scripted
//! model invoker, checking scheduling order, budget gating, contract
//! tolerance, tool mediation and memory updates together.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::json;

use lemming::agent::llm::{InvocationRequest, ModelInvoker, ProviderError, ProviderResult};
use lemming::agent::resume::{CreditsRecord, Resume};
use lemming::config::EngineConfig;
use lemming::engine::{AgentOutcome, Storage, TickEngine, TurnSummary};
use lemming::paths::BasePaths;

/// Fixed reply per agent; records each request's agent and inbox block.
#[derive(Clone, Default)]
struct Scripted {
    replies: HashMap<String, ProviderResult<String>>,
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl Scripted {
    fn reply(mut self, agent: &str, raw: serde_json::Value) -> Self {
        self.replies.insert(agent.into(), Ok(raw.to_string()));
        self
    }

    fn reply_raw(mut self, agent: &str, raw: ProviderResult<String>) -> Self {
        self.replies.insert(agent.into(), raw);
        self
    }

    fn invoked(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }

    fn inboxes_of(&self, agent: &str) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, inbox)| inbox.clone())
            .collect()
    }
}

impl ModelInvoker for Scripted {
    fn invoke(&self, request: &InvocationRequest) -> ProviderResult<String> {
        let inbox = request
            .blocks
            .last()
            .map(|b| b.content.clone())
            .unwrap_or_default();
        self.seen.lock().unwrap().push((request.agent.clone(), inbox));
        self.replies
            .get(&request.agent)
            .cloned()
            .unwrap_or_else(|| Ok(r#"{"outbox_entries": [], "tool_calls": [], "memory_updates": [], "notes": ""}"#.into()))
    }
}

struct World {
    dir: tempfile::TempDir,
    engine: TickEngine,
}

fn world(script: &Scripted, resumes: &[Resume], config: EngineConfig) -> World {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = BasePaths::new(dir.path());
    paths.ensure_dirs().unwrap();
    let storage = Storage::filesystem(&paths, &config);
    for resume in resumes {
        storage.agents.create(resume).unwrap();
    }
    let engine = TickEngine::new(paths, config, storage, Box::new(script.clone()));
    World { dir, engine }
}

fn resume(name: &str, every: i64, offset: i64) -> Resume {
    let mut r = Resume::new(name, format!("You are {name}."));
    r.schedule.run_every_n_ticks = every;
    r.schedule.phase_offset = offset;
    r
}

fn completed<'a>(outcome: Option<&'a AgentOutcome>) -> &'a TurnSummary {
    match outcome {
        Some(AgentOutcome::Completed(summary)) => summary,
        other => panic!("expected a completed turn, got {other:?}"),
    }
}

#[test]
fn agents_run_in_fire_point_order() {
    let script = Scripted::default();
    let w = world(
        &script,
        &[resume("reviewer", 3, 1), resume("planner", 2, 1), resume("coder", 1, 0)],
        EngineConfig::default(),
    );

    let first = w.engine.run_tick().unwrap();
    assert_eq!(first.tick, 0);
    assert_eq!(first.agents.len(), 1);

    let second = w.engine.run_tick().unwrap();
    let order: Vec<&str> = second.agents.iter().map(|r| r.agent.as_str()).collect();
    assert_eq!(order, vec!["coder", "planner", "reviewer"]);
    assert_eq!(script.invoked(), vec!["coder", "coder", "planner", "reviewer"]);
    assert_eq!(w.engine.current_tick(), 2);
}

#[test]
fn starved_agent_is_never_invoked() {
    let script = Scripted::default();
    let w = world(&script, &[resume("broke", 1, 0), resume("rich", 1, 0)], EngineConfig::default());

    let storage = w.engine.storage();
    let broke = storage.agents.find("broke").unwrap().unwrap();
    storage.ledger.debit(&broke, broke.credits.max_credits).unwrap();

    let report = w.engine.run_tick().unwrap();
    assert_eq!(report.outcome("broke"), Some(&AgentOutcome::Starved));
    completed(report.outcome("rich"));
    assert_eq!(script.invoked(), vec!["rich"]);
    assert_eq!(storage.ledger.account(&broke).unwrap().credits_left, 0.0);
}

#[test]
fn prose_reply_is_a_tolerated_contract_violation() {
    let script = Scripted::default()
        .reply_raw("chatty", Ok("I think we should refactor the parser.".into()));
    let w = world(&script, &[resume("chatty", 1, 0), resume("quiet", 1, 0)], EngineConfig::default());

    let report = w.engine.run_tick().unwrap();
    let summary = completed(report.outcome("chatty"));
    assert!(summary.contract_violation);
    assert_eq!(summary.outbox_written, 0);
    assert!(!completed(report.outcome("quiet")).contract_violation);

    let log = std::fs::read_to_string(w.dir.path().join("agents/chatty/logs/activity.log")).unwrap();
    assert!(log.starts_with("Tick 0: "));
    assert!(log.contains("refactor the parser"));
}

#[test]
fn tool_results_are_recorded_and_sandbox_denials_fail_softly() {
    let script = Scripted::default().reply(
        "worker",
        json!({
            "tool_calls": [
                {"tool": "file_write", "args": {"path": "notes.txt", "content": "draft"}},
                {"tool": "file_read", "args": {"path": "../other/resume.json"}},
                {"tool": "shell", "args": {"command": "python3 -c 'print(1)'"}}
            ]
        }),
    );
    let mut worker = resume("worker", 1, 0);
    worker.permissions.tools = vec!["file_write".into(), "file_read".into()];
    let w = world(&script, &[worker, resume("other", 1, 0)], EngineConfig::default());

    let report = w.engine.run_tick().unwrap();
    let summary = completed(report.outcome("worker"));
    assert_eq!(summary.tool_calls, 3);
    assert_eq!(summary.tool_failures, 2);
    assert_eq!(summary.outbox_written, 3);

    let written = std::fs::read_to_string(w.dir.path().join("agents/worker/workspace/notes.txt")).unwrap();
    assert_eq!(written, "draft");

    let storage = w.engine.storage();
    let agent = storage.agents.find("worker").unwrap().unwrap();
    let results = storage.outbox.read_own(&agent, None).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|e| e.kind == "tool_result"));
    let successes: Vec<bool> = results
        .iter()
        .map(|e| e.payload["success"].as_bool().unwrap())
        .collect();
    assert_eq!(successes.iter().filter(|s| **s).count(), 1);

    // One debit per executed tool call plus one for the turn.
    assert!((summary.credits_left - (1000.0 - 4.0 * 0.01)).abs() < 1e-9);
}

#[test]
fn outbox_entries_reach_permitted_readers_on_later_ticks() {
    let script = Scripted::default().reply(
        "planner",
        json!({"outbox_entries": [{"kind": "message", "payload": {"text": "hello from planner"}}]}),
    );
    let mut coder = resume("coder", 1, 0);
    coder.permissions.read_outboxes = vec!["planner".into()];
    let loner = resume("loner", 1, 0);
    let w = world(&script, &[coder, resume("planner", 1, 0), loner], EngineConfig::default());

    w.engine.run_tick().unwrap();
    w.engine.run_tick().unwrap();

    let coder_inboxes = script.inboxes_of("coder");
    assert_eq!(coder_inboxes.len(), 2);
    // coder runs before planner on tick 0, so the first message arrives on tick 1.
    assert!(coder_inboxes[0].ends_with("No incoming messages."));
    assert!(coder_inboxes[1].contains("From planner (message): hello from planner"));

    let loner_inboxes = script.inboxes_of("loner");
    assert!(loner_inboxes.iter().all(|i| !i.contains("hello from planner")));
    let planner_inboxes = script.inboxes_of("planner");
    assert!(planner_inboxes.iter().all(|i| !i.contains("hello from planner")));
}

#[test]
fn failed_memory_update_does_not_block_the_rest() {
    let script = Scripted::default().reply(
        "keeper",
        json!({
            "memory_updates": [
                {"key": "plan", "value": "ship it", "op": "set"},
                {"key": "plan", "value": {"step": 2}, "op": "merge"},
                {"key": "log", "value": "tick done", "op": "append"},
                {"key": "../escape", "value": 1}
            ]
        }),
    );
    let w = world(&script, &[resume("keeper", 1, 0)], EngineConfig::default());

    let report = w.engine.run_tick().unwrap();
    let summary = completed(report.outcome("keeper"));
    assert_eq!(summary.memory_updates, 2);
    assert_eq!(summary.memory_failures, 2);

    let storage = w.engine.storage();
    let agent = storage.agents.find("keeper").unwrap().unwrap();
    let plan = storage.memory.load(&agent, "plan").unwrap().unwrap();
    assert_eq!(plan.value, json!("ship it"));
    let log = storage.memory.load(&agent, "log").unwrap().unwrap();
    assert_eq!(log.value, json!(["tick done"]));
    assert_eq!(storage.memory.list_keys(&agent).unwrap(), vec!["log", "plan"]);
}

#[test]
fn provider_failure_leaves_other_agents_and_tick_intact() {
    let script = Scripted::default().reply_raw(
        "flaky",
        Err(ProviderError::Unavailable {
            url: "http://localhost:11434".into(),
            message: "connection refused".into(),
        }),
    );
    let w = world(&script, &[resume("flaky", 1, 0), resume("steady", 1, 0)], EngineConfig::default());

    let report = w.engine.run_tick().unwrap();
    assert!(matches!(
        report.outcome("flaky"),
        Some(AgentOutcome::Failed { kind: "provider_failure", .. })
    ));
    completed(report.outcome("steady"));
    assert_eq!(w.engine.current_tick(), 1);

    // A failed turn is not charged.
    let storage = w.engine.storage();
    let flaky = storage.agents.find("flaky").unwrap().unwrap();
    assert_eq!(storage.ledger.account(&flaky).unwrap().credits_left, 1000.0);
}

#[test]
fn created_agents_join_on_the_next_tick() {
    let script = Scripted::default().reply(
        "planner",
        json!({
            "tool_calls": [{"tool": "create_agent", "args": {
                "name": "helper",
                "instructions": "Help the planner.",
                "tools": ["file_read"]
            }}]
        }),
    );
    let mut planner = resume("planner", 1, 0);
    planner.permissions.tools = vec!["create_agent".into(), "file_read".into()];
    let w = world(&script, &[planner], EngineConfig::default());

    let first = w.engine.run_tick().unwrap();
    assert_eq!(completed(first.outcome("planner")).tool_failures, 0);
    assert!(first.outcome("helper").is_none());

    let second = w.engine.run_tick().unwrap();
    completed(second.outcome("helper"));
    let helper = w.engine.storage().agents.find("helper").unwrap().unwrap();
    assert!(helper.can_use("file_read"));
    assert!(!helper.can_use("create_agent"));
}

#[test]
fn run_continuously_stops_at_max_ticks() {
    let script = Scripted::default();
    let config = EngineConfig {
        tick_interval_secs: 0,
        ..EngineConfig::default()
    };
    let w = world(&script, &[resume("solo", 1, 0)], config);

    let shutdown = AtomicBool::new(false);
    assert_eq!(w.engine.run_continuously(&shutdown, 3).unwrap(), 3);
    assert_eq!(w.engine.current_tick(), 3);
    assert_eq!(script.invoked().len(), 3);
}

#[test]
fn shutdown_before_start_runs_nothing() {
    let script = Scripted::default();
    let w = world(&script, &[resume("solo", 1, 0)], EngineConfig::default());

    let shutdown = AtomicBool::new(true);
    assert_eq!(w.engine.run_continuously(&shutdown, 0).unwrap(), 0);
    assert_eq!(w.engine.current_tick(), 0);
}

#[test]
fn tool_calls_stop_when_budget_runs_out() {
    let mut lister = resume("lister", 1, 0);
    lister.permissions.tools = vec!["file_list".into()];
    lister.credits = Some(CreditsRecord {
        max_credits: 0.025,
        soft_cap: 0.01,
        cost_per_action: Some(0.01),
    });
    let call = json!({"tool": "file_list", "args": {"path": "."}});
    let script = Scripted::default().reply(
        "lister",
        json!({
            "outbox_entries": [],
            "tool_calls": [call.clone(), call.clone(), call.clone(), call.clone(), call],
            "memory_updates": [],
            "notes": ""
        }),
    );
    let w = world(&script, &[lister], EngineConfig::default());

    let report = w.engine.run_tick().unwrap();
    let summary = completed(report.outcome("lister"));
    // 0.025 covers two full calls; the third starts with 0.005 left.
    assert_eq!(summary.tool_calls, 3);
    assert_eq!(summary.tool_calls_skipped, 2);
    assert_eq!(summary.outbox_written, 3);
    assert_eq!(summary.credits_left, 0.0);

    let storage = w.engine.storage();
    let lister = storage.agents.find("lister").unwrap().unwrap();
    assert_eq!(storage.outbox.count(&lister).unwrap(), 3);

    // Next tick the agent is starved before invocation.
    let report = w.engine.run_tick().unwrap();
    assert_eq!(report.outcome("lister"), Some(&AgentOutcome::Starved));
    assert_eq!(script.invoked(), vec!["lister"]);
}
