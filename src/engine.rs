//! Tick Orchestrator: the top-level loop.
//!
//! One tick runs `LoadAgents -> Schedule -> [per firing agent: BuildContext ->
//! Invoke -> ParseContract -> ApplySideEffects] -> Prune -> PersistTick`.
//! Agents run strictly one after another in scheduler order. Any error inside
//! one agent's turn is caught at the per-agent boundary; only storage failures
//! outside a turn (discovery, persisting the tick) abort a tick.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::agent::context::{ContextInputs, build_context, build_request};
use crate::agent::contract::{self, EngineContract};
use crate::agent::error::{AgentRunError, AgentRunResult};
use crate::agent::llm::{ModelInvoker, OllamaInvoker, ResilientInvoker, RetryPolicy};
use crate::agent::repository::{AgentRepository, FsAgentRepository};
use crate::agent::resume::Agent;
use crate::agent::tool::{ToolContext, ToolDispatcher};
use crate::config::EngineConfig;
use crate::error::{LemmingResult, StoreError, StoreResult};
use crate::ledger::{CreditLedger, FsCreditLedger};
use crate::memory::{FsMemoryStore, MemoryStore};
use crate::org;
use crate::outbox::{FsOutboxStore, OutboxDraft, OutboxStore, TOOL_RESULT_KIND};
use crate::paths::BasePaths;
use crate::sandbox::PathSandbox;
use crate::scheduler;
use crate::store::{FsTickStore, TickStore, write_atomic};

/// Granularity of the cancellable sleep between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Storage bundle
// ---------------------------------------------------------------------------

/// The storage interfaces the orchestrator works through. Owned by one
/// engine for the life of the process.
pub struct Storage {
    pub agents: Box<dyn AgentRepository>,
    pub outbox: Box<dyn OutboxStore>,
    pub memory: Box<dyn MemoryStore>,
    pub ledger: Box<dyn CreditLedger>,
    pub ticks: Box<dyn TickStore>,
}

impl Storage {
    /// Filesystem-backed storage under `paths`.
    pub fn filesystem(paths: &BasePaths, config: &EngineConfig) -> Self {
        Self {
            agents: Box::new(FsAgentRepository::new(paths.clone(), config.credits.clone())),
            outbox: Box::new(FsOutboxStore::new(&paths.agents_dir)),
            memory: Box::new(FsMemoryStore::new(config.tools.max_memory_value_bytes)),
            ledger: Box::new(FsCreditLedger::new(paths.credits_file())),
            ticks: Box::new(FsTickStore::new(paths.tick_file())),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Side effects of one completed turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnSummary {
    pub outbox_written: usize,
    pub tool_calls: usize,
    pub tool_failures: usize,
    /// Tool calls not run because the budget ran out mid-turn.
    pub tool_calls_skipped: usize,
    pub memory_updates: usize,
    pub memory_failures: usize,
    pub contract_violation: bool,
    /// This was the agent's periodic summary turn.
    pub summary_turn: bool,
    pub credits_left: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(TurnSummary),
    /// No credits left; the agent was not invoked.
    Starved,
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub agent: String,
    pub fire_point: f64,
    pub outcome: AgentOutcome,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Firing agents in execution order.
    pub agents: Vec<AgentReport>,
    /// Resume problems found during discovery.
    pub skipped_resumes: usize,
    pub pruned: usize,
}

impl TickReport {
    pub fn outcome(&self, agent: &str) -> Option<&AgentOutcome> {
        self.agents.iter().find(|r| r.agent == agent).map(|r| &r.outcome)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct TickEngine {
    paths: BasePaths,
    config: EngineConfig,
    storage: Storage,
    invoker: Box<dyn ModelInvoker>,
    dispatcher: ToolDispatcher,
}

impl TickEngine {
    pub fn new(paths: BasePaths, mut config: EngineConfig, storage: Storage, invoker: Box<dyn ModelInvoker>) -> Self {
        for name in config.tools.filter_interpreters() {
            tracing::warn!(
                target: crate::sandbox::SECURITY_TARGET,
                event = "command_rejected",
                executable = %name,
                "interpreter removed from executable allowlist"
            );
        }
        Self {
            paths,
            config,
            storage,
            invoker,
            dispatcher: ToolDispatcher::with_builtin_tools(),
        }
    }

    /// Engine over `<base>` with its `engine.toml`, filesystem storage and a
    /// retrying Ollama invoker.
    pub fn open(paths: BasePaths) -> LemmingResult<Self> {
        paths.ensure_dirs()?;
        let config = EngineConfig::load(&paths.config_file())?;
        config.validate()?;
        let invoker = ResilientInvoker::new(
            OllamaInvoker::new(&config.model),
            RetryPolicy::from_config(&config.retry),
        );
        let storage = Storage::filesystem(&paths, &config);
        Ok(Self::new(paths, config, storage, Box::new(invoker)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn paths(&self) -> &BasePaths {
        &self.paths
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The tick that runs next.
    pub fn current_tick(&self) -> u64 {
        self.storage.ticks.load()
    }

    /// Run the persisted current tick and persist `tick + 1`.
    pub fn run_tick(&self) -> StoreResult<TickReport> {
        let started = Instant::now();
        let tick = self.storage.ticks.load();
        let discovery = self.storage.agents.discover()?;
        if let Err(e) = org::save_org_graph(&self.paths.org_graph_file(), &discovery.agents) {
            tracing::warn!(event = "org_graph_save_failed", tick, error = %e, "derived org graph not written");
        }
        let firing = scheduler::order_firing_agents_with(&discovery.agents, tick, |agent| {
            self.config.summary.is_due(&agent.name, tick)
        });
        tracing::info!(
            tick,
            agents = discovery.agents.len(),
            firing = firing.len(),
            "tick started"
        );

        let mut reports = Vec::with_capacity(firing.len());
        for agent in firing {
            let outcome = self.run_agent_isolated(agent, &discovery.agents, tick);
            reports.push(AgentReport {
                agent: agent.name.clone(),
                fire_point: scheduler::fire_point(&agent.schedule),
                outcome,
            });
        }

        let pruned = self.prune(tick);
        self.storage.ticks.save(tick + 1)?;

        tracing::info!(
            event = "tick_completed",
            tick,
            ran = reports.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tick completed"
        );
        Ok(TickReport {
            tick,
            agents: reports,
            skipped_resumes: discovery.issues.iter().filter(|i| i.kind.is_fatal()).count(),
            pruned,
        })
    }

    /// Run ticks until `shutdown` is set or `max_ticks` ticks ran (0 means no
    /// limit). Returns the number of ticks run.
    pub fn run_continuously(&self, shutdown: &AtomicBool, max_ticks: u64) -> StoreResult<u64> {
        let interval = Duration::from_secs(self.config.tick_interval_secs);
        let mut ran = 0;
        while !shutdown.load(Ordering::SeqCst) {
            self.run_tick()?;
            ran += 1;
            if max_ticks > 0 && ran >= max_ticks {
                break;
            }
            let wake = Instant::now() + interval;
            while !shutdown.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= wake {
                    break;
                }
                std::thread::sleep(SLEEP_SLICE.min(wake - now));
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!(ticks = ran, "shutdown requested; stopping after completed tick");
        }
        Ok(ran)
    }

    fn prune(&self, tick: u64) -> usize {
        let interval = self.config.retention.prune_interval_ticks;
        if interval == 0 || tick % interval != 0 {
            return 0;
        }
        match self.storage.outbox.prune(tick, self.config.retention.max_age_ticks) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(tick, error = %e, "outbox prune failed");
                0
            }
        }
    }

    /// Budget gate plus the per-agent failure boundary.
    fn run_agent_isolated(&self, agent: &Agent, all: &[Agent], tick: u64) -> AgentOutcome {
        match self.storage.ledger.has_budget(agent) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(event = "agent_starved", agent = %agent.name, tick, "no credits left; skipping");
                return AgentOutcome::Starved;
            }
            Err(e) => return self.failed(agent, tick, AgentRunError::Store(e)),
        }

        match self.run_agent(agent, all, tick) {
            Ok(summary) => {
                tracing::info!(
                    agent = %agent.name,
                    tick,
                    outbox = summary.outbox_written,
                    tools = summary.tool_calls,
                    memory = summary.memory_updates,
                    credits_left = summary.credits_left,
                    "agent turn completed"
                );
                AgentOutcome::Completed(summary)
            }
            Err(e) => self.failed(agent, tick, e),
        }
    }

    fn failed(&self, agent: &Agent, tick: u64, error: AgentRunError) -> AgentOutcome {
        let kind = error.kind();
        tracing::error!(
            event = "agent_failed",
            agent = %agent.name,
            tick,
            error_kind = kind,
            error = %error,
            "agent turn failed"
        );
        AgentOutcome::Failed {
            kind,
            message: error.to_string(),
        }
    }

    fn run_agent(&self, agent: &Agent, all: &[Agent], tick: u64) -> AgentRunResult<TurnSummary> {
        let agent_paths = agent.paths();
        let sandbox = PathSandbox::new(&agent.name, agent_paths.workspace_dir(), &self.paths.shared_dir)?;

        // BuildContext
        let memory = self
            .storage
            .memory
            .snapshot(agent, self.config.memory.context_max_items)?;
        let inbox = self
            .storage
            .outbox
            .assemble_inbox(agent, all, tick, &self.config.inbox)?;
        let tools = self.dispatcher.available_to(agent);
        let blocks = build_context(&ContextInputs {
            agent,
            tick,
            memory: &memory,
            inbox: &inbox,
            tools: &tools,
            inbox_max_chars: self.config.inbox.max_chars,
        });
        let request = build_request(agent, blocks, &self.config.model);

        // Invoke + ParseContract
        let raw = self.invoker.invoke(&request)?;
        let (decision, report) = contract::parse(&raw);
        if report.is_violation() {
            tracing::warn!(
                event = "contract_violation",
                agent = %agent.name,
                tick,
                defaulted = ?report.defaulted,
                dropped = ?report.dropped,
                raw_text = report.raw_text_wrapped,
                "agent output did not match the contract; defaults applied"
            );
        }

        let mut summary = self.apply(agent, tick, &sandbox, decision)?;
        summary.contract_violation = report.is_violation();
        Ok(summary)
    }

    /// ApplySideEffects, in fixed order: outbox, tools, memory, notes, debit.
    fn apply(
        &self,
        agent: &Agent,
        tick: u64,
        sandbox: &PathSandbox,
        decision: EngineContract,
    ) -> AgentRunResult<TurnSummary> {
        let mut summary = TurnSummary::default();

        for draft in decision.outbox_entries {
            self.storage.outbox.append(agent, tick, draft)?;
            summary.outbox_written += 1;
        }

        let ctx = ToolContext {
            agent,
            tick,
            sandbox,
            memory: self.storage.memory.as_ref(),
            agents: self.storage.agents.as_ref(),
            limits: &self.config.tools,
        };
        let total_calls = decision.tool_calls.len();
        for (index, call) in decision.tool_calls.into_iter().enumerate() {
            if !self.storage.ledger.has_budget(agent)? {
                summary.tool_calls_skipped = total_calls - index;
                tracing::warn!(
                    event = "agent_starved",
                    agent = %agent.name,
                    tick,
                    skipped = summary.tool_calls_skipped,
                    "credits exhausted mid-turn; remaining tool calls skipped"
                );
                break;
            }
            let result = self.dispatcher.invoke(&ctx, &call);
            self.storage.ledger.debit(agent, agent.credits.cost_per_action)?;
            summary.tool_calls += 1;
            if !result.success {
                summary.tool_failures += 1;
            }
            if self.config.tools.record_tool_results {
                let payload = serde_json::json!({
                    "tool": call.tool,
                    "args": call.args,
                    "success": result.success,
                    "output": result.output,
                    "error": result.error,
                });
                self.storage
                    .outbox
                    .append(agent, tick, OutboxDraft::new(TOOL_RESULT_KIND, payload))?;
                summary.outbox_written += 1;
            }
        }

        for update in decision.memory_updates {
            match self
                .storage
                .memory
                .save(agent, &update.key, update.value, update.op, tick)
            {
                Ok(_) => summary.memory_updates += 1,
                Err(e) => {
                    summary.memory_failures += 1;
                    tracing::warn!(
                        event = "memory_update_failed",
                        agent = %agent.name,
                        tick,
                        key = %update.key,
                        operation = %update.op,
                        error = %e,
                        "memory update failed"
                    );
                }
            }
        }

        if !decision.notes.trim().is_empty() {
            self.append_notes(agent, tick, &decision.notes)?;
        }
        if self.config.summary.is_due(&agent.name, tick) {
            let path = agent.paths().logs_dir().join(format!("summary_{tick}.txt"));
            write_atomic(&path, decision.notes.as_bytes())?;
            summary.summary_turn = true;
            tracing::info!(event = "summary_written", agent = %agent.name, tick, path = %path.display(), "summary turn recorded");
        }

        let debit = self.storage.ledger.debit(agent, agent.credits.cost_per_action)?;
        summary.credits_left = debit.after;
        Ok(summary)
    }

    fn append_notes(&self, agent: &Agent, tick: u64, notes: &str) -> AgentRunResult<()> {
        let dir = agent.paths().logs_dir();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let path = dir.join("activity.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        writeln!(file, "Tick {tick}: {}", notes.trim()).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }
}

impl std::fmt::Debug for TickEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickEngine")
            .field("base", &self.paths.root)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
