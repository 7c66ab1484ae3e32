//! lemming CLI: a thin control surface over the tick engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use lemming::agent::repository::{AgentRepository, FsAgentRepository};
use lemming::agent::resume::Resume;
use lemming::config::EngineConfig;
use lemming::engine::{AgentOutcome, TickEngine, TickReport};
use lemming::error::StoreError;
use lemming::org;
use lemming::paths::{AgentPaths, BasePaths, TEMPLATE_DIR};
use lemming::store::{InstanceLock, write_json_atomic};

#[derive(Parser)]
#[command(name = "lemming", version, about = "Tick-based multi-agent orchestration engine")]
struct Cli {
    /// Base directory holding config/, agents/ and shared/.
    #[arg(long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the directory layout, a default engine.toml and the agent template.
    Init,

    /// Run exactly one tick.
    Tick,

    /// Run ticks continuously until interrupted.
    Run {
        /// Stop after this many ticks (default: engine.toml max_ticks; 0 = unlimited).
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// List discovered agents.
    Agents,

    /// Show one agent's resume, credits, memory and recent outbox.
    Inspect {
        /// Agent name.
        name: String,

        /// Number of recent outbox entries to show.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Add credits to an agent (capped at its max_credits).
    TopUp {
        /// Agent name.
        name: String,
        /// Credits to add.
        amount: f64,
    },

    /// Validate engine.toml and every resume; fails on any problem.
    Validate,

    /// Derive who-reads-whom and tool grants; print and save them.
    OrgGraph,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let paths = BasePaths::new(&cli.base_dir);

    match cli.command {
        Commands::Init => init(&paths)?,

        Commands::Tick => {
            let _lock = InstanceLock::acquire(paths.lock_file())?;
            let engine = TickEngine::open(paths)?;
            let report = engine.run_tick()?;
            print_report(&report);
        }

        Commands::Run { max_ticks } => {
            let _lock = InstanceLock::acquire(paths.lock_file())?;
            let engine = TickEngine::open(paths)?;
            let shutdown = Arc::new(AtomicBool::new(false));
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&shutdown)).into_diagnostic()?;
            }
            let max_ticks = max_ticks.unwrap_or(engine.config().max_ticks);
            let ran = engine.run_continuously(&shutdown, max_ticks)?;
            println!("Ran {ran} tick(s); next tick is {}.", engine.current_tick());
        }

        Commands::Agents => {
            let engine = TickEngine::open(paths)?;
            let discovery = engine.storage().agents.discover()?;
            if discovery.agents.is_empty() {
                println!("No agents.");
            }
            for agent in &discovery.agents {
                let account = engine.storage().ledger.account(agent)?;
                println!(
                    "{:<20} every {:>3} (offset {:>3})  credits {:>10.2}/{:<10.2} tools: {}",
                    agent.name,
                    agent.schedule.run_every_n_ticks,
                    agent.schedule.phase_offset,
                    account.credits_left,
                    agent.credits.max_credits,
                    agent.permissions.tools.iter().cloned().collect::<Vec<_>>().join(",")
                );
            }
            if !discovery.issues.is_empty() {
                println!("\n{} resume problem(s); run `lemming validate` for details.", discovery.issues.len());
            }
        }

        Commands::Inspect { name, limit } => {
            let engine = TickEngine::open(paths)?;
            let storage = engine.storage();
            let Some(agent) = storage.agents.find(&name)? else {
                return Err(StoreError::UnknownAgent { name }.into());
            };
            let resume = serde_json::to_string_pretty(&agent.to_resume()).into_diagnostic()?;
            println!("Agent \"{}\" ({})\n{resume}", agent.name, agent.dir.display());

            let account = storage.ledger.account(&agent)?;
            println!("\nCredits: {:.4} of {:.4} (soft cap {:.4})", account.credits_left, agent.credits.max_credits, agent.credits.soft_cap);

            let memory = storage.memory.snapshot(&agent, usize::MAX)?;
            println!("\n{}", lemming::memory::render_snapshot(&memory));

            let entries = storage.outbox.read_own(&agent, Some(limit))?;
            println!("\nOutbox ({} total, last {}):", storage.outbox.count(&agent)?, entries.len());
            for entry in &entries {
                println!("  [tick {}] {} {}: {}", entry.tick, entry.id, entry.kind, entry.payload);
            }
        }

        Commands::TopUp { name, amount } => {
            let _lock = InstanceLock::acquire(paths.lock_file())?;
            let engine = TickEngine::open(paths)?;
            let Some(agent) = engine.storage().agents.find(&name)? else {
                return Err(StoreError::UnknownAgent { name }.into());
            };
            let account = engine.storage().ledger.top_up(&agent, amount)?;
            println!("{}: {:.4} credits left", agent.name, account.credits_left);
        }

        Commands::Validate => {
            let config = EngineConfig::load(&paths.config_file())?;
            let mut problems: Vec<String> = config
                .problems()
                .into_iter()
                .map(|p| format!("engine.toml: {p}"))
                .collect();
            let repo = FsAgentRepository::new(paths.clone(), config.credits.clone());
            for issue in repo.validate()? {
                let line = format!("{}: {}", issue.dir.display(), issue.message);
                if issue.kind.is_fatal() {
                    problems.push(line);
                } else {
                    eprintln!("  warning: {line}");
                }
            }
            if !problems.is_empty() {
                for problem in &problems {
                    eprintln!("  - {problem}");
                }
                miette::bail!("{} configuration problem(s) found", problems.len());
            }
            let discovery = repo.discover()?;
            org::save_org_graph(&paths.org_graph_file(), &discovery.agents)?;
            println!("Configuration is valid.");
        }

        Commands::OrgGraph => {
            let engine = TickEngine::open(paths)?;
            let discovery = engine.storage().agents.discover()?;
            let file = engine.paths().org_graph_file();
            let graph = org::save_org_graph(&file, &discovery.agents)?;
            println!("{}", serde_json::to_string_pretty(&graph).into_diagnostic()?);
            eprintln!("Wrote {}", file.display());
        }
    }

    Ok(())
}

fn init(paths: &BasePaths) -> Result<()> {
    paths.ensure_dirs()?;
    let _lock = InstanceLock::acquire(paths.lock_file())?;
    let config_file = paths.config_file();
    if !config_file.exists() {
        EngineConfig::default().save(&config_file)?;
        println!("Wrote {}", config_file.display());
    }

    let template = AgentPaths::at(paths.agents_dir.join(TEMPLATE_DIR));
    if !template.resume_file().exists() {
        let mut resume = Resume::new("agent_template", "Describe what this agent should do each tick.");
        resume.title = Some("Template".into());
        resume.permissions.tools = vec!["file_read".into(), "file_write".into(), "file_list".into()];
        write_json_atomic(&template.resume_file(), &resume)?;
        println!("Wrote {}", template.resume_file().display());
    }

    let engine = TickEngine::open(paths.clone())?;
    let discovery = engine.storage().agents.discover()?;
    let opened = engine.storage().ledger.ensure_accounts(&discovery.agents)?;
    org::save_org_graph(&paths.org_graph_file(), &discovery.agents)?;
    println!(
        "Initialized lemming at {} ({} agent(s), {opened} new credit account(s))",
        paths.root.display(),
        discovery.agents.len()
    );
    Ok(())
}

fn print_report(report: &TickReport) {
    println!("Tick {}: {} agent(s) fired", report.tick, report.agents.len());
    for agent in &report.agents {
        let outcome = match &agent.outcome {
            AgentOutcome::Completed(s) => format!(
                "completed: {} outbox, {} tool call(s) ({} failed), {} memory update(s), {:.4} credits left",
                s.outbox_written, s.tool_calls, s.tool_failures, s.memory_updates, s.credits_left
            ),
            AgentOutcome::Starved => "starved (no credits)".to_string(),
            AgentOutcome::Failed { kind, message } => format!("failed [{kind}]: {message}"),
        };
        println!("  {:<20} {outcome}", agent.agent);
    }
    if report.pruned > 0 {
        println!("  pruned {} outbox entr(ies)", report.pruned);
    }
}
