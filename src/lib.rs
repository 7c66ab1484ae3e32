// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # lemming
//!
//! A tick-based multi-agent orchestration engine. Agents are declared by
//! resumes on disk, fire on a deterministic schedule, talk through
//! append-only outboxes, and act only through a sandboxed tool catalog.
//!
//! ## Architecture
//!
//! - **Scheduler** (`scheduler`): which agents fire on a tick, in what order
//! - **Message log** (`outbox`): per-agent append-only outboxes and virtual inboxes
//! - **Memory** (`memory`): per-agent key/value store with set/append/merge
//! - **Sandbox** (`sandbox`): path containment for every file-touching tool
//! - **Tools** (`agent::tool`, `agent::tools`): allowlisted, mediated capabilities
//! - **Ledger** (`ledger`): per-agent credit budgets
//! - **Org graph** (`org`): derived who-reads-whom and tool grants, for operators
//! - **Orchestrator** (`engine`): the tick loop with per-agent failure isolation
//!
//! ## Library usage
//!
//! ```no_run
//! use lemming::engine::TickEngine;
//! use lemming::paths::BasePaths;
//!
//! let engine = TickEngine::open(BasePaths::new("./lemming-data")).unwrap();
//! let report = engine.run_tick().unwrap();
//! println!("tick {} ran {} agents", report.tick, report.agents.len());
//! ```

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod org;
pub mod outbox;
pub mod paths;
pub mod sandbox;
pub mod scheduler;
pub mod store;
