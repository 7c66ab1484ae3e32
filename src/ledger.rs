//! Credit ledger: one spendable balance per agent, persisted in
//! `<base>/config/credits.json` as a map from agent name to account.
//!
//! Budget terms (`max_credits`, `soft_cap`, `cost_per_action`) come from the
//! resume; only the running balance lives here. An agent without an account
//! starts at its `max_credits`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent::resume::Agent;
use crate::error::StoreResult;
use crate::store::{read_json, write_json_atomic};

/// One agent's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub credits_left: f64,
    /// Fields written by other tools (e.g. a model name), kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CreditAccount {
    fn opened_for(agent: &Agent) -> Self {
        Self {
            credits_left: agent.credits.max_credits,
            extra: serde_json::Map::new(),
        }
    }
}

/// What a debit did to a balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebitOutcome {
    pub before: f64,
    pub after: f64,
    /// The debit exceeded the balance and was cut to it.
    pub clamped: bool,
    /// The balance went from above `soft_cap` to at or below it.
    pub crossed_soft_cap: bool,
}

/// Durable per-agent budgets.
pub trait CreditLedger: Send + Sync {
    /// The agent's account, opened at `max_credits` if it has none.
    fn account(&self, agent: &Agent) -> StoreResult<CreditAccount>;

    /// Whether the agent may act (`credits_left > 0`).
    fn has_budget(&self, agent: &Agent) -> StoreResult<bool> {
        Ok(self.account(agent)?.credits_left > 0.0)
    }

    /// Deduct `amount`, never going below zero.
    fn debit(&self, agent: &Agent, amount: f64) -> StoreResult<DebitOutcome>;

    /// Add `amount`, capped at `max_credits`.
    fn top_up(&self, agent: &Agent, amount: f64) -> StoreResult<CreditAccount>;

    /// Every stored account.
    fn balances(&self) -> StoreResult<BTreeMap<String, CreditAccount>>;

    /// Open accounts for agents that have none. Returns how many were opened.
    fn ensure_accounts(&self, agents: &[Agent]) -> StoreResult<usize>;
}

/// Balances are kept to four decimal places so repeated small debits do not
/// accumulate float noise in the file.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn sanitize(amount: f64) -> f64 {
    if amount.is_finite() { amount.max(0.0) } else { 0.0 }
}

/// `credits.json`-backed ledger. Every operation re-reads the file, so the
/// file stays the single source of truth.
#[derive(Debug, Clone)]
pub struct FsCreditLedger {
    path: PathBuf,
}

impl FsCreditLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> StoreResult<BTreeMap<String, CreditAccount>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, accounts: &BTreeMap<String, CreditAccount>) -> StoreResult<()> {
        write_json_atomic(&self.path, accounts)
    }
}

impl CreditLedger for FsCreditLedger {
    fn account(&self, agent: &Agent) -> StoreResult<CreditAccount> {
        Ok(self
            .load()?
            .remove(&agent.name)
            .unwrap_or_else(|| CreditAccount::opened_for(agent)))
    }

    fn debit(&self, agent: &Agent, amount: f64) -> StoreResult<DebitOutcome> {
        let amount = sanitize(amount);
        let mut accounts = self.load()?;
        let account = accounts
            .entry(agent.name.clone())
            .or_insert_with(|| CreditAccount::opened_for(agent));

        let before = account.credits_left;
        let clamped = amount > before;
        let after = if clamped { 0.0 } else { round4(before - amount) };
        account.credits_left = after;
        self.save(&accounts)?;

        if clamped {
            tracing::warn!(
                event = "debit_clamped",
                agent = %agent.name,
                requested = amount,
                credits_left = before,
                "debit exceeds balance; clamped at zero"
            );
        }
        let soft_cap = agent.credits.soft_cap;
        let crossed_soft_cap = before > soft_cap && after <= soft_cap;
        if crossed_soft_cap {
            tracing::warn!(
                event = "soft_cap_crossed",
                agent = %agent.name,
                credits_left = after,
                soft_cap,
                "credit balance fell below soft cap"
            );
        }
        tracing::debug!(agent = %agent.name, amount, credits_left = after, "credits debited");

        Ok(DebitOutcome {
            before,
            after,
            clamped,
            crossed_soft_cap,
        })
    }

    fn top_up(&self, agent: &Agent, amount: f64) -> StoreResult<CreditAccount> {
        let amount = sanitize(amount);
        let mut accounts = self.load()?;
        let account = accounts
            .entry(agent.name.clone())
            .or_insert_with(|| CreditAccount::opened_for(agent));
        account.credits_left = round4((account.credits_left + amount).min(agent.credits.max_credits));
        let account = account.clone();
        self.save(&accounts)?;
        tracing::info!(agent = %agent.name, amount, credits_left = account.credits_left, "credits topped up");
        Ok(account)
    }

    fn balances(&self) -> StoreResult<BTreeMap<String, CreditAccount>> {
        self.load()
    }

    fn ensure_accounts(&self, agents: &[Agent]) -> StoreResult<usize> {
        let mut accounts = self.load()?;
        let mut opened = 0;
        for agent in agents {
            if !accounts.contains_key(&agent.name) {
                accounts.insert(agent.name.clone(), CreditAccount::opened_for(agent));
                opened += 1;
            }
        }
        if opened > 0 {
            self.save(&accounts)?;
        }
        Ok(opened)
    }
}
