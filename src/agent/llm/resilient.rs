//! Retry with bounded exponential backoff, plus a circuit breaker, around
//! any [`ModelInvoker`].
//!
//! Circuit states:
//! - `Closed { failures }`: calls pass; `failure_threshold` consecutive
//!   retryable failures open the circuit.
//! - `Open { since }`: calls fail fast with [`ProviderError::CircuitOpen`]
//!   until `open_cooldown` has elapsed.
//! - `HalfOpen`: one trial call passes; success closes, failure re-opens.
//!
//! Only retryable errors (transport failures, timeouts, 429/5xx) count as
//! failures. A non-retryable error proves the server answered, so it is
//! returned at once and treated as a sign of life.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RetryConfig;

use super::{InvocationRequest, ModelInvoker, ProviderError, ProviderResult};

/// Retry and breaker parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub failure_threshold: u32,
    pub open_cooldown: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            failure_threshold: config.failure_threshold.max(1),
            open_cooldown: Duration::from_secs(config.open_cooldown_secs),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = 1u32.checked_shl(retry.min(20)).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(multiplier)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// A [`ModelInvoker`] that retries and trips a breaker.
pub struct ResilientInvoker<I> {
    inner: I,
    policy: RetryPolicy,
    state: Mutex<CircuitState>,
    sleep: Sleeper,
}

impl<I: ModelInvoker> ResilientInvoker<I> {
    pub fn new(inner: I, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            state: Mutex::new(CircuitState::Closed { failures: 0 }),
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the backoff sleep (tests use a recorder).
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn state(&self) -> CircuitState {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitState> {
        // The state is a plain value; a poisoned lock still holds a usable one.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Let a call through, moving Open to HalfOpen once the cooldown passed.
    fn admit(&self, agent: &str) -> ProviderResult<()> {
        let mut state = self.lock();
        if let CircuitState::Open { since } = *state {
            let elapsed = since.elapsed();
            if elapsed < self.policy.open_cooldown {
                return Err(ProviderError::CircuitOpen {
                    cooldown_secs: (self.policy.open_cooldown - elapsed).as_secs().max(1),
                });
            }
            *state = CircuitState::HalfOpen;
            tracing::info!(event = "circuit_half_open", agent, "model circuit half-open; sending trial call");
        }
        Ok(())
    }

    fn record_success(&self, agent: &str) {
        let mut state = self.lock();
        if !matches!(*state, CircuitState::Closed { .. }) {
            tracing::info!(event = "circuit_closed", agent, "model circuit closed");
        }
        *state = CircuitState::Closed { failures: 0 };
    }

    fn record_failure(&self, agent: &str) {
        let mut state = self.lock();
        let next = match *state {
            CircuitState::Closed { failures } if failures + 1 < self.policy.failure_threshold => {
                CircuitState::Closed {
                    failures: failures + 1,
                }
            }
            CircuitState::Open { since } => CircuitState::Open { since },
            _ => {
                tracing::warn!(
                    event = "circuit_opened",
                    agent,
                    cooldown_secs = self.policy.open_cooldown.as_secs(),
                    "model circuit opened"
                );
                CircuitState::Open {
                    since: Instant::now(),
                }
            }
        };
        *state = next;
    }

    /// Backoff for `retry` plus up to 10% random jitter.
    fn delay(&self, retry: u32) -> Duration {
        let base = self.policy.backoff(retry);
        let spread = (base.as_millis() / 10) as u64;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

impl<I: ModelInvoker> ModelInvoker for ResilientInvoker<I> {
    fn invoke(&self, request: &InvocationRequest) -> ProviderResult<String> {
        let agent = request.agent.as_str();
        let attempts = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 0..attempts {
            self.admit(agent)?;
            match self.inner.invoke(request) {
                Ok(text) => {
                    self.record_success(agent);
                    return Ok(text);
                }
                Err(e) if !e.is_retryable() => {
                    self.record_success(agent);
                    return Err(e);
                }
                Err(e) => {
                    self.record_failure(agent);
                    if attempt + 1 < attempts {
                        let delay = self.delay(attempt);
                        tracing::warn!(
                            event = "provider_retry",
                            agent,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "model call failed; retrying"
                        );
                        (self.sleep)(delay);
                    }
                    last = Some(e);
                }
            }
        }

        Err(ProviderError::Exhausted {
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
