//! Circuit breaker
//!
//! Three-state gate around one protected resource:
//!
//! ```text
//! +--------+  failure_threshold  +------+   reset_timeout, next call   +-----------+
//! | Closed | ------------------> | Open | ---------------------------> | Half-Open |
//! +--------+                     +------+                              +-----------+
//!     ^                              ^            any failure               |
//!     |                              +--------------------------------------+
//!     |                 success_threshold successes                         |
//!     +---------------------------------------------------------------------+
//! ```
//!
//! Window counters are zeroed on every transition; lifetime totals are kept
//! for reporting and survive `reset()`. State lives behind one mutex that is
//! never held across an await, so a failure that crosses the threshold has
//! already moved the state by the time the caller sees the error.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::{GuardError, GuardResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - allowing requests
    #[default]
    Closed,
    /// Circuit is open - rejecting requests
    Open,
    /// Circuit is half-open - letting probe traffic through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One recorded failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub message: String,
    pub state: CircuitState,
    pub at: DateTime<Utc>,
}

/// Snapshot returned by [`CircuitBreaker::get_status`]
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
    pub failure_rate: f64,
    pub state_changed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
    pub recent_transitions: Vec<StateTransition>,
    pub recent_errors: Vec<FailureRecord>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Failures that tripped the most recent opening
    opened_after: u32,
    state_changed_at: DateTime<Utc>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejected: u64,
    transitions: VecDeque<StateTransition>,
    errors: VecDeque<FailureRecord>,
}

/// Thread-safe circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_after: 0,
                state_changed_at: Utc::now(),
                next_attempt: None,
                next_attempt_at: None,
                last_failure_at: None,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejected: 0,
                transitions: VecDeque::new(),
                errors: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True unless the circuit is OPEN
    pub fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Run `op` through the breaker.
    ///
    /// Rejected calls fail with [`GuardError::CircuitOpen`] without invoking `op`.
    /// A call that outlives the per-call timeout is dropped and counted as a failure.
    pub async fn execute<T, F, Fut>(&self, op: F) -> GuardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        self.admit()?;
        self.run(op).await
    }

    /// Like [`execute`](Self::execute), but a rejected call yields `fallback()` instead.
    pub async fn execute_with_fallback<T, F, Fut, FB, FutB>(&self, op: F, fallback: FB) -> GuardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
        FB: FnOnce() -> FutB,
        FutB: Future<Output = GuardResult<T>>,
    {
        match self.admit() {
            Ok(()) => self.run(op).await,
            Err(GuardError::CircuitOpen { .. }) => fallback().await,
            Err(e) => Err(e),
        }
    }

    /// Gate a call: count it, move OPEN to HALF_OPEN once the cooldown has passed,
    /// or reject it.
    fn admit(&self) -> GuardResult<()> {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;

        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        match inner.next_attempt {
            Some(next) if now < next => {
                inner.total_rejected += 1;
                let retry_after_ms = (next - now).as_millis() as u64;
                tracing::debug!(
                    "Circuit '{}' rejected call ({}ms until probe)",
                    self.name,
                    retry_after_ms
                );
                Err(GuardError::CircuitOpen {
                    failures: inner.opened_after,
                    retry_after_ms,
                })
            }
            _ => {
                self.transition(&mut inner, CircuitState::HalfOpen, "reset timeout elapsed");
                Ok(())
            }
        }
    }

    async fn run<T, F, Fut>(&self, op: F) -> GuardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let deadline = self.config.timeout();
        match tokio::time::timeout(deadline, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(&e);
                Err(e)
            }
            Err(_) => {
                let e = GuardError::Timeout(deadline);
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    let reason = format!("{} successful probes", inner.success_count);
                    self.transition(&mut inner, CircuitState::Closed, &reason);
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // admitted before the circuit opened; the window belongs to the new state
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &GuardError) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        inner.total_failures += 1;
        inner.last_failure_at = Some(now);

        let record = FailureRecord {
            message: error.to_string(),
            state: inner.state,
            at: now,
        };
        push_bounded(&mut inner.errors, record, self.config.history_size);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let reason = format!("{} consecutive failures", inner.failure_count);
                    inner.opened_after = inner.failure_count;
                    self.transition(&mut inner, CircuitState::Open, &reason);
                }
            }
            CircuitState::HalfOpen => {
                inner.opened_after = inner.failure_count + 1;
                self.transition(&mut inner, CircuitState::Open, "probe failed");
            }
            CircuitState::Open => {}
        }
    }

    /// Force CLOSED with zeroed window counters. Totals are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, "manual reset");
        }
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.next_attempt = None;
        inner.next_attempt_at = None;
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, reason: &str) {
        let from = inner.state;
        let now = Utc::now();

        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.state_changed_at = now;

        if to == CircuitState::Open {
            let cooldown = self.config.reset_timeout();
            inner.next_attempt = Some(Instant::now() + cooldown);
            inner.next_attempt_at = chrono::Duration::from_std(cooldown)
                .ok()
                .map(|d| now + d);
        } else {
            inner.next_attempt = None;
            inner.next_attempt_at = None;
        }

        push_bounded(
            &mut inner.transitions,
            StateTransition {
                from,
                to,
                reason: reason.to_string(),
                at: now,
            },
            self.config.history_size,
        );

        match to {
            CircuitState::Open => tracing::warn!(
                "Circuit '{}' {} -> {} ({}), probing again in {}ms",
                self.name,
                from,
                to,
                reason,
                self.config.reset_timeout_ms
            ),
            _ => tracing::info!("Circuit '{}' {} -> {} ({})", self.name, from, to, reason),
        }
    }

    pub fn get_status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_requests == 0 {
            0.0
        } else {
            inner.total_failures as f64 / inner.total_requests as f64
        };

        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            total_requests: inner.total_requests,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejected: inner.total_rejected,
            failure_rate,
            state_changed_at: inner.state_changed_at,
            last_failure_at: inner.last_failure_at,
            next_attempt: inner.next_attempt_at,
            recent_transitions: inner.transitions.iter().cloned().collect(),
            recent_errors: inner.errors.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
