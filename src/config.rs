//! Guard configuration
//!
//! Defaults, optional TOML file, then `DBGUARD_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GuardError, GuardResult};

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "DBGUARD_";

/// Top-level configuration for the governance layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Circuit breaker thresholds and timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures while CLOSED before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Successes while HALF_OPEN before the circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Per-call deadline (milliseconds)
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,

    /// Cooldown before an OPEN circuit may probe (milliseconds)
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,

    /// Entries kept in the transition and error histories
    #[serde(default = "default_breaker_history")]
    pub history_size: usize,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_reset_timeout() -> u64 {
    60_000
}

fn default_breaker_history() -> usize {
    10
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_call_timeout(),
            reset_timeout_ms: default_reset_timeout(),
            history_size: default_breaker_history(),
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Retry policy for the smart pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Multiplier applied per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1_000
}

fn default_retry_backoff() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-indexed): `retry_delay * backoff^attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.retry_backoff.powi(attempt.min(i32::MAX as u32) as i32);
        let ms = (self.retry_delay_ms as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Auto-recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Strategy executions allowed per error pattern until `reset()`
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    /// Pause before executing a strategy (milliseconds)
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_ms: u64,

    #[serde(default = "default_history_size")]
    pub max_history_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_recovery_delay() -> u64 {
    5_000
}

fn default_history_size() -> usize {
    100
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recovery_attempts: default_max_recovery_attempts(),
            recovery_delay_ms: default_recovery_delay(),
            max_history_size: default_history_size(),
        }
    }
}

impl RecoveryConfig {
    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}

/// Connection watchdog timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_interval")]
    pub check_interval_ms: u64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Deadline for a single probe round-trip (milliseconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_watchdog_interval() -> u64 {
    30_000
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_probe_timeout() -> u64 {
    5_000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_watchdog_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub check_interval_ms: u64,

    #[serde(default = "default_history_size")]
    pub max_history_size: usize,

    /// Self round-trip above this is DEGRADED (milliseconds)
    #[serde(default = "default_slow_response")]
    pub slow_response_ms: u64,

    /// Deadline for the database round-trip check (milliseconds)
    #[serde(default = "default_database_timeout")]
    pub database_timeout_ms: u64,

    /// Environment variables that must be present
    #[serde(default = "default_required_env")]
    pub required_env: Vec<String>,
}

fn default_health_interval() -> u64 {
    60_000
}

fn default_slow_response() -> u64 {
    1_000
}

fn default_database_timeout() -> u64 {
    5_000
}

fn default_required_env() -> Vec<String> {
    vec!["DATABASE_URL".to_string()]
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_health_interval(),
            max_history_size: default_history_size(),
            slow_response_ms: default_slow_response(),
            database_timeout_ms: default_database_timeout(),
            required_env: default_required_env(),
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn database_timeout(&self) -> Duration {
        Duration::from_millis(self.database_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

fn default_shutdown_timeout() -> u64 {
    10_000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl ShutdownConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl GuardConfig {
    /// Load defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> GuardResult<Self> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> GuardResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| GuardError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `DBGUARD_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> GuardResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "FAILURE_THRESHOLD", &mut self.breaker.failure_threshold)?;
        override_from(&lookup, "SUCCESS_THRESHOLD", &mut self.breaker.success_threshold)?;
        override_from(&lookup, "TIMEOUT_MS", &mut self.breaker.timeout_ms)?;
        override_from(&lookup, "RESET_TIMEOUT_MS", &mut self.breaker.reset_timeout_ms)?;
        override_from(&lookup, "MAX_RETRIES", &mut self.retry.max_retries)?;
        override_from(&lookup, "RETRY_DELAY_MS", &mut self.retry.retry_delay_ms)?;
        override_from(&lookup, "RETRY_BACKOFF", &mut self.retry.retry_backoff)?;
        override_from(
            &lookup,
            "MAX_RECOVERY_ATTEMPTS",
            &mut self.recovery.max_recovery_attempts,
        )?;
        override_from(&lookup, "RECOVERY_DELAY_MS", &mut self.recovery.recovery_delay_ms)?;
        override_from(&lookup, "CHECK_INTERVAL_MS", &mut self.watchdog.check_interval_ms)?;
        override_from(
            &lookup,
            "MAX_CONSECUTIVE_FAILURES",
            &mut self.watchdog.max_consecutive_failures,
        )?;
        override_from(
            &lookup,
            "SHUTDOWN_TIMEOUT_MS",
            &mut self.shutdown.shutdown_timeout_ms,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> GuardResult<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(GuardError::Config("failure_threshold must be at least 1".into()));
        }
        if self.breaker.success_threshold == 0 {
            return Err(GuardError::Config("success_threshold must be at least 1".into()));
        }
        if self.breaker.timeout_ms == 0 {
            return Err(GuardError::Config("timeout_ms must be positive".into()));
        }
        if !(self.retry.retry_backoff >= 1.0) {
            return Err(GuardError::Config(format!(
                "retry_backoff must be >= 1.0, got {}",
                self.retry.retry_backoff
            )));
        }
        if self.watchdog.check_interval_ms == 0 || self.health.check_interval_ms == 0 {
            return Err(GuardError::Config("check intervals must be positive".into()));
        }
        if self.watchdog.probe_timeout_ms == 0 || self.health.database_timeout_ms == 0 {
            return Err(GuardError::Config("probe deadlines must be positive".into()));
        }
        if self.watchdog.max_consecutive_failures == 0 {
            return Err(GuardError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Minimal timings for tests
    #[cfg(test)]
    pub fn minimal() -> Self {
        Self {
            breaker: BreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                timeout_ms: 1_000,
                reset_timeout_ms: 2_000,
                history_size: 5,
            },
            retry: RetryConfig {
                max_retries: 2,
                retry_delay_ms: 100,
                retry_backoff: 2.0,
            },
            recovery: RecoveryConfig {
                recovery_delay_ms: 10,
                max_history_size: 10,
                ..Default::default()
            },
            watchdog: WatchdogConfig {
                check_interval_ms: 1_000,
                max_consecutive_failures: 2,
                probe_timeout_ms: 500,
            },
            health: HealthConfig {
                check_interval_ms: 1_000,
                max_history_size: 5,
                ..Default::default()
            },
            shutdown: ShutdownConfig {
                shutdown_timeout_ms: 500,
            },
        }
    }
}

fn override_from<T, F>(lookup: &F, key: &str, slot: &mut T) -> GuardResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let name = format!("{}{}", ENV_PREFIX, key);
    if let Some(raw) = lookup(&name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| GuardError::Config(format!("{}={:?}: {}", name, raw, e)))?;
    }
    Ok(())
}
