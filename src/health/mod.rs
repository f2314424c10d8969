//! Health monitoring
//!
//! A diagnostic run executes five independent checks and reports the worst of
//! their statuses. Results are kept in a bounded history for trend stats.

mod checks;
mod history;
mod monitor;

pub use checks::{default_env_lookup, EnvLookup};
pub use history::{HealthHistory, HealthStats};
pub use monitor::HealthMonitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHECK_DATABASE: &str = "database";
pub const CHECK_MEMORY: &str = "memory";
pub const CHECK_RESPONSE_TIME: &str = "responseTime";
pub const CHECK_CONNECTION_POOL: &str = "connectionPool";
pub const CHECK_ENVIRONMENT: &str = "environment";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,

    /// Measurements; shape depends on the check
    #[serde(default)]
    pub details: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn healthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Healthy,
            details,
            error: None,
        }
    }

    pub fn degraded(details: serde_json::Value, reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            details,
            error: Some(reason.into()),
        }
    }

    pub fn unhealthy(details: serde_json::Value, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            details,
            error: Some(error.into()),
        }
    }
}

/// Result of a full diagnostic run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,

    /// Set when the run itself broke; `checks` then holds what completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Worst status among `checks`; HEALTHY when empty
pub fn calculate_overall_status<'a, I>(checks: I) -> HealthStatus
where
    I: IntoIterator<Item = &'a CheckResult>,
{
    checks
        .into_iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}
