use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::{HealthCheckResult, HealthStatus};

/// Bounded FIFO of diagnostic results
#[derive(Debug, Clone)]
pub struct HealthHistory {
    entries: VecDeque<HealthCheckResult>,
    max_size: usize,
}

/// Aggregates over the retained history
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthStats {
    pub total_checks: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    /// Share of retained runs that were HEALTHY, 0-100
    pub uptime_percentage: f64,
    pub average_duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<HealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<DateTime<Utc>>,
}

impl HealthHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    pub fn record(&mut self, result: HealthCheckResult) {
        if self.max_size == 0 {
            return;
        }
        while self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HealthCheckResult> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.entries.iter()
    }

    pub fn stats(&self) -> HealthStats {
        let total = self.entries.len();
        let count = |status| self.entries.iter().filter(|r| r.status == status).count();
        let healthy = count(HealthStatus::Healthy);

        let (uptime_percentage, average_duration_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            let durations: u64 = self.entries.iter().map(|r| r.duration_ms).sum();
            (
                healthy as f64 / total as f64 * 100.0,
                durations as f64 / total as f64,
            )
        };

        HealthStats {
            total_checks: total,
            healthy,
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            uptime_percentage,
            average_duration_ms,
            last_status: self.latest().map(|r| r.status),
            last_check_at: self.latest().map(|r| r.timestamp),
        }
    }
}
