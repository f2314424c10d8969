use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::checks::{self, default_env_lookup, EnvLookup};
use super::history::{HealthHistory, HealthStats};
use super::{
    calculate_overall_status, CheckResult, HealthCheckResult, HealthStatus, CHECK_CONNECTION_POOL,
    CHECK_DATABASE, CHECK_ENVIRONMENT, CHECK_MEMORY, CHECK_RESPONSE_TIME,
};
use crate::config::HealthConfig;
use crate::connection::{ConnectionManager, DEFAULT_CONNECTION_ID};
use crate::pool::SmartConnectionPool;
use crate::scheduler::{spawn_periodic, PeriodicTask};

pub struct HealthMonitor {
    manager: Arc<dyn ConnectionManager>,
    pool: Option<Arc<SmartConnectionPool>>,
    connection_id: String,
    config: HealthConfig,
    env_lookup: EnvLookup,
    history: Mutex<HealthHistory>,
    task: Mutex<Option<PeriodicTask>>,
}

#[derive(Default)]
struct Report {
    checks: BTreeMap<String, CheckResult>,
    errors: Vec<String>,
}

impl Report {
    /// Run one check; a panic is recorded as a run error instead of a result
    async fn run<Fut>(&mut self, name: &str, check: Fut)
    where
        Fut: Future<Output = CheckResult>,
    {
        match AssertUnwindSafe(check).catch_unwind().await {
            Ok(result) => {
                self.checks.insert(name.to_string(), result);
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Health check '{}' panicked: {}", name, message);
                self.errors.push(format!("{} check failed: {}", name, message));
            }
        }
    }
}

impl HealthMonitor {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        pool: Option<Arc<SmartConnectionPool>>,
        config: HealthConfig,
    ) -> Self {
        let connection_id = pool
            .as_ref()
            .map(|p| p.connection_id().to_string())
            .unwrap_or_else(|| DEFAULT_CONNECTION_ID.to_string());

        Self {
            manager,
            pool,
            connection_id,
            history: Mutex::new(HealthHistory::new(config.max_history_size)),
            config,
            env_lookup: default_env_lookup(),
            task: Mutex::new(None),
        }
    }

    /// Replace how the environment check reads variables
    pub fn with_env_lookup(mut self, lookup: EnvLookup) -> Self {
        self.env_lookup = lookup;
        self
    }

    /// Run every check, record the result and return it
    pub async fn run_diagnostics(&self) -> HealthCheckResult {
        let started = Instant::now();
        let mut report = Report::default();

        report
            .run(
                CHECK_DATABASE,
                checks::check_database(
                    self.manager.as_ref(),
                    &self.connection_id,
                    self.config.database_timeout(),
                ),
            )
            .await;
        report.run(CHECK_MEMORY, checks::check_memory()).await;
        report
            .run(
                CHECK_RESPONSE_TIME,
                checks::check_response_time(Duration::from_millis(self.config.slow_response_ms)),
            )
            .await;
        report
            .run(CHECK_CONNECTION_POOL, checks::check_connection_pool(self.pool.as_deref()))
            .await;
        report
            .run(CHECK_ENVIRONMENT, async {
                checks::check_environment(&self.config.required_env, &self.env_lookup)
            })
            .await;

        let error = (!report.errors.is_empty()).then(|| report.errors.join("; "));
        let status = if error.is_some() {
            HealthStatus::Unhealthy
        } else {
            calculate_overall_status(report.checks.values())
        };

        let result = HealthCheckResult {
            status,
            checks: report.checks,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            error,
        };

        if result.status != HealthStatus::Healthy {
            let failing: Vec<&str> = result
                .checks
                .iter()
                .filter(|(_, c)| c.status != HealthStatus::Healthy)
                .map(|(name, _)| name.as_str())
                .collect();
            tracing::warn!("Health {} (checks: {:?})", result.status, failing);
        } else {
            tracing::debug!("Health check passed in {}ms", result.duration_ms);
        }

        self.record_health(result.clone());
        result
    }

    pub fn record_health(&self, result: HealthCheckResult) {
        self.history.lock().record(result);
    }

    pub fn get_health_stats(&self) -> HealthStats {
        self.history.lock().stats()
    }

    pub fn latest(&self) -> Option<HealthCheckResult> {
        self.history.lock().latest().cloned()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run diagnostics every `check_interval`. Calling again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let monitor = self.clone();
        *task = Some(spawn_periodic("health-monitor", self.config.check_interval(), move || {
            let monitor = monitor.clone();
            async move {
                monitor.run_diagnostics().await;
            }
        }));
        tracing::info!(
            "Health monitor started (interval: {}ms)",
            self.config.check_interval_ms
        );
    }

    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Health monitor stopped");
        }
    }
}
