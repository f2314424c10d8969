//! Process-wide wiring of the governance components
//!
//! Built once at startup and shared behind an `Arc`. Every component gets its
//! collaborators here; none of them reaches for global state.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use crate::config::GuardConfig;
use crate::connection::{ConnectionManager, QueryOutput};
use crate::error::GuardResult;
use crate::health::{default_env_lookup, EnvLookup, HealthMonitor};
use crate::pool::SmartConnectionPool;
use crate::recovery::{AutoRecoveryManager, RecoveryContext};
use crate::shutdown::{ExitHook, GracefulShutdown};
use crate::tools::GuardTool;
use crate::watchdog::ConnectionWatchdog;

/// Hooks that tests and embedders replace
pub struct ContextOptions {
    pub connection_id: Option<String>,
    pub env_lookup: EnvLookup,
    pub exit: ExitHook,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            connection_id: None,
            env_lookup: default_env_lookup(),
            exit: Arc::new(|code: i32| std::process::exit(code)),
        }
    }
}

pub struct GuardContext {
    config: GuardConfig,
    manager: Arc<dyn ConnectionManager>,
    pool: Arc<SmartConnectionPool>,
    recovery: Arc<AutoRecoveryManager>,
    watchdog: Arc<ConnectionWatchdog>,
    health: Arc<HealthMonitor>,
    shutdown: Arc<GracefulShutdown>,
}

impl GuardContext {
    pub fn new(config: GuardConfig, manager: Arc<dyn ConnectionManager>) -> Self {
        Self::with_options(config, manager, ContextOptions::default())
    }

    pub fn with_options(
        config: GuardConfig,
        manager: Arc<dyn ConnectionManager>,
        options: ContextOptions,
    ) -> Self {
        let pool = Arc::new(SmartConnectionPool::new(
            manager.clone(),
            options.connection_id.as_deref(),
            config.breaker.clone(),
            config.retry.clone(),
        ));
        let recovery = Arc::new(AutoRecoveryManager::new(
            manager.clone(),
            Some(pool.clone()),
            config.recovery.clone(),
        ));
        let watchdog = Arc::new(ConnectionWatchdog::new(
            manager.clone(),
            recovery.clone(),
            config.watchdog.clone(),
            Some(pool.connection_id()),
        ));
        let health = Arc::new(
            HealthMonitor::new(manager.clone(), Some(pool.clone()), config.health.clone())
                .with_env_lookup(options.env_lookup),
        );
        let shutdown = Arc::new(
            GracefulShutdown::new(manager.clone(), config.shutdown.clone())
                .with_watchdog(watchdog.clone())
                .with_health_monitor(health.clone())
                .with_exit_hook(options.exit),
        );

        Self {
            config,
            manager,
            pool,
            recovery,
            watchdog,
            health,
            shutdown,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<dyn ConnectionManager> {
        &self.manager
    }

    pub fn pool(&self) -> &Arc<SmartConnectionPool> {
        &self.pool
    }

    pub fn recovery(&self) -> &Arc<AutoRecoveryManager> {
        &self.recovery
    }

    pub fn watchdog(&self) -> &Arc<ConnectionWatchdog> {
        &self.watchdog
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn shutdown(&self) -> &Arc<GracefulShutdown> {
        &self.shutdown
    }

    /// Start the watchdog and the periodic health monitor
    pub fn start_background(&self) {
        self.watchdog.start();
        self.health.start();
    }

    /// Run `operation` through the pool's breaker and retry loop.
    ///
    /// When retries are exhausted the error goes to auto-recovery. A successful
    /// recovery earns one more attempt; otherwise the original error is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let error = match self.pool.execute_with_retry(&mut operation).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let context = RecoveryContext::new("request").with_connection(self.pool.connection_id());
        if !self.recovery.attempt_recovery(&error, &context).await {
            return Err(error);
        }

        tracing::info!("Recovered from '{}', retrying operation once", error);
        self.pool.execute_with_retries(&mut operation, 0).await
    }

    /// Run `sql` with breaker, retry and recovery
    pub async fn query(&self, sql: &str) -> GuardResult<QueryOutput> {
        self.run(|| self.pool.round_trip(sql)).await
    }

    /// JSON payload for a tool invocation
    pub async fn call_tool(&self, tool: GuardTool) -> GuardResult<serde_json::Value> {
        tracing::debug!("Tool call: {}", tool);
        let value = match tool {
            GuardTool::HealthCheck => serde_json::to_value(self.health.run_diagnostics().await)?,
            GuardTool::GetConnectionStats => serde_json::to_value(self.pool.get_stats().await)?,
            GuardTool::GetRecoveryStats => serde_json::to_value(self.recovery.get_recovery_stats())?,
            GuardTool::ResetCircuitBreaker => {
                self.pool.breaker().reset();
                json!({
                    "success": true,
                    "message": "Circuit breaker reset to CLOSED",
                    "circuit_breaker": self.pool.breaker().get_status(),
                })
            }
        };
        Ok(value)
    }
}
