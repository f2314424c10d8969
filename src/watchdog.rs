//! Connection watchdog
//!
//! Probes one connection on a fixed interval and hands it to the recovery
//! manager after enough consecutive failed probes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::WatchdogConfig;
use crate::connection::{self, ConnectionManager, DEFAULT_CONNECTION_ID};
use crate::recovery::{AutoRecoveryManager, RecoveryContext};
use crate::scheduler::{spawn_periodic, PeriodicTask};

pub struct ConnectionWatchdog {
    manager: Arc<dyn ConnectionManager>,
    recovery: Arc<AutoRecoveryManager>,
    config: WatchdogConfig,
    connection_id: String,
    consecutive_failures: AtomicU32,
    task: Mutex<Option<PeriodicTask>>,
}

impl ConnectionWatchdog {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        recovery: Arc<AutoRecoveryManager>,
        config: WatchdogConfig,
        connection_id: Option<&str>,
    ) -> Self {
        Self {
            manager,
            recovery,
            config,
            connection_id: connection_id.unwrap_or(DEFAULT_CONNECTION_ID).to_string(),
            consecutive_failures: AtomicU32::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Begin probing every `check_interval`. Calling again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::debug!("Watchdog for '{}' already running", self.connection_id);
            return;
        }

        let watchdog = self.clone();
        *task = Some(spawn_periodic(
            "watchdog",
            self.config.check_interval(),
            move || {
                let watchdog = watchdog.clone();
                async move { watchdog.check_connection().await }
            },
        ));

        tracing::info!(
            "Connection watchdog started for '{}' (interval: {}ms, threshold: {})",
            self.connection_id,
            self.config.check_interval_ms,
            self.config.max_consecutive_failures
        );
    }

    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("Connection watchdog stopped for '{}'", self.connection_id);
        }
    }

    /// One probe cycle. Never fails; problems are counted and logged.
    pub async fn check_connection(&self) {
        let result = connection::probe(
            self.manager.as_ref(),
            Some(&self.connection_id),
            self.config.probe_timeout(),
        )
        .await;

        let error = match result {
            Ok(latency) => {
                let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
                if previous > 0 {
                    tracing::info!(
                        "Connection '{}' healthy again after {} failed probes ({}ms)",
                        self.connection_id,
                        previous,
                        latency.as_millis()
                    );
                }
                return;
            }
            Err(e) => e,
        };

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!(
            "Watchdog probe {}/{} failed for '{}': {}",
            failures,
            self.config.max_consecutive_failures,
            self.connection_id,
            error
        );

        if failures < self.config.max_consecutive_failures {
            return;
        }

        let context = RecoveryContext::new("watchdog").with_connection(&self.connection_id);
        let recovered = self.recovery.attempt_recovery(&error, &context).await;
        if recovered {
            tracing::info!("Watchdog recovery succeeded for '{}'", self.connection_id);
        } else {
            tracing::error!(
                "Watchdog recovery failed for '{}' after {} consecutive failures",
                self.connection_id,
                failures
            );
        }

        // next trigger needs a fresh run of failures either way
        self.consecutive_failures.store(0, Ordering::Release);
    }
}
