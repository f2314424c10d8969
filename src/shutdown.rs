//! Graceful shutdown
//!
//! Stops the background loops, drains every pool within a bounded time, then
//! exits the process with the requested code.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::config::ShutdownConfig;
use crate::connection::ConnectionManager;
use crate::health::HealthMonitor;
use crate::watchdog::ConnectionWatchdog;

/// Called with the exit code once draining is over
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Every pool closed in time
    Drained,
    /// Closing pools outlived `shutdown_timeout`
    TimedOut,
    /// Closing pools returned an error
    Failed(String),
    /// Another shutdown was already running; nothing was done
    AlreadyInProgress,
}

pub struct GracefulShutdown {
    manager: Arc<dyn ConnectionManager>,
    watchdog: Option<Arc<ConnectionWatchdog>>,
    health: Option<Arc<HealthMonitor>>,
    config: ShutdownConfig,
    exit: ExitHook,
    in_progress: AtomicBool,
    handlers_registered: AtomicBool,
    started_tx: watch::Sender<bool>,
}

impl GracefulShutdown {
    pub fn new(manager: Arc<dyn ConnectionManager>, config: ShutdownConfig) -> Self {
        let (started_tx, _) = watch::channel(false);
        Self {
            manager,
            watchdog: None,
            health: None,
            config,
            exit: Arc::new(|code: i32| std::process::exit(code)),
            in_progress: AtomicBool::new(false),
            handlers_registered: AtomicBool::new(false),
            started_tx,
        }
    }

    pub fn with_watchdog(mut self, watchdog: Arc<ConnectionWatchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_health_monitor(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Resolves once a shutdown has begun
    pub async fn wait(&self) {
        let mut rx = self.started_tx.subscribe();
        let _ = rx.wait_for(|started| *started).await;
    }

    /// Install SIGINT/SIGTERM handlers that trigger `shutdown(0)`.
    ///
    /// Only the first call installs anything; returns whether this call did.
    pub fn register_signal_handlers(self: &Arc<Self>) -> bool {
        if self.handlers_registered.swap(true, Ordering::AcqRel) {
            return false;
        }

        let shutdown = self.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            tracing::info!("{} received, shutting down", signal);
            shutdown.shutdown(0).await;
        });
        true
    }

    /// Run the shutdown sequence once; concurrent or repeated calls are no-ops.
    pub async fn shutdown(&self, exit_code: i32) -> ShutdownOutcome {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            tracing::debug!("Shutdown already in progress");
            return ShutdownOutcome::AlreadyInProgress;
        }
        let _ = self.started_tx.send(true);
        tracing::info!("Graceful shutdown started (exit code {})", exit_code);

        // one budget covers stopping the loops and draining the pools
        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;

        let stop_loops = async {
            if let Some(watchdog) = &self.watchdog {
                watchdog.stop().await;
            }
            if let Some(health) = &self.health {
                health.stop().await;
            }
        };
        if time::timeout_at(deadline, stop_loops).await.is_err() {
            tracing::warn!("Background loops did not stop within {}ms", timeout.as_millis());
        }

        let outcome = match time::timeout_at(deadline, self.manager.close_all()).await {
            Ok(Ok(())) => {
                tracing::info!("All connection pools closed");
                ShutdownOutcome::Drained
            }
            Ok(Err(e)) => {
                tracing::error!("Error closing connection pools: {}", e);
                ShutdownOutcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Connection pools did not close within {}ms, exiting anyway",
                    timeout.as_millis()
                );
                ShutdownOutcome::TimedOut
            }
        };

        tracing::info!("Shutdown complete");
        (self.exit)(exit_code);
        outcome
    }
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
