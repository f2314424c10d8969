//! Common test utilities for integration tests
//!
//! Provides shared helpers for:
//! - A local TCP listener standing in for the database
//! - A configuration with short timers
//! - Building a `GuardContext` that never exits the test process

#![allow(dead_code)]

use dbguard::{ContextOptions, GuardConfig, GuardContext, TcpConnectionManager, TcpPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accepts connections and holds them open until stopped
pub struct TestDatabase {
    pub addr: String,
    handle: JoinHandle<()>,
}

impl TestDatabase {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        Self { addr, handle }
    }

    /// Close the listener and every accepted socket
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

/// An address nothing listens on
pub fn closed_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub fn fast_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.breaker.failure_threshold = 2;
    config.breaker.success_threshold = 1;
    config.breaker.timeout_ms = 2_000;
    config.breaker.reset_timeout_ms = 200;
    config.retry.max_retries = 1;
    config.retry.retry_delay_ms = 10;
    config.recovery.recovery_delay_ms = 10;
    config.watchdog.check_interval_ms = 50;
    config.watchdog.max_consecutive_failures = 2;
    config.watchdog.probe_timeout_ms = 500;
    config.health.required_env = Vec::new();
    config.shutdown.shutdown_timeout_ms = 1_000;
    config
}

pub fn tcp_manager(addr: &str) -> Arc<TcpConnectionManager> {
    Arc::new(TcpConnectionManager::new(
        addr,
        TcpPoolOptions {
            max_size: 4,
            connect_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_millis(500),
        },
    ))
}

pub fn create_context(addr: &str, config: GuardConfig) -> Arc<GuardContext> {
    let options = ContextOptions {
        exit: Arc::new(|_: i32| {}),
        ..Default::default()
    };
    Arc::new(GuardContext::with_options(config, tcp_manager(addr), options))
}
