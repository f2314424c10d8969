//! Smart connection pool
//!
//! Wraps one raw pool (looked up through the connection manager on every use,
//! so a pool replaced by recovery is picked up immediately) with a circuit
//! breaker, bounded retry with exponential backoff and per-call metrics.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::breaker::{BreakerStatus, CircuitBreaker, CircuitState};
use crate::config::{BreakerConfig, RetryConfig};
use crate::connection::{
    Connection, ConnectionManager, PoolSaturation, QueryOutput, DEFAULT_CONNECTION_ID, PROBE_SQL,
};
use crate::error::GuardResult;

/// Running counters for a smart pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    connection_attempts: AtomicU64,
    connection_successes: AtomicU64,
    connection_failures: AtomicU64,
    queries: AtomicU64,
    query_errors: AtomicU64,
}

impl PoolMetrics {
    fn record_query(&self, ok: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.query_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryCounters {
    pub total: u64,
    pub errors: u64,
    pub error_rate: f64,
}

/// Snapshot returned by [`SmartConnectionPool::get_stats`]
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSaturation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_error: Option<String>,
    pub connections: ConnectionCounters,
    pub queries: QueryCounters,
    pub retry: RetryConfig,
    pub circuit_breaker: BreakerStatus,
}

/// Result of [`SmartConnectionPool::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub circuit_state: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A connection handed out by the smart pool; counts every query it runs
pub struct SmartConnection {
    inner: Box<dyn Connection>,
    metrics: Arc<PoolMetrics>,
}

impl SmartConnection {
    pub async fn query(&mut self, sql: &str) -> GuardResult<QueryOutput> {
        let result = self.inner.query(sql).await;
        self.metrics.record_query(result.is_ok());
        result
    }

    pub async fn release(self) {
        self.inner.release().await;
    }
}

pub struct SmartConnectionPool {
    connection_id: String,
    manager: Arc<dyn ConnectionManager>,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    metrics: Arc<PoolMetrics>,
}

impl SmartConnectionPool {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        connection_id: Option<&str>,
        breaker: BreakerConfig,
        retry: RetryConfig,
    ) -> Self {
        let connection_id = connection_id.unwrap_or(DEFAULT_CONNECTION_ID).to_string();
        Self {
            breaker: CircuitBreaker::new(format!("pool:{}", connection_id), breaker),
            connection_id,
            manager,
            retry,
            metrics: Arc::new(PoolMetrics::default()),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Raw checkout, counted but not gated
    async fn checkout(&self) -> GuardResult<SmartConnection> {
        self.metrics.connection_attempts.fetch_add(1, Ordering::Relaxed);
        let result = async {
            let pool = self.manager.get_connection(Some(&self.connection_id)).await?;
            pool.connect().await
        }
        .await;

        match result {
            Ok(inner) => {
                self.metrics.connection_successes.fetch_add(1, Ordering::Relaxed);
                Ok(SmartConnection {
                    inner,
                    metrics: self.metrics.clone(),
                })
            }
            Err(e) => {
                self.metrics.connection_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Check out a connection through the circuit breaker
    pub async fn connect(&self) -> GuardResult<SmartConnection> {
        self.breaker.execute(|| self.checkout()).await
    }

    /// Run `operation` through the breaker, retrying with backoff up to `max_retries` times
    pub async fn execute_with_retry<T, F, Fut>(&self, operation: F) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        self.execute_with_retries(operation, self.retry.max_retries).await
    }

    /// Same as [`execute_with_retry`](Self::execute_with_retry) with an explicit retry budget.
    ///
    /// A rejection from an OPEN breaker ends the loop at once, and so does a
    /// failure that trips the breaker; that failure is returned unchanged.
    pub async fn execute_with_retries<T, F, Fut>(&self, mut operation: F, retries: u32) -> GuardResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.breaker.execute(|| operation()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_circuit_open() => return Err(e),
                Err(e) if self.breaker.state() == CircuitState::Open => {
                    tracing::warn!(
                        "'{}' attempt {} opened the circuit, not retrying: {}",
                        self.connection_id,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) if attempt < retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "'{}' attempt {} failed: {} (retrying in {}ms, {} left)",
                        self.connection_id,
                        attempt + 1,
                        e,
                        delay.as_millis(),
                        retries - attempt
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if retries > 0 {
                        tracing::warn!(
                            "'{}' giving up after {} attempts: {}",
                            self.connection_id,
                            attempt + 1,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Check out, run `sql`, release; no breaker, no retry
    pub async fn round_trip(&self, sql: &str) -> GuardResult<QueryOutput> {
        let mut conn = self.checkout().await?;
        let result = conn.query(sql).await;
        conn.release().await;
        result
    }

    /// Check out, run `sql`, release; retried as one unit
    pub async fn query(&self, sql: &str) -> GuardResult<QueryOutput> {
        self.execute_with_retry(|| self.round_trip(sql)).await
    }

    pub async fn get_stats(&self) -> PoolStats {
        let (pool, pool_error) = match self.manager.get_connection(Some(&self.connection_id)).await {
            Ok(handle) => (Some(handle.saturation()), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let attempts = self.metrics.connection_attempts.load(Ordering::Relaxed);
        let successes = self.metrics.connection_successes.load(Ordering::Relaxed);
        let queries = self.metrics.queries.load(Ordering::Relaxed);
        let query_errors = self.metrics.query_errors.load(Ordering::Relaxed);

        PoolStats {
            connection_id: self.connection_id.clone(),
            pool,
            pool_error,
            connections: ConnectionCounters {
                attempts,
                successes,
                failures: self.metrics.connection_failures.load(Ordering::Relaxed),
                success_rate: ratio(successes, attempts),
            },
            queries: QueryCounters {
                total: queries,
                errors: query_errors,
                error_rate: ratio(query_errors, queries),
            },
            retry: self.retry.clone(),
            circuit_breaker: self.breaker.get_status(),
        }
    }

    /// One probe round-trip through the breaker, never retried
    pub async fn health_check(&self) -> PoolHealth {
        let started = Instant::now();
        let result = self.breaker.execute(|| self.round_trip(PROBE_SQL)).await;
        let circuit_state = self.breaker.state();

        match result {
            Ok(_) => PoolHealth {
                healthy: true,
                circuit_state,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => PoolHealth {
                healthy: false,
                circuit_state,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl std::fmt::Debug for SmartConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartConnectionPool")
            .field("connection_id", &self.connection_id)
            .field("breaker", &self.breaker)
            .finish()
    }
}
