//! Connection layer contract
//!
//! The governance layer never talks to a database driver directly. It goes
//! through a [`ConnectionManager`] that hands out [`PoolHandle`]s by id, and
//! each handle hands out [`Connection`]s.

pub mod tcp;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{GuardError, GuardResult};

pub use tcp::{target_from_database_url, TcpConnectionManager, TcpPool, TcpPoolOptions};

/// Id used when callers do not name a connection
pub const DEFAULT_CONNECTION_ID: &str = "default";

/// Trivial round-trip used by probes and health checks
pub const PROBE_SQL: &str = "SELECT 1";

/// Rows returned by a query
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
}

impl QueryOutput {
    pub fn from_rows(rows: Vec<serde_json::Value>) -> Self {
        let row_count = rows.len();
        Self { rows, row_count }
    }
}

/// A checked-out database connection
#[async_trait]
pub trait Connection: Send {
    async fn query(&mut self, sql: &str) -> GuardResult<QueryOutput>;

    /// Hand the connection back to its pool
    async fn release(self: Box<Self>);
}

/// Raw pool handle created by the connection manager
#[async_trait]
pub trait PoolHandle: Send + Sync {
    async fn connect(&self) -> GuardResult<Box<dyn Connection>>;

    /// Close the pool; later `connect` calls fail
    async fn end(&self) -> GuardResult<()>;

    fn total_count(&self) -> usize;
    fn idle_count(&self) -> usize;
    fn waiting_count(&self) -> usize;

    fn saturation(&self) -> PoolSaturation {
        PoolSaturation {
            total: self.total_count(),
            idle: self.idle_count(),
            waiting: self.waiting_count(),
        }
    }
}

/// Owner of the raw pools, looked up by connection id
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Pool for `id`, or the default pool when `id` is `None`
    async fn get_connection(&self, id: Option<&str>) -> GuardResult<Arc<dyn PoolHandle>>;

    /// Re-establish connectivity for `id` without replacing the pool
    async fn reconnect(&self, id: &str) -> GuardResult<()>;

    /// Replace the pool for `id` with a fresh one
    async fn reset_pool(&self, id: &str) -> GuardResult<()>;

    async fn close_all(&self) -> GuardResult<()>;

    fn connection_ids(&self) -> Vec<String>;
}

/// Live-connection accounting of a raw pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolSaturation {
    pub total: usize,
    pub idle: usize,
    pub waiting: usize,
}

/// Open a connection, run [`PROBE_SQL`] and release it, bounded by `deadline`.
///
/// Returns the round-trip latency. Does not touch any circuit breaker.
pub async fn probe(
    manager: &dyn ConnectionManager,
    id: Option<&str>,
    deadline: Duration,
) -> GuardResult<Duration> {
    let started = Instant::now();
    let round_trip = async {
        let pool = manager.get_connection(id).await?;
        let mut conn = pool.connect().await?;
        let result = conn.query(PROBE_SQL).await;
        conn.release().await;
        result.map(|_| ())
    };

    match tokio::time::timeout(deadline, round_trip).await {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(GuardError::Timeout(deadline)),
    }
}
