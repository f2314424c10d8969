//! Scripted connection manager for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{
    Connection, ConnectionManager, PoolHandle, PoolSaturation, QueryOutput, DEFAULT_CONNECTION_ID,
};
use crate::error::{GuardError, GuardResult};

#[derive(Default)]
pub struct ScriptedPool {
    connect_failures: Mutex<VecDeque<GuardError>>,
    query_failures: Mutex<VecDeque<GuardError>>,
    /// Fails every connect until `heal()`
    outage: Mutex<Option<GuardError>>,
    saturation: Mutex<PoolSaturation>,
    connect_delay: Mutex<Option<Duration>>,
    pub connects: AtomicU32,
    pub queries: AtomicU32,
    pub released: AtomicU32,
    pub ended: AtomicBool,
}

impl ScriptedPool {
    pub fn fail_next_connects(&self, n: usize, err: GuardError) {
        let mut q = self.connect_failures.lock();
        for _ in 0..n {
            q.push_back(err.clone());
        }
    }

    pub fn fail_next_queries(&self, n: usize, err: GuardError) {
        let mut q = self.query_failures.lock();
        for _ in 0..n {
            q.push_back(err.clone());
        }
    }

    pub fn slow_connects(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    pub fn start_outage(&self, err: GuardError) {
        *self.outage.lock() = Some(err);
    }

    pub fn heal(&self) {
        *self.outage.lock() = None;
        self.connect_failures.lock().clear();
        self.query_failures.lock().clear();
    }

    pub fn set_saturation(&self, saturation: PoolSaturation) {
        *self.saturation.lock() = saturation;
    }
}

struct ScriptedConnection {
    pool: Arc<ScriptedPool>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, _sql: &str) -> GuardResult<QueryOutput> {
        self.pool.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.pool.query_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(QueryOutput::from_rows(vec![serde_json::json!({ "?column?": 1 })]))
    }

    async fn release(self: Box<Self>) {
        self.pool.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct PoolRef(Arc<ScriptedPool>);

#[async_trait]
impl PoolHandle for PoolRef {
    async fn connect(&self) -> GuardResult<Box<dyn Connection>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.0.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.0.outage.lock().clone() {
            return Err(err);
        }
        if let Some(err) = self.0.connect_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(Box::new(ScriptedConnection {
            pool: self.0.clone(),
        }))
    }

    async fn end(&self) -> GuardResult<()> {
        self.0.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn total_count(&self) -> usize {
        self.0.saturation.lock().total
    }

    fn idle_count(&self) -> usize {
        self.0.saturation.lock().idle
    }

    fn waiting_count(&self) -> usize {
        self.0.saturation.lock().waiting
    }
}

#[derive(Default)]
pub struct ScriptedManager {
    pub pool: Arc<ScriptedPool>,
    pub reconnects: AtomicU32,
    pub resets: AtomicU32,
    pub closes: AtomicU32,
    reconnect_error: Mutex<Option<GuardError>>,
    close_delay: Mutex<Option<Duration>>,
}

impl ScriptedManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reconnects(&self, err: GuardError) {
        *self.reconnect_error.lock() = Some(err);
    }

    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl ConnectionManager for ScriptedManager {
    async fn get_connection(&self, id: Option<&str>) -> GuardResult<Arc<dyn PoolHandle>> {
        match id {
            None | Some(DEFAULT_CONNECTION_ID) => Ok(Arc::new(PoolRef(self.pool.clone()))),
            Some(other) => Err(GuardError::UnknownConnection(other.to_string())),
        }
    }

    async fn reconnect(&self, _id: &str) -> GuardResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        match self.reconnect_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn reset_pool(&self, _id: &str) -> GuardResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.pool.heal();
        Ok(())
    }

    async fn close_all(&self) -> GuardResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.close_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pool.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connection_ids(&self) -> Vec<String> {
        vec![DEFAULT_CONNECTION_ID.to_string()]
    }
}
