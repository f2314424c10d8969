//! Auto-recovery manager

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::event::{RecoveryAttempt, RecoveryContext, RecoveryStats, RecoveryStrategy};
use super::patterns::{classify, ErrorPattern};
use crate::config::RecoveryConfig;
use crate::connection::{ConnectionManager, DEFAULT_CONNECTION_ID};
use crate::error::{GuardError, GuardResult};
use crate::pool::SmartConnectionPool;

/// Entries returned in `recent_attempts`
const RECENT_ATTEMPTS: usize = 10;

pub struct AutoRecoveryManager {
    manager: Arc<dyn ConnectionManager>,
    /// Pool whose breaker CIRCUIT_RESET acts on
    pool: Option<Arc<SmartConnectionPool>>,
    config: RecoveryConfig,
    enabled: AtomicBool,
    strategies: RwLock<HashMap<ErrorPattern, RecoveryStrategy>>,
    attempts: Mutex<HashMap<ErrorPattern, u32>>,
    history: Mutex<VecDeque<RecoveryAttempt>>,
    total: AtomicU64,
    successful: AtomicU64,
}

impl AutoRecoveryManager {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        pool: Option<Arc<SmartConnectionPool>>,
        config: RecoveryConfig,
    ) -> Self {
        let strategies = ErrorPattern::ALL
            .into_iter()
            .map(|p| (p, RecoveryStrategy::default_for(p)))
            .collect();

        Self {
            manager,
            pool,
            enabled: AtomicBool::new(config.enabled),
            config,
            strategies: RwLock::new(strategies),
            attempts: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Override the strategy used for `pattern`
    pub fn set_strategy(&self, pattern: ErrorPattern, strategy: RecoveryStrategy) {
        self.strategies.write().insert(pattern, strategy);
    }

    pub fn strategy_for(&self, pattern: ErrorPattern) -> RecoveryStrategy {
        self.strategies
            .read()
            .get(&pattern)
            .copied()
            .unwrap_or_else(|| RecoveryStrategy::default_for(pattern))
    }

    pub fn identify_error_pattern(&self, error: &GuardError) -> Option<ErrorPattern> {
        classify(error)
    }

    /// Try to remediate `error`.
    ///
    /// Returns `false` without doing anything when recovery is disabled, the
    /// error is unclassified, or its pattern has used up its attempts. Otherwise
    /// waits `recovery_delay`, runs the mapped strategy, records the attempt and
    /// returns whether the strategy succeeded.
    pub async fn attempt_recovery(&self, error: &GuardError, context: &RecoveryContext) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let Some(pattern) = classify(error) else {
            tracing::debug!("No recovery pattern for error: {}", error);
            return false;
        };

        {
            let mut attempts = self.attempts.lock();
            let used = attempts.entry(pattern).or_insert(0);
            if *used >= self.config.max_recovery_attempts {
                tracing::warn!(
                    "Recovery for {} exhausted ({} attempts), escalating to caller",
                    pattern,
                    used
                );
                return false;
            }
            *used += 1;
        }

        let strategy = self.strategy_for(pattern);
        let connection_id = context
            .connection_id
            .clone()
            .or_else(|| self.pool.as_ref().map(|p| p.connection_id().to_string()))
            .unwrap_or_else(|| DEFAULT_CONNECTION_ID.to_string());

        tracing::info!(
            "Attempting {} recovery for {} on '{}' (requested by {})",
            strategy,
            pattern,
            connection_id,
            context.source
        );

        tokio::time::sleep(self.config.recovery_delay()).await;

        let started = Instant::now();
        let result = self.execute_strategy(strategy, &connection_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let attempt = RecoveryAttempt::new(pattern, strategy, error.to_string(), context, &connection_id)
            .with_duration(duration_ms);
        let attempt = match &result {
            Ok(()) => {
                tracing::info!("{} recovery for {} succeeded in {}ms", strategy, pattern, duration_ms);
                attempt
            }
            Err(e) => {
                tracing::warn!("{} recovery for {} failed: {}", strategy, pattern, e);
                attempt.failed(e.to_string())
            }
        };
        self.record(attempt);

        result.is_ok()
    }

    async fn execute_strategy(&self, strategy: RecoveryStrategy, connection_id: &str) -> GuardResult<()> {
        match strategy {
            RecoveryStrategy::Reconnect => self.manager.reconnect(connection_id).await,
            RecoveryStrategy::ResetPool => self.manager.reset_pool(connection_id).await,
            RecoveryStrategy::CircuitReset => match &self.pool {
                Some(pool) => {
                    pool.breaker().reset();
                    Ok(())
                }
                None => Err(GuardError::InternalError(
                    "no circuit breaker registered for recovery".to_string(),
                )),
            },
            RecoveryStrategy::ClearCache | RecoveryStrategy::Restart => {
                tracing::info!("{} has no effect yet; reporting success", strategy);
                Ok(())
            }
        }
    }

    fn record(&self, attempt: RecoveryAttempt) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if attempt.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }

        let mut history = self.history.lock();
        if self.config.max_history_size == 0 {
            return;
        }
        while history.len() >= self.config.max_history_size {
            history.pop_front();
        }
        history.push_back(attempt);
    }

    pub fn get_recovery_stats(&self) -> RecoveryStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let history = self.history.lock();
        let recent_attempts = history
            .iter()
            .skip(history.len().saturating_sub(RECENT_ATTEMPTS))
            .cloned()
            .collect();

        RecoveryStats {
            enabled: self.is_enabled(),
            total_attempts: total,
            successful_attempts: successful,
            failed_attempts: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            max_recovery_attempts: self.config.max_recovery_attempts,
            attempts_by_pattern: self
                .attempts
                .lock()
                .iter()
                .map(|(p, n)| (*p, *n))
                .collect::<BTreeMap<_, _>>(),
            recent_attempts,
        }
    }

    /// Full history, oldest first
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().iter().cloned().collect()
    }

    /// Clear per-pattern counters and history
    pub fn reset(&self) {
        self.attempts.lock().clear();
        self.history.lock().clear();
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        tracing::info!("Recovery counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::config::GuardConfig;
    use crate::test_support::ScriptedManager;
    use std::time::Duration;

    fn setup() -> (Arc<ScriptedManager>, Arc<SmartConnectionPool>, AutoRecoveryManager) {
        let config = GuardConfig::minimal();
        let manager = Arc::new(ScriptedManager::new());
        let pool = Arc::new(SmartConnectionPool::new(
            manager.clone(),
            None,
            config.breaker,
            config.retry,
        ));
        let recovery = AutoRecoveryManager::new(manager.clone(), Some(pool.clone()), config.recovery);
        (manager, pool, recovery)
    }

    fn ctx() -> RecoveryContext {
        RecoveryContext::new("test")
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_strategy() {
        let (manager, _pool, recovery) = setup();
        let err = GuardError::ConnectionLost("server closed the connection".into());

        assert!(recovery.attempt_recovery(&err, &ctx()).await);
        assert_eq!(manager.reconnects.load(Ordering::SeqCst), 1);

        let stats = recovery.get_recovery_stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_attempts, 1);
        assert_eq!(stats.attempts_by_pattern[&ErrorPattern::ConnectionLost], 1);
        assert_eq!(stats.recent_attempts[0].strategy, RecoveryStrategy::Reconnect);
        assert_eq!(stats.recent_attempts[0].connection_id, "default");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_per_pattern() {
        let (manager, _pool, recovery) = setup();
        let err = GuardError::Database("connect ECONNREFUSED 127.0.0.1:5432".into());

        for _ in 0..3 {
            assert!(recovery.attempt_recovery(&err, &ctx()).await);
        }
        assert!(!recovery.attempt_recovery(&err, &ctx()).await);
        assert_eq!(manager.reconnects.load(Ordering::SeqCst), 3);
        assert_eq!(recovery.get_recovery_stats().total_attempts, 3);

        // other patterns keep their own budget
        let pool_err = GuardError::PoolExhausted("busy".into());
        assert!(recovery.attempt_recovery(&pool_err, &ctx()).await);
        assert_eq!(manager.resets.load(Ordering::SeqCst), 1);

        recovery.reset();
        assert!(recovery.attempt_recovery(&err, &ctx()).await);
        assert_eq!(manager.reconnects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unclassified_and_disabled_do_nothing() {
        let (manager, _pool, recovery) = setup();

        let err = GuardError::Database("duplicate key value violates unique constraint".into());
        assert!(!recovery.attempt_recovery(&err, &ctx()).await);

        recovery.set_enabled(false);
        let err = GuardError::ConnectionLost("reset".into());
        assert!(!recovery.attempt_recovery(&err, &ctx()).await);

        assert_eq!(manager.reconnects.load(Ordering::SeqCst), 0);
        let stats = recovery.get_recovery_stats();
        assert_eq!(stats.total_attempts, 0);
        assert!(stats.attempts_by_pattern.is_empty());
        assert!(!stats.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_strategy_is_recorded() {
        let (manager, _pool, recovery) = setup();
        manager.fail_reconnects(GuardError::ConnectionRefused("still down".into()));

        let err = GuardError::ConnectionRefused("db:5432".into());
        assert!(!recovery.attempt_recovery(&err, &ctx()).await);

        let stats = recovery.get_recovery_stats();
        assert_eq!(stats.failed_attempts, 1);
        assert_eq!(stats.success_rate, 0.0);
        let attempt = &stats.recent_attempts[0];
        assert!(!attempt.success);
        assert!(attempt.error.as_ref().unwrap().contains("still down"));
        assert!(attempt.trigger.contains("db:5432"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_reset_strategy() {
        let (_manager, pool, recovery) = setup();
        for _ in 0..3 {
            pool.breaker()
                .record_failure(&GuardError::Timeout(Duration::from_secs(1)));
        }
        assert_eq!(pool.breaker().state(), CircuitState::Open);

        let err = GuardError::Timeout(Duration::from_secs(1));
        assert!(recovery.attempt_recovery(&err, &ctx()).await);
        assert_eq!(pool.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inert_strategies_report_success() {
        let (manager, _pool, recovery) = setup();
        recovery.set_strategy(ErrorPattern::SslError, RecoveryStrategy::Restart);

        assert!(recovery
            .attempt_recovery(&GuardError::Tls("handshake".into()), &ctx())
            .await);
        assert!(recovery
            .attempt_recovery(&GuardError::Dns("db.internal".into()), &ctx())
            .await);

        assert_eq!(manager.reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(manager.resets.load(Ordering::SeqCst), 0);
        let history = recovery.history();
        assert_eq!(history[0].strategy, RecoveryStrategy::Restart);
        assert_eq!(history[1].strategy, RecoveryStrategy::ClearCache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_waits_for_delay() {
        let (_manager, _pool, recovery) = setup();
        let started = tokio::time::Instant::now();
        recovery
            .attempt_recovery(&GuardError::ConnectionLost("x".into()), &ctx())
            .await;
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let config = GuardConfig::minimal();
        let manager = Arc::new(ScriptedManager::new());
        let recovery = AutoRecoveryManager::new(
            manager,
            None,
            RecoveryConfig {
                max_recovery_attempts: 100,
                max_history_size: 3,
                ..config.recovery
            },
        );

        for _ in 0..5 {
            recovery
                .attempt_recovery(&GuardError::ConnectionLost("x".into()), &ctx())
                .await;
        }
        assert_eq!(recovery.history().len(), 3);
        assert_eq!(recovery.get_recovery_stats().total_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_connection_id_is_used() {
        let (_manager, _pool, recovery) = setup();
        let ctx = RecoveryContext::new("request").with_connection("reporting");
        recovery
            .attempt_recovery(&GuardError::PoolExhausted("x".into()), &ctx)
            .await;
        assert_eq!(recovery.history()[0].connection_id, "reporting");
    }
}
