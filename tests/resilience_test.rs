//! End-to-end resilience tests against a local TCP listener
//!
//! Covers:
//! - Breaker, retry and recovery around a refusing endpoint
//! - Watchdog escalation
//! - Pool replacement and graceful shutdown

mod common;

use common::{closed_addr, create_context, fast_config, tcp_manager, TestDatabase};
use dbguard::connection::{self, ConnectionManager, PoolHandle};
use dbguard::{CircuitState, ErrorPattern, GuardError, RecoveryStrategy, ShutdownOutcome};
use std::time::Duration;

#[tokio::test]
async fn test_query_against_live_endpoint() {
    let db = TestDatabase::start().await;
    let context = create_context(&db.addr, fast_config());

    for _ in 0..3 {
        let out = context.query("SELECT 1").await.unwrap();
        assert_eq!(out.row_count, 1);
    }

    let stats = context.pool().get_stats().await;
    assert_eq!(stats.connections.attempts, 3);
    // the socket is reused between queries
    assert_eq!(stats.pool.unwrap().total, 1);
    db.stop().await;
}

#[tokio::test]
async fn test_refused_endpoint_trips_breaker_and_records_recovery() {
    let context = create_context(&closed_addr(), fast_config());

    let err = context.query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, GuardError::ConnectionRefused(_)), "{}", err);
    assert_eq!(context.pool().breaker().state(), CircuitState::Open);

    // reconnect was attempted and failed
    let stats = context.recovery().get_recovery_stats();
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.recent_attempts[0].pattern, ErrorPattern::ConnectionRefused);
    assert_eq!(stats.recent_attempts[0].strategy, RecoveryStrategy::Reconnect);

    let err = context.query("SELECT 1").await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(context.recovery().get_recovery_stats().total_attempts, 1);
}

#[tokio::test]
async fn test_breaker_closes_after_endpoint_returns() {
    let db = TestDatabase::start().await;
    let context = create_context(&db.addr, fast_config());
    let breaker = context.pool().breaker();

    breaker.record_failure(&GuardError::ConnectionLost("reset".into()));
    breaker.record_failure(&GuardError::ConnectionLost("reset".into()));
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(250)).await;
    context.query("SELECT 1").await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);

    let status = breaker.get_status();
    let path: Vec<(CircuitState, CircuitState)> = status
        .recent_transitions
        .iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        path,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    db.stop().await;
}

#[tokio::test]
async fn test_watchdog_escalates_to_recovery() {
    let context = create_context(&closed_addr(), fast_config());
    let watchdog = context.watchdog();

    watchdog.check_connection().await;
    assert_eq!(watchdog.consecutive_failures(), 1);
    watchdog.check_connection().await;
    assert_eq!(watchdog.consecutive_failures(), 0);

    let stats = context.recovery().get_recovery_stats();
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.recent_attempts[0].source, "watchdog");
    // probes never go through the breaker
    assert_eq!(context.pool().breaker().get_status().total_requests, 0);
}

#[tokio::test]
async fn test_watchdog_timer_runs_in_background() {
    let context = create_context(&closed_addr(), fast_config());
    context.start_background();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(context.recovery().get_recovery_stats().total_attempts >= 1);

    context.watchdog().stop().await;
    context.health().stop().await;
}

#[tokio::test]
async fn test_reset_pool_installs_fresh_pool() {
    let db = TestDatabase::start().await;
    let manager = tcp_manager(&db.addr);

    let old = manager.get_connection(None).await.unwrap();
    manager.reset_pool("default").await.unwrap();
    assert!(old.connect().await.is_err());

    let latency = connection::probe(manager.as_ref(), None, Duration::from_secs(1)).await;
    assert!(latency.is_ok());
    db.stop().await;
}

#[tokio::test]
async fn test_lost_endpoint_is_detected() {
    let db = TestDatabase::start().await;
    let addr = db.addr.clone();
    let manager = tcp_manager(&addr);

    connection::probe(manager.as_ref(), None, Duration::from_secs(1))
        .await
        .unwrap();
    db.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the idle socket was closed by the peer
    let err = connection::probe(manager.as_ref(), None, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, GuardError::ConnectionLost(_) | GuardError::ConnectionRefused(_)),
        "{}",
        err
    );
}

#[tokio::test]
async fn test_graceful_shutdown_closes_pools() {
    let db = TestDatabase::start().await;
    let context = create_context(&db.addr, fast_config());
    context.query("SELECT 1").await.unwrap();
    context.start_background();

    assert_eq!(context.shutdown().shutdown(0).await, ShutdownOutcome::Drained);
    assert_eq!(
        context.shutdown().shutdown(0).await,
        ShutdownOutcome::AlreadyInProgress
    );
    assert!(!context.watchdog().is_running());
    assert!(!context.health().is_running());

    let err = context.pool().connect().await.err().unwrap();
    assert!(matches!(err, GuardError::ConnectionLost(_)));
    db.stop().await;
}
