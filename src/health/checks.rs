//! Individual health checks
//!
//! Every check returns a [`CheckResult`]; none of them fail.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::CheckResult;
use crate::breaker::CircuitState;
use crate::connection::{self, ConnectionManager};
use crate::pool::SmartConnectionPool;

/// Environment variable lookup used by the environment check
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn default_env_lookup() -> EnvLookup {
    Arc::new(|key: &str| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

const MB: f64 = 1024.0 * 1024.0;

fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / MB * 100.0).round() / 100.0
}

pub(super) async fn check_database(
    manager: &dyn ConnectionManager,
    connection_id: &str,
    deadline: Duration,
) -> CheckResult {
    match connection::probe(manager, Some(connection_id), deadline).await {
        Ok(latency) => CheckResult::healthy(json!({
            "connection_id": connection_id,
            "latency_ms": latency.as_millis() as u64,
        })),
        Err(e) => CheckResult::unhealthy(json!({ "connection_id": connection_id }), e.to_string()),
    }
}

/// Process memory, read off the async workers.
///
/// A native process has no managed heap, so the heap figures map onto the OS view:
/// `heap_used_mb` is the resident set, `heap_total_mb` the memory installed on
/// the host, and `heap_used_percent` the ratio of the two. `rss_mb` and
/// `virtual_mb` are reported as-is.
pub(super) async fn check_memory() -> CheckResult {
    match tokio::task::spawn_blocking(read_memory).await {
        Ok(result) => result,
        Err(e) => CheckResult::degraded(json!({}), format!("memory unavailable: {}", e)),
    }
}

fn read_memory() -> CheckResult {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => return CheckResult::degraded(json!({}), format!("memory unavailable: {}", e)),
    };
    sys.refresh_process(pid);
    let Some(process) = sys.process(pid) else {
        return CheckResult::degraded(json!({}), "memory unavailable: process not found");
    };

    let rss = process.memory();
    let total = sys.total_memory();
    let heap_used_percent = if total == 0 {
        0.0
    } else {
        (rss as f64 / total as f64 * 10_000.0).round() / 100.0
    };

    CheckResult::healthy(json!({
        "heap_used_mb": to_mb(rss),
        "heap_total_mb": to_mb(total),
        "heap_used_percent": heap_used_percent,
        "rss_mb": to_mb(rss),
        "virtual_mb": to_mb(process.virtual_memory()),
        "system_used_mb": to_mb(sys.used_memory()),
    }))
}

/// Time for a round-trip through the runtime's scheduler
pub(super) async fn check_response_time(slow_after: Duration) -> CheckResult {
    let started = Instant::now();
    let _ = tokio::spawn(async {}).await;
    let elapsed = started.elapsed();

    let details = json!({
        "response_time_ms": elapsed.as_secs_f64() * 1000.0,
        "threshold_ms": slow_after.as_millis() as u64,
    });
    if elapsed > slow_after {
        CheckResult::degraded(details, format!("response time {}ms", elapsed.as_millis()))
    } else {
        CheckResult::healthy(details)
    }
}

pub(super) async fn check_connection_pool(pool: Option<&SmartConnectionPool>) -> CheckResult {
    let Some(pool) = pool else {
        return CheckResult::degraded(json!({}), "no connection pool configured");
    };

    let stats = pool.get_stats().await;
    let breaker = &stats.circuit_breaker;
    let mut details = json!({
        "connection_id": stats.connection_id,
        "circuit_state": breaker.state,
        "failure_rate": breaker.failure_rate,
    });

    let Some(saturation) = stats.pool else {
        let reason = stats.pool_error.unwrap_or_else(|| "pool unavailable".to_string());
        return CheckResult::degraded(details, reason);
    };
    details["total"] = json!(saturation.total);
    details["idle"] = json!(saturation.idle);
    details["waiting"] = json!(saturation.waiting);

    if breaker.state == CircuitState::Open {
        return CheckResult::degraded(details, "circuit breaker is open");
    }
    if saturation.idle == 0 && saturation.waiting > 0 {
        return CheckResult::degraded(
            details,
            format!("pool saturated: {} callers waiting", saturation.waiting),
        );
    }
    CheckResult::healthy(details)
}

pub(super) fn check_environment(required: &[String], lookup: &EnvLookup) -> CheckResult {
    let missing: Vec<&str> = required
        .iter()
        .filter(|key| lookup(key.as_str()).is_none())
        .map(|key| key.as_str())
        .collect();

    let details = json!({
        "required": required,
        "missing_vars": missing,
    });
    if missing.is_empty() {
        CheckResult::healthy(details)
    } else {
        CheckResult::unhealthy(details, format!("missing required variables: {}", missing.join(", ")))
    }
}
