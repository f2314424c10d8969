//! Recovery records
//!
//! Types for tracking recovery attempts and reporting on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::patterns::ErrorPattern;

/// Remediation executed for a pattern
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Re-establish the named connection
    Reconnect,
    /// Replace the raw pool for the connection id
    ResetPool,
    /// Force the pool's circuit breaker back to CLOSED
    CircuitReset,
    /// Extension point: reports success, does nothing yet
    ClearCache,
    /// Extension point: reports success, does nothing yet
    Restart,
}

impl RecoveryStrategy {
    /// Strategy used for `pattern` unless overridden
    pub fn default_for(pattern: ErrorPattern) -> Self {
        match pattern {
            ErrorPattern::ConnectionLost => RecoveryStrategy::Reconnect,
            ErrorPattern::ConnectionRefused => RecoveryStrategy::Reconnect,
            ErrorPattern::Timeout => RecoveryStrategy::CircuitReset,
            ErrorPattern::PoolExhausted => RecoveryStrategy::ResetPool,
            ErrorPattern::SslError => RecoveryStrategy::Reconnect,
            ErrorPattern::DnsError => RecoveryStrategy::ClearCache,
        }
    }

    /// Strategies that succeed without side effects
    pub fn is_inert(&self) -> bool {
        matches!(self, RecoveryStrategy::ClearCache | RecoveryStrategy::Restart)
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::Reconnect => write!(f, "RECONNECT"),
            RecoveryStrategy::ResetPool => write!(f, "RESET_POOL"),
            RecoveryStrategy::CircuitReset => write!(f, "CIRCUIT_RESET"),
            RecoveryStrategy::ClearCache => write!(f, "CLEAR_CACHE"),
            RecoveryStrategy::Restart => write!(f, "RESTART"),
        }
    }
}

/// Where a recovery request came from and what it targets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryContext {
    /// Component asking for recovery (e.g. "watchdog", "request")
    pub source: String,

    /// Connection to act on; the pool's own id when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl RecoveryContext {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            connection_id: None,
        }
    }

    pub fn with_connection(mut self, connection_id: &str) -> Self {
        self.connection_id = Some(connection_id.to_string());
        self
    }
}

/// A recovery attempt record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub pattern: ErrorPattern,
    pub strategy: RecoveryStrategy,
    pub success: bool,

    /// Message of the error that triggered recovery
    pub trigger: String,

    /// Why the strategy failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub source: String,
    pub connection_id: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryAttempt {
    pub fn new(
        pattern: ErrorPattern,
        strategy: RecoveryStrategy,
        trigger: String,
        context: &RecoveryContext,
        connection_id: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pattern,
            strategy,
            success: true,
            trigger,
            error: None,
            source: context.source.clone(),
            connection_id: connection_id.to_string(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Mark as failed with error
    pub fn failed(mut self, error: String) -> Self {
        self.success = false;
        self.error = Some(error);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Snapshot returned by `AutoRecoveryManager::get_recovery_stats`
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub enabled: bool,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub success_rate: f64,
    pub max_recovery_attempts: u32,
    pub attempts_by_pattern: BTreeMap<ErrorPattern, u32>,
    pub recent_attempts: Vec<RecoveryAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy_table() {
        assert_eq!(
            RecoveryStrategy::default_for(ErrorPattern::ConnectionLost),
            RecoveryStrategy::Reconnect
        );
        assert_eq!(
            RecoveryStrategy::default_for(ErrorPattern::PoolExhausted),
            RecoveryStrategy::ResetPool
        );
        assert_eq!(
            RecoveryStrategy::default_for(ErrorPattern::Timeout),
            RecoveryStrategy::CircuitReset
        );
        assert!(RecoveryStrategy::default_for(ErrorPattern::DnsError).is_inert());
        assert!(!RecoveryStrategy::Reconnect.is_inert());
    }

    #[test]
    fn test_attempt_builder() {
        let ctx = RecoveryContext::new("watchdog").with_connection("replica");
        let attempt = RecoveryAttempt::new(
            ErrorPattern::ConnectionRefused,
            RecoveryStrategy::Reconnect,
            "refused".to_string(),
            &ctx,
            "replica",
        )
        .with_duration(12)
        .failed("still down".to_string());

        assert!(!attempt.success);
        assert_eq!(attempt.error, Some("still down".to_string()));
        assert_eq!(attempt.source, "watchdog");
        assert_eq!(attempt.duration_ms, 12);
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(RecoveryStrategy::CircuitReset.to_string(), "CIRCUIT_RESET");
        assert_eq!(
            serde_json::to_string(&RecoveryStrategy::ResetPool).unwrap(),
            "\"RESET_POOL\""
        );
    }
}
