//! Tool names exposed to the tool-dispatch layer

use serde::Serialize;
use std::str::FromStr;

use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardTool {
    HealthCheck,
    GetConnectionStats,
    GetRecoveryStats,
    ResetCircuitBreaker,
}

/// Name and description as listed to callers
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

impl GuardTool {
    pub const ALL: [GuardTool; 4] = [
        GuardTool::HealthCheck,
        GuardTool::GetConnectionStats,
        GuardTool::GetRecoveryStats,
        GuardTool::ResetCircuitBreaker,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GuardTool::HealthCheck => "health_check",
            GuardTool::GetConnectionStats => "get_connection_stats",
            GuardTool::GetRecoveryStats => "get_recovery_stats",
            GuardTool::ResetCircuitBreaker => "reset_circuit_breaker",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            GuardTool::HealthCheck => "Run every health check and report the overall status",
            GuardTool::GetConnectionStats => "Connection pool counters and circuit breaker status",
            GuardTool::GetRecoveryStats => "Auto-recovery attempts and outcomes",
            GuardTool::ResetCircuitBreaker => "Force the circuit breaker back to CLOSED",
        }
    }

    pub fn descriptors() -> Vec<ToolDescriptor> {
        Self::ALL
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name(),
                description: t.description(),
            })
            .collect()
    }
}

impl FromStr for GuardTool {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| GuardError::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for GuardTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
