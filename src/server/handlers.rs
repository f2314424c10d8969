use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::context::GuardContext;
use crate::error::GuardError;
use crate::health::{HealthCheckResult, HealthStats, HealthStatus};
use crate::pool::PoolStats;
use crate::recovery::RecoveryStats;
use crate::tools::{GuardTool, ToolDescriptor};

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<GuardContext>,
}

/// Full diagnostic run; 503 when the process is UNHEALTHY
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthCheckResult>) {
    let result = state.context.health().run_diagnostics().await;
    let status = match result.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(result))
}

pub async fn health_stats(State(state): State<AppState>) -> Json<HealthStats> {
    Json(state.context.health().get_health_stats())
}

pub async fn connection_stats(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.context.pool().get_stats().await)
}

pub async fn recovery_stats(State(state): State<AppState>) -> Json<RecoveryStats> {
    Json(state.context.recovery().get_recovery_stats())
}

pub async fn reset_circuit_breaker(State(state): State<AppState>) -> Result<Json<Value>, GuardError> {
    let result = state.context.call_tool(GuardTool::ResetCircuitBreaker).await?;
    tracing::info!("Circuit breaker reset over HTTP");
    Ok(Json(result))
}

pub async fn list_tools() -> Json<Vec<ToolDescriptor>> {
    Json(GuardTool::descriptors())
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GuardError> {
    let tool: GuardTool = name.parse()?;
    let result = state.context.call_tool(tool).await?;
    Ok(Json(result))
}
