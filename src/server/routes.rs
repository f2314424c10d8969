use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::context::GuardContext;

pub fn create_router(context: Arc<GuardContext>) -> Router {
    let state = AppState { context };

    Router::new()
        // Health
        .route("/_api/health", get(health_check))
        .route("/_api/health/stats", get(health_stats))
        // Connection governance
        .route("/_api/connection/stats", get(connection_stats))
        .route("/_api/recovery/stats", get(recovery_stats))
        .route("/_api/circuit-breaker/reset", post(reset_circuit_breaker))
        // Tool dispatch
        .route("/_api/tools", get(list_tools))
        .route("/_api/tools/{name}", post(call_tool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
