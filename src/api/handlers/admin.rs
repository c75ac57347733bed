//! Operator endpoints: health, manual tick trigger, metrics render.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub tick: i64,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// POST /admin/tick
///
/// Runs the driver once. Idempotent with respect to tick advancement: each
/// invocation computes and writes its own tick.
pub async fn trigger_tick(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<TickResponse>>, AppError> {
    let tick = state.driver.run_once().await?;
    tracing::info!(tick, "tick triggered by operator");
    Ok(Json(ApiResponse::success(TickResponse { tick })))
}

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
