//! Leaderboard across completed games.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiResponse, AppError};
use crate::models::LeaderboardEntry;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

/// GET /leaderboard
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Vec<LeaderboardEntry>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let entries = state.store.leaderboard(limit).await?;
    Ok(Json(ApiResponse::success(entries)))
}
