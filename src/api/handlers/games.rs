//! Game lifecycle handlers: create, join, inspect.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{ApiResponse, AppError};
use crate::models::{EquityPoint, Game, GamePlayer};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateGameRequest {
    pub player_id: Uuid,
    pub initial_balance: Option<Decimal>,
    pub duration_minutes: i32,
}

#[derive(Debug, Deserialize)]
pub struct JoinGameRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EquityHistoryQuery {
    pub player_id: Option<Uuid>,
}

/// POST /games
pub async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Game>>), AppError> {
    if !state.config.duration_valid(req.duration_minutes) {
        return Err(AppError::unprocessable(&format!(
            "duration must be between {} and {} minutes",
            state.config.min_duration_minutes, state.config.max_duration_minutes
        )));
    }

    let initial_balance = req
        .initial_balance
        .unwrap_or(state.config.default_initial_balance);
    if initial_balance <= Decimal::ZERO {
        return Err(AppError::unprocessable("initial balance must be positive"));
    }

    let game = state
        .store
        .create_game(req.player_id, initial_balance, req.duration_minutes)
        .await?;
    tracing::info!(game_id = %game.id, player_id = %req.player_id, "game created");

    Ok((StatusCode::CREATED, Json(ApiResponse::success(game))))
}

/// POST /games/:game_id/join
pub async fn join_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
    Json(req): Json<JoinGameRequest>,
) -> Result<Json<ApiResponse<Game>>, AppError> {
    if state.store.game(game_id).await?.is_none() {
        return Err(AppError::not_found("game not found"));
    }

    let game = state.store.join_game(game_id, req.user_id).await?;
    tracing::info!(game_id = %game.id, user_id = %req.user_id, "player joined, game started");

    Ok(Json(ApiResponse::success(game)))
}

/// GET /games
pub async fn list_open_games(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Game>>>, AppError> {
    let games = state.store.open_games().await?;
    Ok(Json(ApiResponse::success(games)))
}

/// GET /games/:game_id
pub async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Game>>, AppError> {
    let game = state
        .store
        .game(game_id)
        .await?
        .ok_or_else(|| AppError::not_found("game not found"))?;
    Ok(Json(ApiResponse::success(game)))
}

/// GET /games/:game_id/players
pub async fn get_players(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<GamePlayer>>>, AppError> {
    let players = state.store.players(game_id).await?;
    if players.is_empty() {
        return Err(AppError::not_found("game not found"));
    }
    Ok(Json(ApiResponse::success(players)))
}

/// GET /games/:game_id/equity-history
pub async fn get_equity_history(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
    Query(query): Query<EquityHistoryQuery>,
) -> Result<Json<ApiResponse<Vec<EquityPoint>>>, AppError> {
    let history = state
        .store
        .equity_history(game_id, query.player_id)
        .await?;
    Ok(Json(ApiResponse::success(history)))
}
