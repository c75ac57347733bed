//! Order submission, cancellation and listing.
//!
//! Malformed payloads are rejected here, at the REST boundary; once an order
//! is accepted as `pending` only the engine moves it to a terminal status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::api::response::{ApiResponse, AppError};
use crate::models::{
    GameStatus, NewOrder, Order, OrderExecution, OrderSide, OrderType, Position, PositionStatus,
};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub game_id: Uuid,
    pub player_id: Uuid,
    #[validate(length(min = 1, max = 16))]
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub position_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PlayerQuery {
    pub player_id: Uuid,
}

/// POST /orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Order>>), AppError> {
    req.validate()
        .map_err(|e| AppError::unprocessable(&e.to_string()))?;
    validate_order_shape(&req)?;

    if !state.config.symbol_tracked(&req.symbol) {
        return Err(AppError::bad_request("symbol is not tracked"));
    }

    let game = state
        .store
        .game(req.game_id)
        .await?
        .ok_or_else(|| AppError::not_found("game not found"))?;
    if game.status != GameStatus::Active {
        return Err(AppError::conflict("game is not active"));
    }
    if state
        .store
        .player(req.game_id, req.player_id)
        .await?
        .is_none()
    {
        return Err(AppError::bad_request("player is not part of this game"));
    }

    if req.order_type.is_conditional() {
        validate_conditional_target(&state, &req).await?;
    }

    let order = state
        .store
        .insert_order(NewOrder {
            game_id: req.game_id,
            player_id: req.player_id,
            symbol: req.symbol,
            order_type: req.order_type,
            side: req.side,
            quantity: req.quantity,
            price: req.price,
            trigger_price: req.trigger_price,
            position_id: req.position_id,
        })
        .await?;
    tracing::info!(
        order_id = %order.id,
        game_id = %order.game_id,
        order_type = %order.order_type,
        side = %order.side,
        "order accepted"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// DELETE /orders/:order_id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Order>>, AppError> {
    if !state.store.cancel_order(order_id).await? {
        return match state.store.order(order_id).await? {
            Some(_) => Err(AppError::conflict("order is not pending")),
            None => Err(AppError::not_found("order not found")),
        };
    }
    let order = state
        .store
        .order(order_id)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /games/:game_id/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
    Query(query): Query<PlayerQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, AppError> {
    let orders = state
        .store
        .orders_for_player(game_id, query.player_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /games/:game_id/positions
pub async fn list_positions(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
    Query(query): Query<PlayerQuery>,
) -> Result<Json<ApiResponse<Vec<Position>>>, AppError> {
    let positions = state
        .store
        .positions_for_player(game_id, query.player_id)
        .await?;
    Ok(Json(ApiResponse::success(positions)))
}

/// GET /games/:game_id/executions
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<OrderExecution>>>, AppError> {
    let executions = state.store.executions_for_game(game_id).await?;
    Ok(Json(ApiResponse::success(executions)))
}

/// Field requirements per order type. Quantity may be omitted only on
/// conditional orders, where it means "the full position".
fn validate_order_shape(req: &CreateOrderRequest) -> Result<(), AppError> {
    if let Some(quantity) = req.quantity {
        if quantity <= Decimal::ZERO {
            return Err(AppError::unprocessable("quantity must be positive"));
        }
    }

    match req.order_type {
        OrderType::Market => {
            if req.quantity.is_none() {
                return Err(AppError::unprocessable("market order requires a quantity"));
            }
        }
        OrderType::Limit => {
            if req.quantity.is_none() {
                return Err(AppError::unprocessable("limit order requires a quantity"));
            }
            match req.price {
                Some(price) if price > Decimal::ZERO => {}
                _ => {
                    return Err(AppError::unprocessable(
                        "limit order requires a positive limit price",
                    ))
                }
            }
        }
        OrderType::TakeProfit | OrderType::StopLoss => {
            if req.side != OrderSide::Sell {
                return Err(AppError::unprocessable(
                    "conditional orders sell against an existing position",
                ));
            }
            match req.trigger_price {
                Some(trigger) if trigger > Decimal::ZERO => {}
                _ => {
                    return Err(AppError::unprocessable(
                        "conditional order requires a positive trigger price",
                    ))
                }
            }
            if req.position_id.is_none() {
                return Err(AppError::unprocessable(
                    "conditional order requires a position reference",
                ));
            }
        }
    }
    Ok(())
}

/// A conditional order must reference the caller's open BUY position in the
/// same game and symbol. The engine re-validates this every tick; checking
/// here keeps obviously broken references out of the queue.
async fn validate_conditional_target(
    state: &Arc<AppState>,
    req: &CreateOrderRequest,
) -> Result<(), AppError> {
    let position_id = req
        .position_id
        .ok_or_else(|| AppError::unprocessable("conditional order requires a position reference"))?;
    let position = state
        .store
        .position(position_id)
        .await?
        .ok_or_else(|| AppError::not_found("position not found"))?;

    if position.game_id != req.game_id
        || position.player_id != req.player_id
        || position.symbol != req.symbol
        || position.side != OrderSide::Buy
        || position.status != PositionStatus::Open
    {
        return Err(AppError::bad_request(
            "conditional order must reference your open buy position in this symbol",
        ));
    }
    if let Some(quantity) = req.quantity {
        if quantity > position.quantity {
            return Err(AppError::bad_request(
                "trigger quantity exceeds position quantity",
            ));
        }
    }
    Ok(())
}
