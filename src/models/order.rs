use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    TakeProfit,
    StopLoss,
}

impl OrderType {
    /// TAKE_PROFIT and STOP_LOSS orders are evaluated against a referenced
    /// position rather than as standalone flow.
    pub fn is_conditional(&self) -> bool {
        matches!(self, OrderType::TakeProfit | OrderType::StopLoss)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::TakeProfit => write!(f, "take_profit"),
            OrderType::StopLoss => write!(f, "stop_loss"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses are absorbing; a filled/cancelled/rejected order is
    /// never re-evaluated.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    /// NULL on a conditional order means "the full referenced position".
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub position_id: Option<Uuid>,
    pub status: OrderStatus,
    pub filled_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for inserting a fresh `pending` order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub position_id: Option<Uuid>,
}

/// Append-only audit row, one per fill.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderExecution {
    pub id: Uuid,
    pub order_id: Uuid,
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub execution_price: Decimal,
    pub game_state: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub order_id: Uuid,
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub execution_price: Decimal,
    pub game_state: i64,
}

impl NewExecution {
    /// Audit row for an order filled at `price` for `quantity` during `tick`.
    pub fn from_fill(order: &Order, side: OrderSide, quantity: Decimal, price: Decimal, tick: i64) -> Self {
        Self {
            order_id: order.id,
            game_id: order.game_id,
            player_id: order.player_id,
            symbol: order.symbol.clone(),
            side,
            quantity,
            execution_price: price,
            game_state: tick,
        }
    }
}
