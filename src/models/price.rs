use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One append-only price observation. "Latest price for a symbol" is the row
/// with the highest timestamp; multiple rows per tick are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricePoint {
    pub symbol: String,
    pub price: Decimal,
    pub game_state: i64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only equity snapshot, unique per `(game, player, tick)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EquityPoint {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub game_state: i64,
    pub balance: Decimal,
    pub equity: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub wins: i64,
    pub games_played: i64,
}
