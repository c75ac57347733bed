use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "game_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Active,
    Completed,
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameStatus::Waiting => write!(f, "waiting"),
            GameStatus::Active => write!(f, "active"),
            GameStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A head-to-head match between two players.
///
/// Created `waiting`, becomes `active` when the second player joins
/// (`started_at` is stamped exactly once at that moment) and `completed`
/// when the configured duration has elapsed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Game {
    pub id: Uuid,
    pub player1_id: Uuid,
    pub player2_id: Option<Uuid>,
    pub status: GameStatus,
    pub initial_balance: Decimal,
    pub duration_minutes: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// Wall-clock instant at which the game runs out, if it has started.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|t| t + Duration::minutes(i64::from(self.duration_minutes)))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }
}

/// Per-player state inside a game. `balance` is cash; `equity` is
/// `balance + unrealized P&L over the player's open positions` as of the
/// last refresh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GamePlayer {
    pub game_id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub equity: Decimal,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Singleton row carrying the global tick counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GameState {
    pub current_tick: i64,
    pub last_tick_at: DateTime<Utc>,
}
