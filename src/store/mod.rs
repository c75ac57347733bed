//! Data Store Gateway
//!
//! Every mutation the system performs is expressed as an operation on the
//! [`Store`] trait; no call site outside this module issues queries. The
//! production implementation is [`PgStore`]; integration tests substitute
//! [`MemoryStore`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    EquityPoint, Game, GamePlayer, GameState, LeaderboardEntry, NewExecution, NewOrder,
    NewPosition, Order, OrderExecution, OrderStatus, OrderType, Position, PositionPatch,
    PricePoint,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Typed operations over the persistent entities.
///
/// Contracts: every mutation stamps an updated-at; returned rows are plain
/// value types; not-found on a single-row lookup is an `Option`, every other
/// failure surfaces as [`StoreError`]. `mark_order` and `cancel_order` are
/// compare-and-swap from `pending`, which is what makes terminal order
/// statuses immutable.
#[async_trait]
pub trait Store: Send + Sync {
    // Global tick singleton.
    async fn game_state(&self) -> Result<GameState, StoreError>;
    async fn advance_tick(&self, new_tick: i64) -> Result<(), StoreError>;

    // Price history (append-only).
    async fn insert_price(&self, symbol: &str, price: Decimal, tick: i64) -> Result<(), StoreError>;
    async fn latest_price(&self, symbol: &str) -> Result<Option<PricePoint>, StoreError>;

    // Games.
    async fn create_game(
        &self,
        player1_id: Uuid,
        initial_balance: Decimal,
        duration_minutes: i32,
    ) -> Result<Game, StoreError>;
    /// Joins `user_id` as the second player. Single-writer: the transition
    /// `waiting -> active` (and the one-time `started_at` stamp) only
    /// succeeds for the first caller; later callers get a conflict.
    async fn join_game(&self, game_id: Uuid, user_id: Uuid) -> Result<Game, StoreError>;
    async fn game(&self, game_id: Uuid) -> Result<Option<Game>, StoreError>;
    async fn open_games(&self) -> Result<Vec<Game>, StoreError>;
    async fn active_games(&self) -> Result<Vec<Game>, StoreError>;
    async fn complete_game(&self, game_id: Uuid, winner_id: Option<Uuid>) -> Result<(), StoreError>;

    // Game players.
    /// Players of a game ordered by join time (the tie-break order for
    /// winner selection).
    async fn players(&self, game_id: Uuid) -> Result<Vec<GamePlayer>, StoreError>;
    async fn player(&self, game_id: Uuid, user_id: Uuid) -> Result<Option<GamePlayer>, StoreError>;
    async fn update_player(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        balance: Decimal,
        equity: Decimal,
    ) -> Result<(), StoreError>;
    async fn update_player_equity(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        equity: Decimal,
    ) -> Result<(), StoreError>;

    // Orders.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;
    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
    /// Pending orders for a game, optionally filtered by type, oldest first.
    async fn pending_orders(
        &self,
        game_id: Uuid,
        order_type: Option<OrderType>,
    ) -> Result<Vec<Order>, StoreError>;
    async fn orders_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Order>, StoreError>;
    /// Moves a `pending` order to `status`, stamping `filled_at` iff the new
    /// status is `filled`. Returns false when the order was already terminal
    /// (or unknown), in which case nothing was written.
    async fn mark_order(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_price: Option<Decimal>,
    ) -> Result<bool, StoreError>;
    async fn insert_execution(&self, execution: NewExecution) -> Result<(), StoreError>;
    async fn executions_for_game(&self, game_id: Uuid) -> Result<Vec<OrderExecution>, StoreError>;

    // Positions.
    async fn open_positions(&self, game_id: Uuid) -> Result<Vec<Position>, StoreError>;
    async fn open_position(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError>;
    async fn position(&self, position_id: Uuid) -> Result<Option<Position>, StoreError>;
    async fn positions_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Position>, StoreError>;
    async fn insert_position(&self, position: NewPosition) -> Result<Position, StoreError>;
    async fn update_position(
        &self,
        position_id: Uuid,
        patch: PositionPatch,
    ) -> Result<(), StoreError>;

    // Equity history (append-only, unique per (game, player, tick)).
    async fn insert_equity_history(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        tick: i64,
        balance: Decimal,
        equity: Decimal,
    ) -> Result<(), StoreError>;
    async fn equity_history(
        &self,
        game_id: Uuid,
        player_id: Option<Uuid>,
    ) -> Result<Vec<EquityPoint>, StoreError>;

    /// External cancellation: `pending -> cancelled`. Returns false when the
    /// order is already terminal.
    async fn cancel_order(&self, order_id: Uuid) -> Result<bool, StoreError> {
        self.mark_order(order_id, OrderStatus::Cancelled, None).await
    }

    // Stats.
    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, StoreError>;
}
