//! PostgreSQL implementation of the Data Store Gateway.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    EquityPoint, Game, GamePlayer, GameState, LeaderboardEntry, NewExecution, NewOrder,
    NewPosition, Order, OrderExecution, OrderStatus, OrderType, Position, PositionPatch,
    PricePoint,
};
use crate::store::{Store, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn game_state(&self) -> Result<GameState, StoreError> {
        let state = sqlx::query_as::<_, GameState>(
            "SELECT current_tick, last_tick_at FROM game_state LIMIT 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(state)
    }

    async fn advance_tick(&self, new_tick: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO game_state (onerow, current_tick, last_tick_at)
            VALUES (TRUE, $1, NOW())
            ON CONFLICT (onerow) DO UPDATE SET
                current_tick = $1,
                last_tick_at = NOW()
            "#,
        )
        .bind(new_tick)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_price(&self, symbol: &str, price: Decimal, tick: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO price_data (symbol, price, game_state, timestamp) VALUES ($1, $2, $3, NOW())",
        )
        .bind(symbol)
        .bind(price)
        .bind(tick)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<PricePoint>, StoreError> {
        let point = sqlx::query_as::<_, PricePoint>(
            r#"
            SELECT symbol, price, game_state, timestamp
            FROM price_data
            WHERE symbol = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(point)
    }

    async fn create_game(
        &self,
        player1_id: Uuid,
        initial_balance: Decimal,
        duration_minutes: i32,
    ) -> Result<Game, StoreError> {
        let mut tx = self.pool.begin().await?;

        let game = sqlx::query_as::<_, Game>(
            r#"
            INSERT INTO games (player1_id, initial_balance, duration_minutes)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(player1_id)
        .bind(initial_balance)
        .bind(duration_minutes)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO game_players (game_id, user_id, balance, equity) VALUES ($1, $2, $3, $3)",
        )
        .bind(game.id)
        .bind(player1_id)
        .bind(initial_balance)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(game)
    }

    async fn join_game(&self, game_id: Uuid, user_id: Uuid) -> Result<Game, StoreError> {
        let mut tx = self.pool.begin().await?;

        // CAS on status = waiting; the winning caller stamps started_at once.
        let game = sqlx::query_as::<_, Game>(
            r#"
            UPDATE games
            SET player2_id = $2,
                status = 'active',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND status = 'waiting'
              AND player2_id IS NULL
              AND player1_id <> $2
            RETURNING *
            "#,
        )
        .bind(game_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Conflict("game cannot be joined".to_string()))?;

        sqlx::query(
            "INSERT INTO game_players (game_id, user_id, balance, equity) VALUES ($1, $2, $3, $3)",
        )
        .bind(game_id)
        .bind(user_id)
        .bind(game.initial_balance)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(game)
    }

    async fn game(&self, game_id: Uuid) -> Result<Option<Game>, StoreError> {
        let game = sqlx::query_as::<_, Game>("SELECT * FROM games WHERE id = $1")
            .bind(game_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(game)
    }

    async fn open_games(&self) -> Result<Vec<Game>, StoreError> {
        let games = sqlx::query_as::<_, Game>(
            "SELECT * FROM games WHERE status = 'waiting' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(games)
    }

    async fn active_games(&self) -> Result<Vec<Game>, StoreError> {
        let games = sqlx::query_as::<_, Game>(
            "SELECT * FROM games WHERE status = 'active' AND started_at IS NOT NULL ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(games)
    }

    async fn complete_game(&self, game_id: Uuid, winner_id: Option<Uuid>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE games
            SET status = 'completed',
                ended_at = NOW(),
                winner_id = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(game_id)
        .bind(winner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn players(&self, game_id: Uuid) -> Result<Vec<GamePlayer>, StoreError> {
        let players = sqlx::query_as::<_, GamePlayer>(
            "SELECT * FROM game_players WHERE game_id = $1 ORDER BY joined_at",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    async fn player(&self, game_id: Uuid, user_id: Uuid) -> Result<Option<GamePlayer>, StoreError> {
        let player = sqlx::query_as::<_, GamePlayer>(
            "SELECT * FROM game_players WHERE game_id = $1 AND user_id = $2",
        )
        .bind(game_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(player)
    }

    async fn update_player(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        balance: Decimal,
        equity: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE game_players
            SET balance = $3, equity = $4, updated_at = NOW()
            WHERE game_id = $1 AND user_id = $2
            "#,
        )
        .bind(game_id)
        .bind(user_id)
        .bind(balance)
        .bind(equity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_player_equity(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        equity: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE game_players
            SET equity = $3, updated_at = NOW()
            WHERE game_id = $1 AND user_id = $2
            "#,
        )
        .bind(game_id)
        .bind(user_id)
        .bind(equity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let inserted = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (game_id, player_id, symbol, order_type, side, quantity, price, trigger_price, position_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(order.game_id)
        .bind(order.player_id)
        .bind(&order.symbol)
        .bind(order.order_type)
        .bind(order.side)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.trigger_price)
        .bind(order.position_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn pending_orders(
        &self,
        game_id: Uuid,
        order_type: Option<OrderType>,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE game_id = $1
              AND status = 'pending'
              AND ($2::order_type IS NULL OR order_type = $2)
            ORDER BY created_at
            "#,
        )
        .bind(game_id)
        .bind(order_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn orders_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE game_id = $1 AND player_id = $2 ORDER BY created_at DESC",
        )
        .bind(game_id)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn mark_order(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_price: Option<Decimal>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                filled_price = CASE WHEN $2 = 'filled'::order_status THEN $3 ELSE filled_price END,
                filled_at   = CASE WHEN $2 = 'filled'::order_status THEN NOW() ELSE filled_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(filled_price)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_execution(&self, execution: NewExecution) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_executions (order_id, game_id, player_id, symbol, side, quantity, execution_price, game_state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.order_id)
        .bind(execution.game_id)
        .bind(execution.player_id)
        .bind(&execution.symbol)
        .bind(execution.side)
        .bind(execution.quantity)
        .bind(execution.execution_price)
        .bind(execution.game_state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn executions_for_game(&self, game_id: Uuid) -> Result<Vec<OrderExecution>, StoreError> {
        let executions = sqlx::query_as::<_, OrderExecution>(
            "SELECT * FROM order_executions WHERE game_id = $1 ORDER BY created_at DESC",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(executions)
    }

    async fn open_positions(&self, game_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE game_id = $1 AND status = 'open' ORDER BY created_at",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn open_position(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let position = sqlx::query_as::<_, Position>(
            r#"
            SELECT * FROM positions
            WHERE game_id = $1 AND player_id = $2 AND symbol = $3 AND status = 'open'
            "#,
        )
        .bind(game_id)
        .bind(player_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(position)
    }

    async fn position(&self, position_id: Uuid) -> Result<Option<Position>, StoreError> {
        let position = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(position)
    }

    async fn positions_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Position>, StoreError> {
        let positions = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE game_id = $1 AND player_id = $2 ORDER BY created_at DESC",
        )
        .bind(game_id)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    async fn insert_position(&self, position: NewPosition) -> Result<Position, StoreError> {
        let inserted = sqlx::query_as::<_, Position>(
            r#"
            INSERT INTO positions (game_id, player_id, symbol, side, quantity, entry_price, current_price, leverage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(position.game_id)
        .bind(position.player_id)
        .bind(&position.symbol)
        .bind(position.side)
        .bind(position.quantity)
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.leverage)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn update_position(
        &self,
        position_id: Uuid,
        patch: PositionPatch,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE positions
            SET status = COALESCE($2, status),
                current_price = COALESCE($3, current_price),
                unrealized_pnl = COALESCE($4, unrealized_pnl),
                quantity = COALESCE($5, quantity),
                entry_price = COALESCE($6, entry_price),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(position_id)
        .bind(patch.status)
        .bind(patch.current_price)
        .bind(patch.unrealized_pnl)
        .bind(patch.quantity)
        .bind(patch.entry_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_equity_history(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        tick: i64,
        balance: Decimal,
        equity: Decimal,
    ) -> Result<(), StoreError> {
        // Unique on (game, player, tick); replays are no-ops.
        sqlx::query(
            r#"
            INSERT INTO equity_history (game_id, player_id, game_state, balance, equity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (game_id, player_id, game_state) DO NOTHING
            "#,
        )
        .bind(game_id)
        .bind(player_id)
        .bind(tick)
        .bind(balance)
        .bind(equity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn equity_history(
        &self,
        game_id: Uuid,
        player_id: Option<Uuid>,
    ) -> Result<Vec<EquityPoint>, StoreError> {
        let points = sqlx::query_as::<_, EquityPoint>(
            r#"
            SELECT game_id, player_id, game_state, balance, equity, created_at
            FROM equity_history
            WHERE game_id = $1
              AND ($2::uuid IS NULL OR player_id = $2)
            ORDER BY game_state
            "#,
        )
        .bind(game_id)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(points)
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT gp.user_id,
                   COUNT(*) FILTER (WHERE g.winner_id = gp.user_id) AS wins,
                   COUNT(*) AS games_played
            FROM game_players gp
            JOIN games g ON g.id = gp.game_id
            WHERE g.status = 'completed'
            GROUP BY gp.user_id
            ORDER BY wins DESC, games_played
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
