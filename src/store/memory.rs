//! In-memory implementation of the Data Store Gateway.
//!
//! Used by the integration test suite; mirrors the Postgres semantics,
//! including the compare-and-swap behavior of `mark_order` and `join_game`
//! and the uniqueness of equity-history rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{
    EquityPoint, Game, GamePlayer, GameState, GameStatus, LeaderboardEntry, NewExecution,
    NewOrder, NewPosition, Order, OrderExecution, OrderStatus, OrderType, Position,
    PositionPatch, PositionStatus, PricePoint,
};
use crate::store::{Store, StoreError};

#[derive(Default)]
struct Inner {
    current_tick: i64,
    last_tick_at: Option<DateTime<Utc>>,
    prices: Vec<PricePoint>,
    games: HashMap<Uuid, Game>,
    players: Vec<GamePlayer>,
    orders: Vec<Order>,
    executions: Vec<OrderExecution>,
    positions: Vec<Position>,
    equity: Vec<EquityPoint>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites a game's start time, e.g. to simulate an expired game.
    pub fn set_started_at(&self, game_id: Uuid, started_at: DateTime<Utc>) {
        let mut inner = self.inner.write();
        if let Some(game) = inner.games.get_mut(&game_id) {
            game.started_at = Some(started_at);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn game_state(&self) -> Result<GameState, StoreError> {
        let inner = self.inner.read();
        Ok(GameState {
            current_tick: inner.current_tick,
            last_tick_at: inner.last_tick_at.unwrap_or_else(Utc::now),
        })
    }

    async fn advance_tick(&self, new_tick: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.current_tick = new_tick;
        inner.last_tick_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_price(&self, symbol: &str, price: Decimal, tick: i64) -> Result<(), StoreError> {
        self.inner.write().prices.push(PricePoint {
            symbol: symbol.to_string(),
            price,
            game_state: tick,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<PricePoint>, StoreError> {
        let inner = self.inner.read();
        // Insertion order stands in for the timestamp ordering.
        Ok(inner
            .prices
            .iter()
            .rev()
            .find(|p| p.symbol == symbol)
            .cloned())
    }

    async fn create_game(
        &self,
        player1_id: Uuid,
        initial_balance: Decimal,
        duration_minutes: i32,
    ) -> Result<Game, StoreError> {
        let now = Utc::now();
        let game = Game {
            id: Uuid::new_v4(),
            player1_id,
            player2_id: None,
            status: GameStatus::Waiting,
            initial_balance,
            duration_minutes,
            started_at: None,
            ended_at: None,
            winner_id: None,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.write();
        inner.games.insert(game.id, game.clone());
        inner.players.push(GamePlayer {
            game_id: game.id,
            user_id: player1_id,
            balance: initial_balance,
            equity: initial_balance,
            joined_at: now,
            updated_at: now,
        });
        Ok(game)
    }

    async fn join_game(&self, game_id: Uuid, user_id: Uuid) -> Result<Game, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let game = inner
            .games
            .get_mut(&game_id)
            .filter(|g| {
                g.status == GameStatus::Waiting && g.player2_id.is_none() && g.player1_id != user_id
            })
            .ok_or_else(|| StoreError::Conflict("game cannot be joined".to_string()))?;
        game.player2_id = Some(user_id);
        game.status = GameStatus::Active;
        game.started_at = Some(now);
        game.updated_at = now;
        let game = game.clone();
        let initial = game.initial_balance;
        inner.players.push(GamePlayer {
            game_id,
            user_id,
            balance: initial,
            equity: initial,
            joined_at: now,
            updated_at: now,
        });
        Ok(game)
    }

    async fn game(&self, game_id: Uuid) -> Result<Option<Game>, StoreError> {
        Ok(self.inner.read().games.get(&game_id).cloned())
    }

    async fn open_games(&self) -> Result<Vec<Game>, StoreError> {
        let inner = self.inner.read();
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| g.status == GameStatus::Waiting)
            .cloned()
            .collect();
        games.sort_by_key(|g| std::cmp::Reverse(g.created_at));
        Ok(games)
    }

    async fn active_games(&self) -> Result<Vec<Game>, StoreError> {
        let inner = self.inner.read();
        let mut games: Vec<Game> = inner
            .games
            .values()
            .filter(|g| g.status == GameStatus::Active && g.started_at.is_some())
            .cloned()
            .collect();
        games.sort_by_key(|g| g.created_at);
        Ok(games)
    }

    async fn complete_game(&self, game_id: Uuid, winner_id: Option<Uuid>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(game) = inner.games.get_mut(&game_id) {
            game.status = GameStatus::Completed;
            game.ended_at = Some(Utc::now());
            game.winner_id = winner_id;
            game.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn players(&self, game_id: Uuid) -> Result<Vec<GamePlayer>, StoreError> {
        let inner = self.inner.read();
        let mut players: Vec<GamePlayer> = inner
            .players
            .iter()
            .filter(|p| p.game_id == game_id)
            .cloned()
            .collect();
        players.sort_by_key(|p| p.joined_at);
        Ok(players)
    }

    async fn player(&self, game_id: Uuid, user_id: Uuid) -> Result<Option<GamePlayer>, StoreError> {
        Ok(self
            .inner
            .read()
            .players
            .iter()
            .find(|p| p.game_id == game_id && p.user_id == user_id)
            .cloned())
    }

    async fn update_player(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        balance: Decimal,
        equity: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(player) = inner
            .players
            .iter_mut()
            .find(|p| p.game_id == game_id && p.user_id == user_id)
        {
            player.balance = balance;
            player.equity = equity;
            player.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_player_equity(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        equity: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(player) = inner
            .players
            .iter_mut()
            .find(|p| p.game_id == game_id && p.user_id == user_id)
        {
            player.equity = equity;
            player.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            game_id: order.game_id,
            player_id: order.player_id,
            symbol: order.symbol,
            order_type: order.order_type,
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            trigger_price: order.trigger_price,
            position_id: order.position_id,
            status: OrderStatus::Pending,
            filled_price: None,
            filled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.write().orders.push(order.clone());
        Ok(order)
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self
            .inner
            .read()
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn pending_orders(
        &self,
        game_id: Uuid,
        order_type: Option<OrderType>,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .orders
            .iter()
            .filter(|o| {
                o.game_id == game_id
                    && o.status == OrderStatus::Pending
                    && order_type.map_or(true, |t| o.order_type == t)
            })
            .cloned()
            .collect())
    }

    async fn orders_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read();
        let mut orders: Vec<Order> = inner
            .orders
            .iter()
            .filter(|o| o.game_id == game_id && o.player_id == player_id)
            .cloned()
            .collect();
        orders.reverse();
        Ok(orders)
    }

    async fn mark_order(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_price: Option<Decimal>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) else {
            return Ok(false);
        };
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }
        order.status = status;
        if status == OrderStatus::Filled {
            order.filled_price = filled_price;
            order.filled_at = Some(Utc::now());
        }
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_execution(&self, execution: NewExecution) -> Result<(), StoreError> {
        self.inner.write().executions.push(OrderExecution {
            id: Uuid::new_v4(),
            order_id: execution.order_id,
            game_id: execution.game_id,
            player_id: execution.player_id,
            symbol: execution.symbol,
            side: execution.side,
            quantity: execution.quantity,
            execution_price: execution.execution_price,
            game_state: execution.game_state,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn executions_for_game(&self, game_id: Uuid) -> Result<Vec<OrderExecution>, StoreError> {
        let inner = self.inner.read();
        let mut executions: Vec<OrderExecution> = inner
            .executions
            .iter()
            .filter(|e| e.game_id == game_id)
            .cloned()
            .collect();
        executions.reverse();
        Ok(executions)
    }

    async fn open_positions(&self, game_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .positions
            .iter()
            .filter(|p| p.game_id == game_id && p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn open_position(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        Ok(self
            .inner
            .read()
            .positions
            .iter()
            .find(|p| {
                p.game_id == game_id
                    && p.player_id == player_id
                    && p.symbol == symbol
                    && p.status == PositionStatus::Open
            })
            .cloned())
    }

    async fn position(&self, position_id: Uuid) -> Result<Option<Position>, StoreError> {
        Ok(self
            .inner
            .read()
            .positions
            .iter()
            .find(|p| p.id == position_id)
            .cloned())
    }

    async fn positions_for_player(
        &self,
        game_id: Uuid,
        player_id: Uuid,
    ) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.read();
        let mut positions: Vec<Position> = inner
            .positions
            .iter()
            .filter(|p| p.game_id == game_id && p.player_id == player_id)
            .cloned()
            .collect();
        positions.reverse();
        Ok(positions)
    }

    async fn insert_position(&self, position: NewPosition) -> Result<Position, StoreError> {
        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4(),
            game_id: position.game_id,
            player_id: position.player_id,
            symbol: position.symbol,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            current_price: position.current_price,
            leverage: position.leverage.max(1),
            unrealized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.inner.write().positions.push(position.clone());
        Ok(position)
    }

    async fn update_position(
        &self,
        position_id: Uuid,
        patch: PositionPatch,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(position) = inner.positions.iter_mut().find(|p| p.id == position_id) {
            if let Some(status) = patch.status {
                position.status = status;
            }
            if let Some(current_price) = patch.current_price {
                position.current_price = Some(current_price);
            }
            if let Some(unrealized_pnl) = patch.unrealized_pnl {
                position.unrealized_pnl = unrealized_pnl;
            }
            if let Some(quantity) = patch.quantity {
                position.quantity = quantity;
            }
            if let Some(entry_price) = patch.entry_price {
                position.entry_price = entry_price;
            }
            position.updated_at = Utc::now();
        }
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
        let mut inner = self.inner.write();
        let exists = inner
            .equity
            .iter()
            .any(|e| e.game_id == game_id && e.player_id == player_id && e.game_state == tick);
        if !exists {
            inner.equity.push(EquityPoint {
                game_id,
                player_id,
                game_state: tick,
                balance,
                equity,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn equity_history(
        &self,
        game_id: Uuid,
        player_id: Option<Uuid>,
    ) -> Result<Vec<EquityPoint>, StoreError> {
        let inner = self.inner.read();
        let mut points: Vec<EquityPoint> = inner
            .equity
            .iter()
            .filter(|e| e.game_id == game_id && player_id.map_or(true, |p| e.player_id == p))
            .cloned()
            .collect();
        points.sort_by_key(|e| e.game_state);
        Ok(points)
    }

    async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let inner = self.inner.read();
        let mut tallies: HashMap<Uuid, LeaderboardEntry> = HashMap::new();
        for player in &inner.players {
            let Some(game) = inner.games.get(&player.game_id) else {
                continue;
            };
            if game.status != GameStatus::Completed {
                continue;
            }
            let entry = tallies.entry(player.user_id).or_insert(LeaderboardEntry {
                user_id: player.user_id,
                wins: 0,
                games_played: 0,
            });
            entry.games_played += 1;
            if game.winner_id == Some(player.user_id) {
                entry.wins += 1;
            }
        }
        let mut entries: Vec<LeaderboardEntry> = tallies.into_values().collect();
        entries.sort_by(|a, b| b.wins.cmp(&a.wins).then(a.games_played.cmp(&b.games_played)));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
