//! End-of-duration close-out.
//!
//! When a game's clock runs out the engine rejects whatever is still
//! pending, converts every open position to cash at the best known price and
//! crowns the player with the highest equity.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::engine::{EngineError, TickEngine};
use crate::events::GameEvent;
use crate::metrics;
use crate::models::{Game, OrderSide, PositionPatch, PositionStatus};

impl TickEngine {
    pub async fn close_out_game(&self, game: &Game) -> Result<(), EngineError> {
        info!(game_id = %game.id, "closing out expired game");

        // 1. Nothing fills after the bell: reject every remaining pending
        //    order. Already-terminal orders are untouched by the CAS.
        for order in self.store.pending_orders(game.id, None).await? {
            self.reject(&order, "game has ended").await?;
        }

        // 2. Close every open position at latest ?? current ?? entry and
        //    remember the BUY proceeds owed to each player.
        let mut proceeds: HashMap<Uuid, Decimal> = HashMap::new();
        for position in self.store.open_positions(game.id).await? {
            let close_price = match self.store.latest_price(&position.symbol).await? {
                Some(last) => last.price,
                None => position.current_price.unwrap_or(position.entry_price),
            };
            let realized = match position.side {
                OrderSide::Buy => (close_price - position.entry_price) * position.quantity,
                OrderSide::Sell => (position.entry_price - close_price) * position.quantity,
            };
            self.store
                .update_position(
                    position.id,
                    PositionPatch {
                        status: Some(PositionStatus::Closed),
                        current_price: Some(close_price),
                        unrealized_pnl: Some(realized),
                        ..Default::default()
                    },
                )
                .await?;
            // Long-only v1: SELL sides credit nothing beyond the proceeds
            // already credited when they were opened.
            if position.side == OrderSide::Buy {
                *proceeds.entry(position.player_id).or_default() +=
                    close_price * position.quantity;
            }
            self.events.publish(GameEvent::PositionClosed {
                game_id: game.id,
                position_id: position.id,
                player_id: position.player_id,
                symbol: position.symbol.clone(),
                close_price,
            });
        }

        // 3. Credit the proceeds; with no open positions left, equity is
        //    exactly the cash balance.
        for player in self.store.players(game.id).await? {
            let balance =
                player.balance + proceeds.get(&player.user_id).copied().unwrap_or_default();
            self.store
                .update_player(game.id, player.user_id, balance, balance)
                .await?;
        }

        // 4. Highest equity wins; ties go to the earliest joiner.
        let players = self.store.players(game.id).await?;
        let mut winner: Option<(Uuid, Decimal)> = None;
        for player in &players {
            if winner.map_or(true, |(_, best)| player.equity > best) {
                winner = Some((player.user_id, player.equity));
            }
        }
        let winner_id = winner.map(|(id, _)| id);
        self.store.complete_game(game.id, winner_id).await?;

        metrics::record_game_completed();
        self.events.publish(GameEvent::GameCompleted {
            game_id: game.id,
            winner_id,
        });
        Ok(())
    }
}
