//! Per-game tick pipeline.
//!
//! For a single `(game, tick)` the engine runs six phases in order, each
//! observing the state produced by earlier ones:
//!
//! A. market orders
//! B. limit orders
//! C. mark-to-market
//! D. equity refresh for all players
//! E. conditional (take-profit / stop-loss) orders
//! F. equity-history append
//!
//! Order processing within a phase is serialized, which keeps the cash
//! checks meaningful and preserves the at-most-one-open-position invariant.
//! Everything is re-read from the store at phase boundaries; the engine
//! holds no mutable state across ticks, so a replayed `(game, tick)` only
//! touches orders that are still `pending`.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::EngineError;
use crate::events::{EventBus, GameEvent};
use crate::metrics;
use crate::models::{
    weighted_entry, NewExecution, NewPosition, Order, OrderSide, OrderStatus, OrderType,
    Position, PositionPatch, PositionStatus,
};
use crate::store::Store;

pub struct TickEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) events: EventBus,
}

impl TickEngine {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Runs all phases for one game at `tick`. Store errors abort this
    /// game's tick only; the caller keeps driving other games.
    pub async fn run_game_tick(&self, game_id: Uuid, tick: i64) -> Result<(), EngineError> {
        debug!(game_id = %game_id, tick, "running game tick");
        self.process_market_orders(game_id, tick).await?;
        self.process_limit_orders(game_id, tick).await?;
        self.mark_to_market(game_id).await?;
        self.refresh_equities(game_id).await?;
        self.process_conditional_orders(game_id, tick).await?;
        self.record_equity_history(game_id, tick).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase A: market orders
    // ------------------------------------------------------------------

    async fn process_market_orders(&self, game_id: Uuid, tick: i64) -> Result<(), EngineError> {
        for order in self
            .store
            .pending_orders(game_id, Some(OrderType::Market))
            .await?
        {
            let Some(quantity) = positive_quantity(&order) else {
                self.reject(&order, "quantity must be a positive amount").await?;
                continue;
            };
            // No price for the symbol yet: the order stays pending.
            let Some(last) = self.store.latest_price(&order.symbol).await? else {
                continue;
            };
            self.fill_flat(&order, quantity, last.price, tick).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase B: limit orders
    // ------------------------------------------------------------------

    async fn process_limit_orders(&self, game_id: Uuid, tick: i64) -> Result<(), EngineError> {
        for order in self
            .store
            .pending_orders(game_id, Some(OrderType::Limit))
            .await?
        {
            let Some(quantity) = positive_quantity(&order) else {
                self.reject(&order, "quantity must be a positive amount").await?;
                continue;
            };
            let Some(limit) = order.price else {
                self.reject(&order, "limit order is missing its limit price").await?;
                continue;
            };
            let Some(last) = self.store.latest_price(&order.symbol).await? else {
                continue;
            };
            // Inclusive triggers; an untriggered limit stays pending.
            let triggered = match order.side {
                OrderSide::Buy => last.price <= limit,
                OrderSide::Sell => last.price >= limit,
            };
            if !triggered {
                continue;
            }
            // Fill at the observed price, not the limit price.
            self.fill_flat(&order, quantity, last.price, tick).await?;
        }
        Ok(())
    }

    async fn fill_flat(
        &self,
        order: &Order,
        quantity: Decimal,
        price: Decimal,
        tick: i64,
    ) -> Result<(), EngineError> {
        match order.side {
            OrderSide::Buy => self.fill_buy(order, quantity, price, tick).await,
            OrderSide::Sell => self.fill_sell(order, quantity, price, tick).await,
        }
    }

    async fn fill_buy(
        &self,
        order: &Order,
        quantity: Decimal,
        price: Decimal,
        tick: i64,
    ) -> Result<(), EngineError> {
        let Some(player) = self.store.player(order.game_id, order.player_id).await? else {
            self.reject(order, "player is not part of this game").await?;
            return Ok(());
        };

        let cost = quantity * price;
        if player.balance < cost {
            self.reject(order, "insufficient balance").await?;
            return Ok(());
        }

        // CAS from pending; a replayed phase finds the order terminal and
        // stops here, so fills are never duplicated.
        if !self
            .store
            .mark_order(order.id, OrderStatus::Filled, Some(price))
            .await?
        {
            return Ok(());
        }

        self.store
            .insert_execution(NewExecution::from_fill(order, OrderSide::Buy, quantity, price, tick))
            .await?;

        match self
            .store
            .open_position(order.game_id, order.player_id, &order.symbol)
            .await?
        {
            Some(position) => {
                let new_quantity = position.quantity + quantity;
                let new_entry =
                    weighted_entry(position.quantity, position.entry_price, quantity, price);
                self.store
                    .update_position(
                        position.id,
                        PositionPatch {
                            quantity: Some(new_quantity),
                            entry_price: Some(new_entry),
                            current_price: Some(price),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                self.store
                    .insert_position(NewPosition {
                        game_id: order.game_id,
                        player_id: order.player_id,
                        symbol: order.symbol.clone(),
                        side: OrderSide::Buy,
                        quantity,
                        entry_price: price,
                        current_price: Some(price),
                        leverage: 1,
                    })
                    .await?;
            }
        }

        self.settle_player(order.game_id, order.player_id, player.balance - cost)
            .await?;
        self.emit_fill(order, quantity, price, tick);
        Ok(())
    }

    async fn fill_sell(
        &self,
        order: &Order,
        quantity: Decimal,
        price: Decimal,
        tick: i64,
    ) -> Result<(), EngineError> {
        let Some(position) = self
            .store
            .open_position(order.game_id, order.player_id, &order.symbol)
            .await?
        else {
            self.reject(order, "no open position to sell").await?;
            return Ok(());
        };
        if position.side != OrderSide::Buy {
            self.reject(order, "no open position to sell").await?;
            return Ok(());
        }
        if quantity > position.quantity {
            self.reject(order, "sell quantity exceeds open position").await?;
            return Ok(());
        }
        let Some(player) = self.store.player(order.game_id, order.player_id).await? else {
            self.reject(order, "player is not part of this game").await?;
            return Ok(());
        };

        if !self
            .store
            .mark_order(order.id, OrderStatus::Filled, Some(price))
            .await?
        {
            return Ok(());
        }

        self.store
            .insert_execution(NewExecution::from_fill(order, OrderSide::Sell, quantity, price, tick))
            .await?;

        self.reduce_position(&position, quantity, price).await?;
        self.settle_player(order.game_id, order.player_id, player.balance + quantity * price)
            .await?;
        self.emit_fill(order, quantity, price, tick);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase C: mark-to-market
    // ------------------------------------------------------------------

    async fn mark_to_market(&self, game_id: Uuid) -> Result<(), EngineError> {
        for position in self.store.open_positions(game_id).await? {
            let Some(last) = self.store.latest_price(&position.symbol).await? else {
                continue;
            };
            self.store
                .update_position(
                    position.id,
                    PositionPatch {
                        current_price: Some(last.price),
                        unrealized_pnl: Some(position.mark_pnl(last.price)),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase D: equity refresh
    // ------------------------------------------------------------------

    async fn refresh_equities(&self, game_id: Uuid) -> Result<(), EngineError> {
        let positions = self.store.open_positions(game_id).await?;
        for player in self.store.players(game_id).await? {
            let unrealized: Decimal = positions
                .iter()
                .filter(|p| p.player_id == player.user_id)
                .map(|p| p.unrealized_pnl)
                .sum();
            // Balance is owned by the fill paths; this phase only rewrites
            // equity.
            self.store
                .update_player_equity(game_id, player.user_id, player.balance + unrealized)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase E: conditional orders (take-profit / stop-loss)
    // ------------------------------------------------------------------

    async fn process_conditional_orders(&self, game_id: Uuid, tick: i64) -> Result<(), EngineError> {
        let mut orders = self
            .store
            .pending_orders(game_id, Some(OrderType::TakeProfit))
            .await?;
        orders.extend(
            self.store
                .pending_orders(game_id, Some(OrderType::StopLoss))
                .await?,
        );

        for order in orders {
            let Some(position) = self.conditional_target(&order).await? else {
                self.reject(&order, "conditional order must reference an open buy position")
                    .await?;
                continue;
            };
            let Some(trigger) = order.trigger_price else {
                self.reject(&order, "conditional order is missing its trigger price")
                    .await?;
                continue;
            };
            let Some(last) = self.store.latest_price(&order.symbol).await? else {
                continue;
            };

            let fired = match order.order_type {
                OrderType::TakeProfit => last.price >= trigger,
                OrderType::StopLoss => last.price <= trigger,
                _ => false,
            };
            if !fired {
                continue;
            }

            // NULL quantity means "the full position".
            let execute_qty = order.quantity.unwrap_or(position.quantity);
            if execute_qty <= Decimal::ZERO || execute_qty > position.quantity {
                self.reject(&order, "trigger quantity exceeds open position").await?;
                continue;
            }
            let Some(player) = self.store.player(order.game_id, order.player_id).await? else {
                self.reject(&order, "player is not part of this game").await?;
                continue;
            };

            if !self
                .store
                .mark_order(order.id, OrderStatus::Filled, Some(last.price))
                .await?
            {
                continue;
            }

            self.store
                .insert_execution(NewExecution::from_fill(
                    &order,
                    OrderSide::Sell,
                    execute_qty,
                    last.price,
                    tick,
                ))
                .await?;

            self.reduce_position(&position, execute_qty, last.price).await?;
            self.settle_player(
                order.game_id,
                order.player_id,
                player.balance + execute_qty * last.price,
            )
            .await?;
            self.emit_fill(&order, execute_qty, last.price, tick);
        }
        Ok(())
    }

    /// Resolves the open BUY position a conditional order targets. The
    /// reference must match the order's game, player and symbol.
    async fn conditional_target(&self, order: &Order) -> Result<Option<Position>, EngineError> {
        let Some(position_id) = order.position_id else {
            return Ok(None);
        };
        let Some(position) = self.store.position(position_id).await? else {
            return Ok(None);
        };
        let valid = position.status == PositionStatus::Open
            && position.side == OrderSide::Buy
            && position.game_id == order.game_id
            && position.player_id == order.player_id
            && position.symbol == order.symbol;
        Ok(valid.then_some(position))
    }

    // ------------------------------------------------------------------
    // Phase F: equity history
    // ------------------------------------------------------------------

    async fn record_equity_history(&self, game_id: Uuid, tick: i64) -> Result<(), EngineError> {
        for player in self.store.players(game_id).await? {
            self.store
                .insert_equity_history(game_id, player.user_id, tick, player.balance, player.equity)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared fill plumbing
    // ------------------------------------------------------------------

    /// Shrinks `position` by `quantity` at `price`, closing it when the full
    /// quantity is sold. A close realizes `(price - entry) * quantity` on the
    /// position row; leverage is deliberately not applied to realized cash.
    pub(crate) async fn reduce_position(
        &self,
        position: &Position,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), EngineError> {
        if quantity == position.quantity {
            self.store
                .update_position(
                    position.id,
                    PositionPatch {
                        status: Some(PositionStatus::Closed),
                        current_price: Some(price),
                        unrealized_pnl: Some((price - position.entry_price) * quantity),
                        ..Default::default()
                    },
                )
                .await?;
            self.events.publish(GameEvent::PositionClosed {
                game_id: position.game_id,
                position_id: position.id,
                player_id: position.player_id,
                symbol: position.symbol.clone(),
                close_price: price,
            });
        } else {
            self.store
                .update_position(
                    position.id,
                    PositionPatch {
                        quantity: Some(position.quantity - quantity),
                        current_price: Some(price),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Writes a player's new cash balance together with the equity implied
    /// by it and the remaining open positions. Runs after every fill so
    /// equity stays consistent with cash without waiting for the refresh
    /// phase.
    pub(crate) async fn settle_player(
        &self,
        game_id: Uuid,
        user_id: Uuid,
        new_balance: Decimal,
    ) -> Result<(), EngineError> {
        let unrealized: Decimal = self
            .store
            .open_positions(game_id)
            .await?
            .iter()
            .filter(|p| p.player_id == user_id)
            .map(|p| p.unrealized_pnl)
            .sum();
        let equity = new_balance + unrealized;
        self.store
            .update_player(game_id, user_id, new_balance, equity)
            .await?;
        self.events.publish(GameEvent::EquityUpdated {
            game_id,
            player_id: user_id,
            balance: new_balance,
            equity,
        });
        Ok(())
    }

    pub(crate) async fn reject(&self, order: &Order, reason: &str) -> Result<(), EngineError> {
        if self
            .store
            .mark_order(order.id, OrderStatus::Rejected, None)
            .await?
        {
            warn!(order_id = %order.id, game_id = %order.game_id, reason, "order rejected");
            metrics::record_order_rejected();
            self.events.publish(GameEvent::OrderRejected {
                game_id: order.game_id,
                order_id: order.id,
                player_id: order.player_id,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    fn emit_fill(&self, order: &Order, quantity: Decimal, price: Decimal, tick: i64) {
        metrics::record_order_filled(order.order_type);
        self.events.publish(GameEvent::OrderFilled {
            game_id: order.game_id,
            order_id: order.id,
            player_id: order.player_id,
            symbol: order.symbol.clone(),
            order_type: order.order_type,
            side: order.side,
            quantity,
            price,
            tick,
        });
    }
}

fn positive_quantity(order: &Order) -> Option<Decimal> {
    order.quantity.filter(|q| *q > Decimal::ZERO)
}
