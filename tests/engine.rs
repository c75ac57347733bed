//! End-to-end tests for the match engine: the per-game tick pipeline, the
//! global tick driver and game close-out, exercised over the in-memory
//! store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use alpha_royale_backend::engine::{TickDriver, TickEngine};
use alpha_royale_backend::events::EventBus;
use alpha_royale_backend::feed::{PriceFeedError, Quote, QuoteSource};
use alpha_royale_backend::models::{
    Game, NewOrder, NewPosition, Order, OrderSide, OrderStatus, OrderType, PositionStatus,
};
use alpha_royale_backend::store::{MemoryStore, Store};

// =============================================================================
// Test utilities
// =============================================================================

fn engine_for(store: &Arc<MemoryStore>) -> TickEngine {
    TickEngine::new(store.clone(), EventBus::new(64))
}

async fn two_player_game(store: &Arc<MemoryStore>, initial: Decimal) -> (Game, Uuid, Uuid) {
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    let game = store.create_game(p1, initial, 60).await.unwrap();
    let game = store.join_game(game.id, p2).await.unwrap();
    (game, p1, p2)
}

/// Appends a price row under `tick` and advances the global counter, the way
/// the driver does it.
async fn set_price(store: &Arc<MemoryStore>, symbol: &str, price: Decimal, tick: i64) {
    store.insert_price(symbol, price, tick).await.unwrap();
    store.advance_tick(tick).await.unwrap();
}

fn market(game: &Game, player: Uuid, symbol: &str, side: OrderSide, qty: Decimal) -> NewOrder {
    NewOrder {
        game_id: game.id,
        player_id: player,
        symbol: symbol.to_string(),
        order_type: OrderType::Market,
        side,
        quantity: Some(qty),
        price: None,
        trigger_price: None,
        position_id: None,
    }
}

fn limit(
    game: &Game,
    player: Uuid,
    symbol: &str,
    side: OrderSide,
    qty: Decimal,
    price: Decimal,
) -> NewOrder {
    NewOrder {
        game_id: game.id,
        player_id: player,
        symbol: symbol.to_string(),
        order_type: OrderType::Limit,
        side,
        quantity: Some(qty),
        price: Some(price),
        trigger_price: None,
        position_id: None,
    }
}

fn conditional(
    game: &Game,
    player: Uuid,
    symbol: &str,
    order_type: OrderType,
    trigger: Decimal,
    qty: Option<Decimal>,
    position_id: Uuid,
) -> NewOrder {
    NewOrder {
        game_id: game.id,
        player_id: player,
        symbol: symbol.to_string(),
        order_type,
        side: OrderSide::Sell,
        quantity: qty,
        price: None,
        trigger_price: Some(trigger),
        position_id: Some(position_id),
    }
}

/// Opens a position directly in the store, bypassing the fill paths.
async fn seed_position(
    store: &Arc<MemoryStore>,
    game: &Game,
    player: Uuid,
    symbol: &str,
    qty: Decimal,
    entry: Decimal,
    leverage: i32,
) -> Uuid {
    store
        .insert_position(NewPosition {
            game_id: game.id,
            player_id: player,
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity: qty,
            entry_price: entry,
            current_price: None,
            leverage,
        })
        .await
        .unwrap()
        .id
}

async fn order_status(store: &Arc<MemoryStore>, order: &Order) -> OrderStatus {
    store.order(order.id).await.unwrap().unwrap().status
}

// =============================================================================
// Seed scenarios
// =============================================================================

#[tokio::test]
async fn market_buy_creates_position_and_debits_cash() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();

    engine.run_game_tick(game.id, 1).await.unwrap();

    let filled = store.order(order.id).await.unwrap().unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_price, Some(dec!(50000)));
    assert!(filled.filled_at.is_some());

    let position = store
        .open_position(game.id, p1, "BTC")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.quantity, dec!(0.1));
    assert_eq!(position.entry_price, dec!(50000));
    assert_eq!(position.side, OrderSide::Buy);

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(5000));
    // Unrealized P&L is zero at entry.
    assert_eq!(player.equity, dec!(5000));

    let executions = store.executions_for_game(game.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].order_id, order.id);
    assert_eq!(executions[0].execution_price, dec!(50000));
    assert_eq!(executions[0].game_state, 1);

    let history = store.equity_history(game.id, Some(p1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].balance, dec!(5000));
    assert_eq!(history[0].equity, dec!(5000));
}

#[tokio::test]
async fn sell_without_position_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "ETH", dec!(3000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "ETH", OrderSide::Sell, dec!(1)))
        .await
        .unwrap();

    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Rejected);
    assert!(store.open_position(game.id, p1, "ETH").await.unwrap().is_none());
    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10000));
    assert!(store.executions_for_game(game.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn take_profit_triggers_and_closes_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;
    store.update_player(game.id, p1, dec!(0), dec!(0)).await.unwrap();

    let position_id = seed_position(&store, &game, p1, "BTC", dec!(0.2), dec!(51000), 1).await;
    let order = store
        .insert_order(conditional(
            &game,
            p1,
            "BTC",
            OrderType::TakeProfit,
            dec!(55000),
            Some(dec!(0.2)),
            position_id,
        ))
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(55100), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    let filled = store.order(order.id).await.unwrap().unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_price, Some(dec!(55100)));

    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    assert_eq!(position.current_price, Some(dec!(55100)));
    // Realized on close: (55100 - 51000) * 0.2
    assert_eq!(position.unrealized_pnl, dec!(820));

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(11020));
    assert_eq!(player.equity, dec!(11020));
}

#[tokio::test]
async fn stop_loss_triggers_and_closes_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;
    store.update_player(game.id, p1, dec!(0), dec!(0)).await.unwrap();

    let position_id = seed_position(&store, &game, p1, "BTC", dec!(0.2), dec!(51000), 1).await;
    let order = store
        .insert_order(conditional(
            &game,
            p1,
            "BTC",
            OrderType::StopLoss,
            dec!(48000),
            Some(dec!(0.2)),
            position_id,
        ))
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(47900), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Filled);
    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(9580));
}

#[tokio::test]
async fn buys_merge_with_weighted_average_entry() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(20000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(15000));

    set_price(&store, "BTC", dec!(60000), 2).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 2).await.unwrap();

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(9000));

    let position = store
        .open_position(game.id, p1, "BTC")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.quantity, dec!(0.2));
    assert_eq!(position.entry_price, dec!(55000));

    // Still at most one open position for the pair.
    let open = store.open_positions(game.id).await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn insufficient_balance_rejects_buy() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(4000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Rejected);
    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(4000));
    assert!(store.open_position(game.id, p1, "BTC").await.unwrap().is_none());
}

// =============================================================================
// Boundary behaviors
// =============================================================================

#[tokio::test]
async fn missing_price_keeps_orders_pending() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    let position_id = seed_position(&store, &game, p1, "SOL", dec!(1), dec!(100), 1).await;
    let market_order = store
        .insert_order(market(&game, p1, "SOL", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();
    let limit_order = store
        .insert_order(limit(&game, p1, "SOL", OrderSide::Buy, dec!(1), dec!(90)))
        .await
        .unwrap();
    let tp_order = store
        .insert_order(conditional(
            &game,
            p1,
            "SOL",
            OrderType::TakeProfit,
            dec!(120),
            None,
            position_id,
        ))
        .await
        .unwrap();

    // No price row for SOL was ever written.
    store.advance_tick(1).await.unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &market_order).await, OrderStatus::Pending);
    assert_eq!(order_status(&store, &limit_order).await, OrderStatus::Pending);
    assert_eq!(order_status(&store, &tp_order).await, OrderStatus::Pending);
}

#[tokio::test]
async fn non_positive_quantity_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Rejected);
}

#[tokio::test]
async fn limit_buy_triggers_inclusively_at_limit_price() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let at_limit = store
        .insert_order(limit(&game, p1, "BTC", OrderSide::Buy, dec!(0.1), dec!(50000)))
        .await
        .unwrap();
    let below_market = store
        .insert_order(limit(&game, p1, "ETH", OrderSide::Buy, dec!(1), dec!(2900)))
        .await
        .unwrap();
    store.insert_price("ETH", dec!(3000), 1).await.unwrap();

    engine.run_game_tick(game.id, 1).await.unwrap();

    let filled = store.order(at_limit.id).await.unwrap().unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_price, Some(dec!(50000)));
    // last (3000) > limit (2900): not triggered, never rejected.
    assert_eq!(order_status(&store, &below_market).await, OrderStatus::Pending);
}

#[tokio::test]
async fn limit_sell_fills_at_observed_price_not_limit() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    let order = store
        .insert_order(limit(&game, p1, "BTC", OrderSide::Sell, dec!(0.1), dec!(51000)))
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(51500), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    let filled = store.order(order.id).await.unwrap().unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.filled_price, Some(dec!(51500)));

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10000) + dec!(5150));
    assert!(store.open_position(game.id, p1, "BTC").await.unwrap().is_none());
}

#[tokio::test]
async fn partial_sell_reduces_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    seed_position(&store, &game, p1, "BTC", dec!(0.3), dec!(50000), 1).await;
    set_price(&store, "BTC", dec!(52000), 1).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Sell, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    let position = store
        .open_position(game.id, p1, "BTC")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(position.quantity, dec!(0.2));
    assert_eq!(position.current_price, Some(dec!(52000)));

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10000) + dec!(5200));
}

#[tokio::test]
async fn sell_exceeding_position_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Sell, dec!(0.2)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Rejected);
    let position = store
        .open_position(game.id, p1, "BTC")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.quantity, dec!(0.1));
}

#[tokio::test]
async fn conditional_triggers_are_inclusive() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, p2) = two_player_game(&store, dec!(10000)).await;

    let tp_position = seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    let sl_position = seed_position(&store, &game, p2, "ETH", dec!(1), dec!(3000), 1).await;
    let tp = store
        .insert_order(conditional(
            &game,
            p1,
            "BTC",
            OrderType::TakeProfit,
            dec!(51000),
            None,
            tp_position,
        ))
        .await
        .unwrap();
    let sl = store
        .insert_order(conditional(
            &game,
            p2,
            "ETH",
            OrderType::StopLoss,
            dec!(2900),
            None,
            sl_position,
        ))
        .await
        .unwrap();

    // last == trigger on both sides.
    store.insert_price("BTC", dec!(51000), 1).await.unwrap();
    set_price(&store, "ETH", dec!(2900), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &tp).await, OrderStatus::Filled);
    assert_eq!(order_status(&store, &sl).await, OrderStatus::Filled);
}

#[tokio::test]
async fn conditional_null_quantity_closes_full_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    let position_id = seed_position(&store, &game, p1, "BTC", dec!(0.25), dec!(40000), 1).await;
    store
        .insert_order(conditional(
            &game,
            p1,
            "BTC",
            OrderType::TakeProfit,
            dec!(44000),
            None,
            position_id,
        ))
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(44000), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Closed);
    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10000) + dec!(11000));
}

#[tokio::test]
async fn conditional_quantity_above_position_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    let position_id = seed_position(&store, &game, p1, "BTC", dec!(0.2), dec!(50000), 1).await;
    let order = store
        .insert_order(conditional(
            &game,
            p1,
            "BTC",
            OrderType::TakeProfit,
            dec!(51000),
            Some(dec!(0.5)),
            position_id,
        ))
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(52000), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Rejected);
    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Open);
}

#[tokio::test]
async fn conditional_must_reference_own_open_buy_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, p2) = two_player_game(&store, dec!(10000)).await;

    // p2 tries to take profit on p1's position.
    let position_id = seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    let foreign = store
        .insert_order(conditional(
            &game,
            p2,
            "BTC",
            OrderType::TakeProfit,
            dec!(51000),
            None,
            position_id,
        ))
        .await
        .unwrap();
    let unreferenced = store
        .insert_order(NewOrder {
            position_id: None,
            ..conditional(&game, p1, "BTC", OrderType::TakeProfit, dec!(51000), None, position_id)
        })
        .await
        .unwrap();

    set_price(&store, "BTC", dec!(52000), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &foreign).await, OrderStatus::Rejected);
    assert_eq!(order_status(&store, &unreferenced).await, OrderStatus::Rejected);
    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Open);
}

// =============================================================================
// Invariants and idempotence
// =============================================================================

#[tokio::test]
async fn buy_then_sell_round_trip_is_cash_neutral() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    set_price(&store, "BTC", dec!(50000), 2).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Sell, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 2).await.unwrap();

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10000));
    assert_eq!(player.equity, dec!(10000));
    assert!(store.open_positions(game.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn replayed_tick_does_not_duplicate_fills() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();

    engine.run_game_tick(game.id, 1).await.unwrap();
    // At-least-once execution: the same (game, tick) is processed again.
    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Filled);
    assert_eq!(store.executions_for_game(game.id).await.unwrap().len(), 1);

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(5000));

    let history = store.equity_history(game.id, Some(p1)).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn equity_tracks_balance_plus_unrealized_pnl() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, p2) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    engine.run_game_tick(game.id, 1).await.unwrap();

    set_price(&store, "BTC", dec!(52000), 2).await;
    engine.run_game_tick(game.id, 2).await.unwrap();

    let position = store
        .open_position(game.id, p1, "BTC")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.unrealized_pnl, dec!(200));
    assert_eq!(position.current_price, Some(dec!(52000)));

    let p1_row = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(p1_row.equity, p1_row.balance + dec!(200));

    // The idle opponent keeps a flat equity curve.
    let p2_row = store.player(game.id, p2).await.unwrap().unwrap();
    assert_eq!(p2_row.equity, dec!(10000));

    let history = store.equity_history(game.id, Some(p1)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].equity, dec!(5200));
}

#[tokio::test]
async fn leverage_applies_to_mark_to_market_but_not_cash() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    let position_id = seed_position(&store, &game, p1, "BTC", dec!(1), dec!(100), 3).await;
    set_price(&store, "BTC", dec!(110), 1).await;
    engine.run_game_tick(game.id, 1).await.unwrap();

    let position = store.position(position_id).await.unwrap().unwrap();
    assert_eq!(position.unrealized_pnl, dec!(30));
    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.equity, dec!(10030));

    // Closing realizes plain notional: cash credit is qty * price.
    store
        .insert_order(market(&game, p1, "BTC", OrderSide::Sell, dec!(1)))
        .await
        .unwrap();
    set_price(&store, "BTC", dec!(110), 2).await;
    engine.run_game_tick(game.id, 2).await.unwrap();

    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(10110));
    assert_eq!(player.equity, dec!(10110));
}

#[tokio::test]
async fn cancelled_orders_are_never_filled() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    set_price(&store, "BTC", dec!(50000), 1).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();
    assert!(store
        .mark_order(order.id, OrderStatus::Cancelled, None)
        .await
        .unwrap());

    engine.run_game_tick(game.id, 1).await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Cancelled);
    assert!(store.executions_for_game(game.id).await.unwrap().is_empty());
}

// =============================================================================
// Global tick driver
// =============================================================================

struct StaticQuotes(HashMap<String, Quote>);

impl StaticQuotes {
    fn of(prices: &[(&str, Decimal)]) -> Self {
        Self(
            prices
                .iter()
                .map(|(symbol, price)| {
                    (
                        symbol.to_string(),
                        Quote {
                            price: *price,
                            at: chrono::Utc::now(),
                        },
                    )
                })
                .collect(),
        )
    }
}

#[async_trait]
impl QuoteSource for StaticQuotes {
    async fn fetch_quotes(
        &self,
        _symbols: &[String],
    ) -> Result<HashMap<String, Quote>, PriceFeedError> {
        Ok(self.0.clone())
    }
}

struct DownFeed;

#[async_trait]
impl QuoteSource for DownFeed {
    async fn fetch_quotes(
        &self,
        _symbols: &[String],
    ) -> Result<HashMap<String, Quote>, PriceFeedError> {
        Err(PriceFeedError::Unavailable("connection refused".to_string()))
    }
}

fn driver_for(store: &Arc<MemoryStore>, quotes: impl QuoteSource + 'static) -> TickDriver {
    let events = EventBus::new(64);
    let engine = Arc::new(TickEngine::new(store.clone(), events.clone()));
    TickDriver::new(
        store.clone(),
        Arc::new(quotes),
        engine,
        events,
        vec!["BTC".to_string(), "ETH".to_string()],
    )
}

#[tokio::test]
async fn driver_records_prices_under_the_new_tick() {
    let store = Arc::new(MemoryStore::new());
    let driver = driver_for(&store, StaticQuotes::of(&[("BTC", dec!(50000))]));

    let tick = driver.run_once().await.unwrap();
    assert_eq!(tick, 1);

    let state = store.game_state().await.unwrap();
    assert_eq!(state.current_tick, 1);

    let last = store.latest_price("BTC").await.unwrap().unwrap();
    assert_eq!(last.price, dec!(50000));
    assert_eq!(last.game_state, 1);
    // ETH had no quote this tick; there is simply no row for it.
    assert!(store.latest_price("ETH").await.unwrap().is_none());

    // The counter is strictly monotone across invocations.
    assert_eq!(driver.run_once().await.unwrap(), 2);
    assert_eq!(store.game_state().await.unwrap().current_tick, 2);
}

#[tokio::test]
async fn driver_advances_tick_through_feed_outage() {
    let store = Arc::new(MemoryStore::new());
    let driver = driver_for(&store, DownFeed);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();

    let tick = driver.run_once().await.unwrap();
    assert_eq!(tick, 1);
    assert_eq!(store.game_state().await.unwrap().current_tick, 1);
    // No price, so the order is neither filled nor rejected.
    assert_eq!(order_status(&store, &order).await, OrderStatus::Pending);
}

#[tokio::test]
async fn driver_dispatches_ticks_to_active_games() {
    let store = Arc::new(MemoryStore::new());
    let driver = driver_for(&store, StaticQuotes::of(&[("BTC", dec!(50000))]));
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;
    let order = store
        .insert_order(market(&game, p1, "BTC", OrderSide::Buy, dec!(0.1)))
        .await
        .unwrap();

    driver.run_once().await.unwrap();

    assert_eq!(order_status(&store, &order).await, OrderStatus::Filled);
    let player = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(player.balance, dec!(5000));
}

// =============================================================================
// Game close-out
// =============================================================================

#[tokio::test]
async fn expired_game_is_closed_out_by_the_driver() {
    let store = Arc::new(MemoryStore::new());
    let driver = driver_for(&store, StaticQuotes::of(&[("BTC", dec!(55000))]));
    let (game, p1, p2) = two_player_game(&store, dec!(10000)).await;

    // p1 holds 0.1 BTC bought at 50000; cash reflects the purchase.
    seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    store
        .update_player(game.id, p1, dec!(5000), dec!(5000))
        .await
        .unwrap();
    let leftover = store
        .insert_order(market(&game, p2, "BTC", OrderSide::Buy, dec!(0.05)))
        .await
        .unwrap();

    store.set_started_at(game.id, chrono::Utc::now() - chrono::Duration::minutes(game.duration_minutes as i64 + 1));
    driver.run_once().await.unwrap();

    // Remaining pending orders are rejected, not filled.
    assert_eq!(order_status(&store, &leftover).await, OrderStatus::Rejected);

    // The position converted to cash at the latest price.
    assert!(store.open_positions(game.id).await.unwrap().is_empty());
    let p1_row = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(p1_row.balance, dec!(5000) + dec!(5500));
    assert_eq!(p1_row.equity, p1_row.balance);

    let completed = store.game(game.id).await.unwrap().unwrap();
    assert_eq!(completed.status, alpha_royale_backend::models::GameStatus::Completed);
    assert!(completed.ended_at.is_some());
    // 10500 beats the idle player's 10000.
    assert_eq!(completed.winner_id, Some(p1));

    // Leaderboard reflects the finished game.
    let entries = store.leaderboard(10).await.unwrap();
    let p1_entry = entries.iter().find(|e| e.user_id == p1).unwrap();
    assert_eq!(p1_entry.wins, 1);
    assert_eq!(p1_entry.games_played, 1);
}

#[tokio::test]
async fn close_out_without_prices_falls_back_to_entry() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    seed_position(&store, &game, p1, "BTC", dec!(0.1), dec!(50000), 1).await;
    let game = store.game(game.id).await.unwrap().unwrap();
    engine.close_out_game(&game).await.unwrap();

    // latest ?? current ?? entry resolves to the entry price.
    let p1_row = store.player(game.id, p1).await.unwrap().unwrap();
    assert_eq!(p1_row.balance, dec!(10000) + dec!(5000));
}

#[tokio::test]
async fn equal_equity_tie_goes_to_first_joiner() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store);
    let (game, p1, _) = two_player_game(&store, dec!(10000)).await;

    let game = store.game(game.id).await.unwrap().unwrap();
    engine.close_out_game(&game).await.unwrap();

    let completed = store.game(game.id).await.unwrap().unwrap();
    assert_eq!(completed.winner_id, Some(p1));
}
