//! Realtime change-notification bus.
//!
//! The engine and driver publish events here; downstream consumers (the
//! WebSocket endpoint) subscribe. Publishing is best-effort: a slow or
//! absent consumer never back-pressures the engine.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{OrderSide, OrderType};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    TickCompleted {
        tick: i64,
    },
    OrderFilled {
        game_id: Uuid,
        order_id: Uuid,
        player_id: Uuid,
        symbol: String,
        order_type: OrderType,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        tick: i64,
    },
    OrderRejected {
        game_id: Uuid,
        order_id: Uuid,
        player_id: Uuid,
        reason: String,
    },
    PositionClosed {
        game_id: Uuid,
        position_id: Uuid,
        player_id: Uuid,
        symbol: String,
        close_price: Decimal,
    },
    EquityUpdated {
        game_id: Uuid,
        player_id: Uuid,
        balance: Decimal,
        equity: Decimal,
    },
    GameCompleted {
        game_id: Uuid,
        winner_id: Option<Uuid>,
    },
}

impl GameEvent {
    /// Game the event belongs to; global events return None.
    pub fn game_id(&self) -> Option<Uuid> {
        match self {
            GameEvent::TickCompleted { .. } => None,
            GameEvent::OrderFilled { game_id, .. }
            | GameEvent::OrderRejected { game_id, .. }
            | GameEvent::PositionClosed { game_id, .. }
            | GameEvent::EquityUpdated { game_id, .. }
            | GameEvent::GameCompleted { game_id, .. } => Some(*game_id),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GameEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
