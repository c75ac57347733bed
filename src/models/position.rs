use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::order::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "position_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open or closed holding. At most one `open` position exists per
/// `(game_id, player_id, symbol)`; further buys merge into it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub leverage: i32,
    pub unrealized_pnl: Decimal,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Mark-to-market P&L at `last`. Leverage is honored here and only here;
    /// fill paths and cash math treat notional as `quantity * price`.
    pub fn mark_pnl(&self, last: Decimal) -> Decimal {
        let leverage = Decimal::from(self.leverage.max(1));
        match self.side {
            OrderSide::Buy => (last - self.entry_price) * self.quantity * leverage,
            OrderSide::Sell => (self.entry_price - last) * self.quantity * leverage,
        }
    }
}

/// Volume-weighted average entry after merging `add_qty @ price` into an
/// existing `old_qty @ old_entry` holding.
pub fn weighted_entry(old_qty: Decimal, old_entry: Decimal, add_qty: Decimal, price: Decimal) -> Decimal {
    let total = old_qty + add_qty;
    if total.is_zero() {
        return price;
    }
    (old_qty * old_entry + add_qty * price) / total
}

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub game_id: Uuid,
    pub player_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Option<Decimal>,
    pub leverage: i32,
}

/// Partial update applied through the store gateway. Unset fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct PositionPatch {
    pub status: Option<PositionStatus>,
    pub current_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub entry_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: OrderSide, qty: Decimal, entry: Decimal, leverage: i32) -> Position {
        let now = Utc::now();
        Position {
            id: Uuid::new_v4(),
            game_id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            side,
            quantity: qty,
            entry_price: entry,
            current_price: None,
            leverage,
            unrealized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn buy_pnl_rises_with_price() {
        let pos = position(OrderSide::Buy, dec!(0.5), dec!(50000), 1);
        assert_eq!(pos.mark_pnl(dec!(51000)), dec!(500));
        assert_eq!(pos.mark_pnl(dec!(49000)), dec!(-500));
    }

    #[test]
    fn sell_pnl_mirrors_buy() {
        let pos = position(OrderSide::Sell, dec!(0.5), dec!(50000), 1);
        assert_eq!(pos.mark_pnl(dec!(49000)), dec!(500));
    }

    #[test]
    fn leverage_scales_mark_pnl() {
        let pos = position(OrderSide::Buy, dec!(1), dec!(100), 5);
        assert_eq!(pos.mark_pnl(dec!(110)), dec!(50));
    }

    #[test]
    fn weighted_entry_averages_by_quantity() {
        // 0.1 @ 50k merged with 0.1 @ 60k -> 0.2 @ 55k
        let entry = weighted_entry(dec!(0.1), dec!(50000), dec!(0.1), dec!(60000));
        assert_eq!(entry, dec!(55000));
    }

    #[test]
    fn weighted_entry_of_empty_position_is_fill_price() {
        assert_eq!(weighted_entry(dec!(0), dec!(0), dec!(0.2), dec!(400)), dec!(400));
    }
}
