//! Prometheus-compatible metrics for the match engine:
//! - tick throughput and per-game aborts
//! - order fills and rejections
//! - completed games and price-feed outages

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::models::OrderType;

/// Metric names as constants for consistency
pub mod names {
    pub const TICKS_TOTAL: &str = "ticks_total";
    pub const GAME_TICK_FAILURES_TOTAL: &str = "game_tick_failures_total";
    pub const ORDERS_FILLED_TOTAL: &str = "orders_filled_total";
    pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
    pub const GAMES_COMPLETED_TOTAL: &str = "games_completed_total";
    pub const PRICE_FEED_FAILURES_TOTAL: &str = "price_feed_failures_total";
}

/// Installs the Prometheus recorder and returns the render handle.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_tick() {
    counter!(names::TICKS_TOTAL).increment(1);
}

pub fn record_game_tick_failure() {
    counter!(names::GAME_TICK_FAILURES_TOTAL).increment(1);
}

pub fn record_order_filled(order_type: OrderType) {
    counter!(names::ORDERS_FILLED_TOTAL, "order_type" => order_type.to_string()).increment(1);
}

pub fn record_order_rejected() {
    counter!(names::ORDERS_REJECTED_TOTAL).increment(1);
}

pub fn record_game_completed() {
    counter!(names::GAMES_COMPLETED_TOTAL).increment(1);
}

pub fn record_feed_failure() {
    counter!(names::PRICE_FEED_FAILURES_TOTAL).increment(1);
}
