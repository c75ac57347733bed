use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // Games
        .route(
            "/games",
            post(handlers::games::create_game).get(handlers::games::list_open_games),
        )
        .route("/games/:game_id", get(handlers::games::get_game))
        .route("/games/:game_id/join", post(handlers::games::join_game))
        .route("/games/:game_id/players", get(handlers::games::get_players))
        .route(
            "/games/:game_id/equity-history",
            get(handlers::games::get_equity_history),
        )
        // Orders
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:order_id", delete(handlers::orders::cancel_order))
        .route("/games/:game_id/orders", get(handlers::orders::list_orders))
        .route(
            "/games/:game_id/positions",
            get(handlers::orders::list_positions),
        )
        .route(
            "/games/:game_id/executions",
            get(handlers::orders::list_executions),
        )
        // Stats
        .route("/leaderboard", get(handlers::stats::leaderboard))
}
