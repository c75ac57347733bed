//! WebSocket stream of engine events.
//!
//! Downstream consumers subscribe to a game's events; the engine never
//! consumes notifications itself. A lagging consumer loses messages rather
//! than slowing the engine.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new().route("/games/:game_id", get(game_events))
}

async fn game_events(
    ws: WebSocketUpgrade,
    Path(game_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state, game_id))
}

async fn stream_events(mut socket: WebSocket, state: Arc<AppState>, game_id: Uuid) {
    debug!(game_id = %game_id, "websocket subscriber connected");
    let mut receiver = state.events.subscribe();

    loop {
        match receiver.recv().await {
            Ok(event) => {
                // Game-scoped events are filtered; global events (tick
                // completion) go to every subscriber.
                if event.game_id().is_some_and(|id| id != game_id) {
                    continue;
                }
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(game_id = %game_id, missed, "websocket subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(game_id = %game_id, "websocket subscriber disconnected");
}
