//! Global tick driver.
//!
//! One invocation ingests the latest vendor quotes, appends a price row per
//! symbol under the next tick number, advances the singleton tick counter
//! (strictly after the price inserts, so "latest price" is a consistent
//! snapshot for readers of the new tick) and fans the tick out to every
//! started game. Expired games are closed out instead of ticked.

use chrono::Utc;
use futures::future;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::engine::{EngineError, TickEngine};
use crate::events::{EventBus, GameEvent};
use crate::feed::QuoteSource;
use crate::metrics;
use crate::store::Store;

pub struct TickDriver {
    store: Arc<dyn Store>,
    quotes: Arc<dyn QuoteSource>,
    engine: Arc<TickEngine>,
    events: EventBus,
    symbols: Vec<String>,
}

impl TickDriver {
    pub fn new(
        store: Arc<dyn Store>,
        quotes: Arc<dyn QuoteSource>,
        engine: Arc<TickEngine>,
        events: EventBus,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            store,
            quotes,
            engine,
            events,
            symbols,
        }
    }

    /// Runs exactly one global tick. Safe to invoke concurrently with a
    /// scheduled run: each invocation computes its own tick number and only
    /// writes rows scoped to it.
    pub async fn run_once(&self) -> Result<i64, EngineError> {
        // A feed outage degrades to "no quotes this tick"; the tick itself
        // must still advance.
        let quotes = match self.quotes.fetch_quotes(&self.symbols).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("price feed unavailable, advancing tick without quotes: {e}");
                metrics::record_feed_failure();
                Default::default()
            }
        };

        let state = self.store.game_state().await?;
        let tick = state.current_tick + 1;

        // Price rows land before the counter moves.
        for symbol in &self.symbols {
            if let Some(quote) = quotes.get(symbol) {
                self.store.insert_price(symbol, quote.price, tick).await?;
            }
        }
        self.store.advance_tick(tick).await?;
        debug!(tick, quotes = quotes.len(), "advanced global tick");

        let now = Utc::now();
        let mut handles: Vec<(Uuid, tokio::task::JoinHandle<Result<(), EngineError>>)> =
            Vec::new();
        for game in self.store.active_games().await? {
            let engine = Arc::clone(&self.engine);
            let game_id = game.id;
            if game.is_expired(now) {
                handles.push((
                    game_id,
                    tokio::spawn(async move { engine.close_out_game(&game).await }),
                ));
            } else {
                handles.push((
                    game_id,
                    tokio::spawn(async move { engine.run_game_tick(game_id, tick).await }),
                ));
            }
        }

        // Per-game failures are isolated; one aborted game never poisons the
        // rest of the tick.
        let results = future::join_all(
            handles
                .into_iter()
                .map(|(game_id, handle)| async move { (game_id, handle.await) }),
        )
        .await;
        for (game_id, joined) in results {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(game_id = %game_id, tick, "game tick aborted: {e}");
                    metrics::record_game_tick_failure();
                }
                Err(e) => {
                    error!(game_id = %game_id, tick, "game tick task panicked: {e}");
                    metrics::record_game_tick_failure();
                }
            }
        }

        metrics::record_tick();
        self.events.publish(GameEvent::TickCompleted { tick });
        Ok(tick)
    }
}
