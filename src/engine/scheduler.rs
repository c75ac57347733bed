//! Tick scheduler.
//!
//! A single self-rescheduling task runs the driver and then sleeps one tick
//! period; the next invocation is scheduled regardless of how the previous
//! one ended, so the chain cannot stall on a failing driver. A coarser
//! heartbeat checks that the tick task is still alive and respawns it when
//! it is not, restoring liveness after a panic or cold start. There is
//! exactly one scheduler per process and it is the only entity that spawns
//! tick loops.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::engine::TickDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    /// A tick loop was already pending; nothing was spawned.
    AlreadyRunning,
    /// A fresh tick loop was spawned.
    Started,
}

pub struct Scheduler {
    driver: Arc<TickDriver>,
    tick_period: Duration,
    heartbeat_period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        driver: Arc<TickDriver>,
        tick_period: Duration,
        heartbeat_period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            tick_period,
            heartbeat_period,
            task: Mutex::new(None),
        })
    }

    /// Starts the tick loop if none is pending. Idempotent: with a live loop
    /// this only reports status.
    pub fn ensure_tick_loop(self: &Arc<Self>) -> ScheduleStatus {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return ScheduleStatus::AlreadyRunning;
            }
        }
        let scheduler = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            scheduler.tick_loop().await;
        }));
        ScheduleStatus::Started
    }

    /// Aborts the pending tick loop, if any.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Spawns the fallback heartbeat that keeps the tick loop alive.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.heartbeat_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if scheduler.ensure_tick_loop() == ScheduleStatus::Started {
                    warn!("tick loop was not running; heartbeat restarted it");
                }
            }
        })
    }

    async fn tick_loop(&self) {
        loop {
            match self.driver.run_once().await {
                Ok(tick) => debug!(tick, "scheduled tick complete"),
                Err(e) => error!("scheduled tick failed: {e}"),
            }
            // Sleep happens unconditionally: the next invocation is
            // scheduled even when this one failed.
            tokio::time::sleep(self.tick_period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TickEngine;
    use crate::events::EventBus;
    use crate::feed::{PriceFeedError, Quote, QuoteSource};
    use crate::store::{MemoryStore, Store};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NoQuotes;

    #[async_trait]
    impl QuoteSource for NoQuotes {
        async fn fetch_quotes(
            &self,
            _symbols: &[String],
        ) -> Result<HashMap<String, Quote>, PriceFeedError> {
            Ok(HashMap::new())
        }
    }

    fn scheduler_with(period_ms: u64) -> (Arc<Scheduler>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(16);
        let engine = Arc::new(TickEngine::new(store.clone(), events.clone()));
        let driver = Arc::new(TickDriver::new(
            store.clone(),
            Arc::new(NoQuotes),
            engine,
            events,
            vec![],
        ));
        (
            Scheduler::new(
                driver,
                Duration::from_millis(period_ms),
                Duration::from_secs(60),
            ),
            store,
        )
    }

    #[tokio::test]
    async fn ensure_tick_loop_is_idempotent() {
        let (scheduler, _) = scheduler_with(10_000);
        assert_eq!(scheduler.ensure_tick_loop(), ScheduleStatus::Started);
        assert_eq!(scheduler.ensure_tick_loop(), ScheduleStatus::AlreadyRunning);
        scheduler.stop();
    }

    #[tokio::test]
    async fn stopped_loop_can_be_restarted() {
        let (scheduler, _) = scheduler_with(10_000);
        assert_eq!(scheduler.ensure_tick_loop(), ScheduleStatus::Started);
        scheduler.stop();
        // The heartbeat path observes the dead task and respawns.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.ensure_tick_loop(), ScheduleStatus::Started);
        scheduler.stop();
    }

    #[tokio::test]
    async fn tick_loop_advances_the_global_tick() {
        let (scheduler, store) = scheduler_with(5);
        scheduler.ensure_tick_loop();
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.stop();
        let state = store.game_state().await.unwrap();
        assert!(state.current_tick >= 1);
    }
}
