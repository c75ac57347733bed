pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod store;
pub mod ws;

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::TickDriver;
use crate::events::EventBus;
use crate::store::Store;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub driver: Arc<TickDriver>,
    pub events: EventBus,
    pub metrics_handle: PrometheusHandle,
}
