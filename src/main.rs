use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alpha_royale_backend::api::handlers;
use alpha_royale_backend::api::routes;
use alpha_royale_backend::config::AppConfig;
use alpha_royale_backend::db::Database;
use alpha_royale_backend::engine::{Scheduler, TickDriver, TickEngine};
use alpha_royale_backend::events::EventBus;
use alpha_royale_backend::feed::PriceFeedClient;
use alpha_royale_backend::metrics::init_metrics;
use alpha_royale_backend::store::PgStore;
use alpha_royale_backend::ws;
use alpha_royale_backend::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alpha_royale_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting Alpha Royale backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Tracked symbols: {:?}", config.tracked_symbols);

    // Metrics recorder
    let metrics_handle = init_metrics();

    // Database
    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connected, migrations applied");

    let store: Arc<dyn alpha_royale_backend::store::Store> = Arc::new(PgStore::new(db.pool.clone()));

    // Event bus for realtime change notifications
    let events = EventBus::new(1024);

    // Match engine + global tick driver
    let engine = Arc::new(TickEngine::new(store.clone(), events.clone()));
    let feed = Arc::new(PriceFeedClient::new(
        &config.price_vendor_url,
        &config.price_vendor_credential,
    ));
    let driver = Arc::new(TickDriver::new(
        store.clone(),
        feed,
        engine,
        events.clone(),
        config.tracked_symbols.clone(),
    ));
    tracing::info!("Tick driver initialized");

    // Scheduler: self-rescheduling tick loop plus the heartbeat fallback
    let scheduler = Scheduler::new(
        driver.clone(),
        config.tick_period(),
        config.heartbeat_period(),
    );
    scheduler.ensure_tick_loop();
    scheduler.spawn_heartbeat();
    tracing::info!(
        "Scheduler started (tick every {:?}, heartbeat every {:?})",
        config.tick_period(),
        config.heartbeat_period()
    );

    // Build application state
    let port = config.port;
    let state = Arc::new(AppState {
        config,
        store,
        driver,
        events,
        metrics_handle,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(handlers::admin::health))
        .route("/metrics", get(handlers::admin::metrics))
        .route("/admin/tick", post(handlers::admin::trigger_tick))
        .nest("/api/v1", routes::create_router())
        .nest("/ws", ws::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
