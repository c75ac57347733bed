use config::{Config, ConfigError, Environment};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Runtime configuration, layered from environment variables over defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub price_vendor_url: String,
    pub price_vendor_credential: String,
    /// Canonical symbols the driver ingests each tick, comma-separated in
    /// the environment.
    pub tracked_symbols: Vec<String>,
    pub tick_period_ms: u64,
    pub heartbeat_period_ms: u64,
    pub default_initial_balance: Decimal,
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("port", 8080)?
            .set_default("database_url", "postgres://localhost/alpha_royale")?
            .set_default("database_max_connections", 10)?
            .set_default("price_vendor_url", "https://finnhub.io/api/v1")?
            .set_default("price_vendor_credential", "")?
            .set_default("tracked_symbols", vec!["BTC", "ETH", "SOL", "DOGE"])?
            .set_default("tick_period_ms", 10_000)?
            .set_default("heartbeat_period_ms", 60_000)?
            .set_default("default_initial_balance", "10000")?
            .set_default("min_duration_minutes", 1)?
            .set_default("max_duration_minutes", 1440)?
            .add_source(
                Environment::default()
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("tracked_symbols"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn duration_valid(&self, minutes: i32) -> bool {
        (self.min_duration_minutes..=self.max_duration_minutes).contains(&minutes)
    }

    pub fn symbol_tracked(&self, symbol: &str) -> bool {
        self.tracked_symbols.iter().any(|s| s == symbol)
    }
}
