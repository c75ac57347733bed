//! Market price vendor client.
//!
//! Fetches the latest quote per tracked symbol from the external vendor.
//! Canonical symbols (BTC, ETH, ...) are translated to vendor symbols
//! through a fixed mapping table; storage only ever sees canonical symbols.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PriceFeedError {
    #[error("price vendor unavailable: {0}")]
    Unavailable(String),
}

/// Latest observed price for a canonical symbol.
#[derive(Debug, Clone)]
pub struct Quote {
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// Vendor wire format: current price and unix timestamp.
#[derive(Debug, Deserialize)]
struct VendorQuote {
    c: f64,
    t: i64,
}

/// Source of quotes for the tick driver. Fronts [`PriceFeedClient`] so the
/// driver can be exercised with a stub.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, PriceFeedError>;
}

/// Canonical symbol -> vendor symbol. The only place where storage identity
/// and vendor identity differ.
const SYMBOL_MAP: &[(&str, &str)] = &[
    ("BTC", "BINANCE:BTCUSDT"),
    ("ETH", "BINANCE:ETHUSDT"),
    ("SOL", "BINANCE:SOLUSDT"),
    ("DOGE", "BINANCE:DOGEUSDT"),
    ("XRP", "BINANCE:XRPUSDT"),
    ("ADA", "BINANCE:ADAUSDT"),
];

pub fn vendor_symbol(canonical: &str) -> Option<&'static str> {
    SYMBOL_MAP
        .iter()
        .find(|(c, _)| *c == canonical)
        .map(|(_, v)| *v)
}

pub struct PriceFeedClient {
    http: reqwest::Client,
    base_url: String,
    credential: String,
}

impl PriceFeedClient {
    pub fn new(base_url: &str, credential: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential: credential.to_string(),
        }
    }
}

#[async_trait]
impl QuoteSource for PriceFeedClient {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>, PriceFeedError> {
        let mut quotes = HashMap::new();

        for symbol in symbols {
            let Some(vendor) = vendor_symbol(symbol) else {
                warn!(symbol, "no vendor mapping for symbol, skipping");
                continue;
            };

            let url = format!("{}/quote", self.base_url);
            let response = self
                .http
                .get(&url)
                .query(&[("symbol", vendor), ("token", self.credential.as_str())])
                .send()
                .await
                .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

            if !response.status().is_success() {
                return Err(PriceFeedError::Unavailable(format!(
                    "vendor returned {} for {}",
                    response.status(),
                    vendor
                )));
            }

            let body: VendorQuote = response
                .json()
                .await
                .map_err(|e| PriceFeedError::Unavailable(e.to_string()))?;

            // A quote that cannot be represented as a positive decimal is
            // treated as missing for this tick, not as a feed outage.
            let Some(price) = Decimal::from_f64(body.c).filter(|p| *p > Decimal::ZERO) else {
                warn!(symbol, raw = body.c, "unusable vendor price, skipping symbol");
                continue;
            };

            let at = DateTime::from_timestamp(body.t, 0).unwrap_or_else(Utc::now);
            quotes.insert(symbol.clone(), Quote { price, at });
        }

        Ok(quotes)
    }
}
