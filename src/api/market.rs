//! Market snapshot provider backed by the Binance public ticker API.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use super::types::TickerResponse;

const MARKET_API_BASE: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Snapshot fetch failure; always recoverable (the symbol is skipped for the
/// cycle and retried on the next one).
#[derive(Debug, Error)]
#[error("market data unavailable for {symbol}: {reason}")]
pub struct MarketUnavailable {
    pub symbol: String,
    pub reason: String,
}

/// Current market state for one symbol.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub change_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Read-only client for current prices (no authentication required).
pub struct MarketClient {
    client: Client,
    base_url: String,
}

impl MarketClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: MARKET_API_BASE.to_string(),
        })
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch the 24h ticker for one symbol. Symbols are quoted in USDT on
    /// the feed ("BTC" -> "BTCUSDT").
    pub async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketUnavailable> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}USDT",
            self.base_url, symbol
        );
        debug!(url = %url, "fetching market snapshot");

        let unavailable = |reason: String| MarketUnavailable {
            symbol: symbol.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("{status} - {body}")));
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("bad ticker body: {e}")))?;

        let parse = |field: &str, value: &str| {
            value
                .parse::<Decimal>()
                .map_err(|e| unavailable(format!("bad {field}: {e}")))
        };

        let price = parse("lastPrice", &ticker.last_price)?;
        if price <= Decimal::ZERO {
            return Err(unavailable(format!("non-positive price: {price}")));
        }

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            change_24h: parse("priceChangePercent", &ticker.price_change_percent)?,
            high_24h: parse("highPrice", &ticker.high_price)?,
            low_24h: parse("lowPrice", &ticker.low_price)?,
            volume_24h: parse("volume", &ticker.volume)?,
            timestamp: Utc::now(),
        })
    }
}
