//! Binance public API client — the live price source (no authentication)

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::Candle;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_CANDLES_PER_REQUEST: u32 = 1000;

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline from the API (fixed-position array)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    String, // quote volume
    u64,    // trades
    String, // taker buy base
    String, // taker buy quote
    String, // ignore
);

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Client against a non-default host (stub servers in tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Fetch the most recent candles for a symbol.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> EngineResult<Vec<Candle>> {
        let limit = limit.min(MAX_CANDLES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        debug!(symbol, interval, limit, "fetching candles");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExternalData(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalData(format!(
                "price API error {status}: {body}"
            )));
        }

        let raw: Vec<RawKline> = response
            .json()
            .await
            .map_err(|e| EngineError::ExternalData(e.to_string()))?;

        let candles: Vec<Candle> = raw
            .into_iter()
            .filter_map(|k| {
                Some(Candle {
                    time: k.0,
                    open: Decimal::from_str(&k.1).ok()?,
                    high: Decimal::from_str(&k.2).ok()?,
                    low: Decimal::from_str(&k.3).ok()?,
                    close: Decimal::from_str(&k.4).ok()?,
                    volume: Decimal::from_str(&k.5).ok()?,
                })
            })
            .collect();

        debug!(count = candles.len(), "candles fetched");
        Ok(candles)
    }

    /// Current spot price for a symbol.
    pub async fn get_price(&self, symbol: &str) -> EngineResult<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExternalData(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::ExternalData(format!(
                "price API error {}",
                response.status()
            )));
        }

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| EngineError::ExternalData(e.to_string()))?;

        Decimal::from_str(&ticker.price)
            .map_err(|e| EngineError::ExternalData(format!("bad price payload: {e}")))
    }
}
