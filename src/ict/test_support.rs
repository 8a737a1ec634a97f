//! Candle fixtures shared by the detector tests

use crate::models::Candle;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

pub fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        time: start_time() + Duration::minutes(15 * i as i64),
        open,
        high,
        low,
        close,
        volume: 1000.0,
    }
}

/// Doji candles from (high, low) pairs, closing at the midpoint
pub fn candles_from_hl(hl: &[(f64, f64)]) -> Vec<Candle> {
    hl.iter()
        .enumerate()
        .map(|(i, &(high, low))| {
            let mid = (high + low) / 2.0;
            candle(i, mid, high, low, mid)
        })
        .collect()
}

pub fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
    (0..n).map(|i| candle(i, price, price, price, price)).collect()
}

/// Rising zig-zag with a peak every 6 candles
pub fn uptrend(n: usize) -> Vec<Candle> {
    const WAVE: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 2.0, 1.0];
    (0..n)
        .map(|i| {
            let mid = 100.0 + 0.5 * i as f64 + WAVE[i % 6] * 1.5;
            candle(i, mid - 0.5, mid + 1.0, mid - 1.0, mid + 0.5)
        })
        .collect()
}
