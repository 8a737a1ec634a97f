/// Average True Range (ATR)
///
/// Wilder-smoothed average of true ranges. Used to size stop buffers beyond
/// structure levels and as the fallback stop distance when no level exists.

use crate::models::Candle;

/// True range of each candle after the first
fn true_ranges(candles: &[Candle]) -> impl Iterator<Item = f64> + '_ {
    candles.windows(2).map(|w| {
        let (prev, curr) = (&w[0], &w[1]);
        (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs())
    })
}

/// Current ATR, or None with fewer than `period + 1` candles
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut ranges = true_ranges(candles);

    // Seed with a simple average, then Wilder's smoothing
    let seed: f64 = ranges.by_ref().take(period).sum::<f64>() / period as f64;
    let atr = ranges.fold(seed, |atr, tr| (atr * (period as f64 - 1.0) + tr) / period as f64);

    Some(atr)
}
