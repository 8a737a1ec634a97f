/// Order block detection
///
/// A bullish order block is the last down-close candle before a displacement
/// candle that closes above its high; bearish mirrored. The zone spans the
/// order-block candle's full range and is mitigated the first time price
/// trades back into it after the displacement.

use super::swings::tail;
use crate::models::{Candle, StructureZone, ZoneKind};

pub struct OrderBlockDetector {
    lookback: usize,
    /// Minimum body/range ratio of the displacement candle
    displacement_ratio: f64,
}

impl Default for OrderBlockDetector {
    fn default() -> Self {
        Self {
            lookback: 100,
            displacement_ratio: 0.6,
        }
    }
}

impl OrderBlockDetector {
    pub fn new(lookback: usize, displacement_ratio: f64) -> Self {
        Self {
            lookback,
            displacement_ratio,
        }
    }

    pub fn detect(&self, candles: &[Candle]) -> Vec<StructureZone> {
        let candles = tail(candles, self.lookback);
        let mut zones = Vec::new();

        if candles.len() < 2 {
            return zones;
        }

        for i in 0..candles.len() - 1 {
            let base = &candles[i];
            let next = &candles[i + 1];

            let kind = if base.is_bearish() && next.is_bullish() && next.close > base.high {
                ZoneKind::BullishOrderBlock
            } else if base.is_bullish() && next.is_bearish() && next.close < base.low {
                ZoneKind::BearishOrderBlock
            } else {
                continue;
            };

            if !self.is_displacement(next) {
                continue;
            }

            let mut zone = StructureZone::new(kind, base.high, base.low, base.time);

            let revisit = candles[i + 2..].iter().find(|c| match kind {
                ZoneKind::BullishOrderBlock => c.low <= zone.price_high,
                _ => c.high >= zone.price_low,
            });
            if let Some(c) = revisit {
                zone.mitigate(c.time);
            }

            zones.push(zone);
        }

        zones
    }

    fn is_displacement(&self, candle: &Candle) -> bool {
        let range = candle.range();
        range > 0.0 && candle.body() / range >= self.displacement_ratio
    }
}
