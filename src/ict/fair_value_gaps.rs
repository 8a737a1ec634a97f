/// Fair value gap (three-candle imbalance) detection
///
/// Bullish FVG: candle[i-1].high < candle[i+1].low, gap = [c0.high, c2.low]
/// Bearish FVG: candle[i-1].low > candle[i+1].high, gap = [c2.high, c0.low]
///
/// A gap counts as mitigated once later price fills it completely.

use super::swings::tail;
use crate::models::{Candle, StructureZone, ZoneKind};

pub struct FairValueGapDetector {
    lookback: usize,
    /// Smallest gap kept, as a percentage of price
    min_gap_pct: f64,
}

impl Default for FairValueGapDetector {
    fn default() -> Self {
        Self {
            lookback: 100,
            min_gap_pct: 0.01,
        }
    }
}

impl FairValueGapDetector {
    pub fn new(lookback: usize, min_gap_pct: f64) -> Self {
        Self {
            lookback,
            min_gap_pct,
        }
    }

    pub fn detect(&self, candles: &[Candle]) -> Vec<StructureZone> {
        let candles = tail(candles, self.lookback);
        let mut zones = Vec::new();

        for i in 1..candles.len().saturating_sub(1) {
            let first = &candles[i - 1];
            let third = &candles[i + 1];

            let (kind, high, low) = if first.high < third.low {
                (ZoneKind::BullishFairValueGap, third.low, first.high)
            } else if first.low > third.high {
                (ZoneKind::BearishFairValueGap, first.low, third.high)
            } else {
                continue;
            };

            let reference = candles[i].close.abs().max(f64::EPSILON);
            if (high - low) / reference * 100.0 < self.min_gap_pct {
                continue;
            }

            let mut zone = StructureZone::new(kind, high, low, third.time);

            let fill = candles[i + 2..].iter().find(|c| match kind {
                ZoneKind::BullishFairValueGap => c.low <= zone.price_low,
                _ => c.high >= zone.price_high,
            });
            if let Some(c) = fill {
                zone.mitigate(c.time);
            }

            zones.push(zone);
        }

        zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ict::test_support::candle;

    #[test]
    fn test_bullish_gap() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 105.0, 100.4, 104.8),
            candle(2, 104.8, 106.0, 102.0, 105.5), // low 102 > 101
        ];

        let zones = FairValueGapDetector::default().detect(&candles);

        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].kind, ZoneKind::BullishFairValueGap);
        assert_eq!(zones[0].price_low, 101.0);
        assert_eq!(zones[0].price_high, 102.0);
        assert_eq!(zones[0].formed_at, candles[2].time);
        assert!(!zones[0].mitigated);
    }

    #[test]
    fn test_bearish_gap_filled() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 99.5),
            candle(1, 99.5, 99.6, 95.0, 95.2),
            candle(2, 95.2, 97.0, 94.0, 94.5), // high 97 < 99
            candle(3, 94.5, 98.0, 94.0, 97.8), // partial fill
            candle(4, 97.8, 99.5, 97.0, 99.2), // full fill to 99
        ];

        let zones = FairValueGapDetector::default().detect(&candles);
        let gap = zones
            .iter()
            .find(|z| z.kind == ZoneKind::BearishFairValueGap && z.price_high == 99.0)
            .expect("bearish gap");

        assert_eq!(gap.price_low, 97.0);
        assert!(gap.mitigated);
        assert_eq!(gap.mitigated_at, Some(candles[4].time));
    }

    #[test]
    fn test_overlapping_candles_have_no_gap() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 102.0, 100.0, 101.5),
            candle(2, 101.5, 102.5, 100.8, 102.0),
        ];

        assert!(FairValueGapDetector::default().detect(&candles).is_empty());
    }

    #[test]
    fn test_tiny_gaps_filtered() {
        let candles = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 102.0, 100.4, 101.9),
            candle(2, 101.9, 102.5, 101.001, 102.0),
        ];

        let detector = FairValueGapDetector::new(100, 0.01);
        assert!(detector.detect(&candles).is_empty());
    }
}
