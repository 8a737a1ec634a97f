/// Liquidity pool detection
///
/// Swing highs hold buy-side liquidity (stops above), swing lows hold sell-side
/// liquidity. Swings at nearly the same price (equal highs/lows) are merged into
/// a single, wider pool. A pool is swept once price trades beyond it.

use super::swings::{find_swings, tail, SwingKind};
use crate::models::{Candle, StructureZone, ZoneKind};

pub struct LiquidityDetector {
    lookback: usize,
    swing_strength: usize,
    /// Max distance between two swings to count as equal, as a percentage of price
    equal_level_tolerance_pct: f64,
}

impl Default for LiquidityDetector {
    fn default() -> Self {
        Self {
            lookback: 100,
            swing_strength: 2,
            equal_level_tolerance_pct: 0.05,
        }
    }
}

impl LiquidityDetector {
    pub fn new(lookback: usize, swing_strength: usize, equal_level_tolerance_pct: f64) -> Self {
        Self {
            lookback,
            swing_strength,
            equal_level_tolerance_pct,
        }
    }

    pub fn detect(&self, candles: &[Candle]) -> Vec<StructureZone> {
        let candles = tail(candles, self.lookback);
        let swings = find_swings(candles, self.swing_strength);

        // (zone, candle index the zone was last extended at)
        let mut pools: Vec<(StructureZone, usize)> = Vec::new();

        for swing in &swings {
            let kind = match swing.kind {
                SwingKind::High => ZoneKind::BuySideLiquidity,
                SwingKind::Low => ZoneKind::SellSideLiquidity,
            };
            let tolerance = swing.price.abs() * self.equal_level_tolerance_pct / 100.0;

            // Equal highs/lows: join a pool that is still unswept at this swing
            let existing = pools.iter_mut().rev().find(|(pool, last_index)| {
                pool.kind == kind
                    && !swept_between(candles, pool, *last_index + 1, swing.index)
                    && (swing.price >= pool.price_low - tolerance)
                    && (swing.price <= pool.price_high + tolerance)
            });

            match existing {
                Some((pool, last_index)) => {
                    let high = pool.price_high.max(swing.price);
                    let low = pool.price_low.min(swing.price);
                    *pool = StructureZone::new(kind, high, low, candles[swing.index].time);
                    *last_index = swing.index;
                }
                None => {
                    let pool =
                        StructureZone::new(kind, swing.price, swing.price, candles[swing.index].time);
                    pools.push((pool, swing.index));
                }
            }
        }

        let mut zones: Vec<StructureZone> = pools
            .into_iter()
            .map(|(mut pool, last_index)| {
                let sweep = candles[last_index + 1..]
                    .iter()
                    .find(|c| is_sweep(&pool, c));
                if let Some(c) = sweep {
                    pool.mitigate(c.time);
                }
                pool
            })
            .collect();

        zones.sort_by_key(|z| z.formed_at);
        zones
    }
}

fn is_sweep(pool: &StructureZone, candle: &Candle) -> bool {
    match pool.kind {
        ZoneKind::BuySideLiquidity => candle.high > pool.price_high,
        _ => candle.low < pool.price_low,
    }
}

/// Whether any candle in [from, to) swept the pool
fn swept_between(candles: &[Candle], pool: &StructureZone, from: usize, to: usize) -> bool {
    from < to && candles[from..to].iter().any(|c| is_sweep(pool, c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ict::test_support::candles_from_hl;

    #[test]
    fn test_swing_high_is_buy_side_pool() {
        let candles = candles_from_hl(&[
            (100.0, 99.0),
            (101.0, 99.5),
            (103.0, 100.0),
            (101.5, 99.8),
            (101.0, 99.6),
        ]);

        let zones = LiquidityDetector::default().detect(&candles);
        let pool = zones
            .iter()
            .find(|z| z.kind == ZoneKind::BuySideLiquidity)
            .unwrap();

        assert_eq!(pool.price_high, 103.0);
        assert_eq!(pool.price_low, 103.0);
        assert_eq!(pool.formed_at, candles[2].time);
        assert!(!pool.mitigated);
    }

    #[test]
    fn test_equal_highs_merge_then_sweep() {
        let candles = candles_from_hl(&[
            (100.0, 99.0),
            (101.0, 99.5),
            (103.00, 100.0), // swing high
            (101.5, 99.8),
            (101.0, 99.2),
            (102.0, 99.7),
            (103.02, 100.1), // equal high
            (102.0, 99.9),
            (101.0, 99.5),
            (104.0, 100.5), // sweep
        ]);

        let zones = LiquidityDetector::default().detect(&candles);
        let pools: Vec<_> = zones
            .iter()
            .filter(|z| z.kind == ZoneKind::BuySideLiquidity)
            .collect();

        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].price_low, 103.0);
        assert_eq!(pools[0].price_high, 103.02);
        assert_eq!(pools[0].formed_at, candles[6].time);
        assert!(pools[0].mitigated);
        assert_eq!(pools[0].mitigated_at, Some(candles[9].time));
    }

    #[test]
    fn test_sell_side_sweep() {
        let candles = candles_from_hl(&[
            (101.0, 100.0),
            (100.5, 99.0),
            (100.0, 97.0), // swing low
            (100.5, 98.0),
            (101.0, 98.5),
            (100.0, 96.5), // sweeps 97
        ]);

        let zones = LiquidityDetector::default().detect(&candles);
        let pool = zones
            .iter()
            .find(|z| z.kind == ZoneKind::SellSideLiquidity)
            .unwrap();

        assert_eq!(pool.price_low, 97.0);
        assert!(pool.mitigated);
        assert_eq!(pool.mitigated_at, Some(candles[5].time));
    }
}
