use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingKind {
    High,
    Low,
}

/// A fractal swing point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    pub index: usize,
    pub kind: SwingKind,
    pub price: f64,
}

impl SwingPoint {
    /// Index of the first candle at which the swing is known
    pub fn confirmed_at(&self, strength: usize) -> usize {
        self.index + strength
    }
}

/// Find swing highs/lows: a high strictly above the `strength` highs on each
/// side (lows mirrored). Returned in candle order.
pub fn find_swings(candles: &[Candle], strength: usize) -> Vec<SwingPoint> {
    let strength = strength.max(1);
    let mut swings = Vec::new();

    if candles.len() < 2 * strength + 1 {
        return swings;
    }

    for i in strength..candles.len() - strength {
        let neighbours = (i - strength..i).chain(i + 1..=i + strength);

        let mut is_high = true;
        let mut is_low = true;
        for j in neighbours {
            if candles[j].high >= candles[i].high {
                is_high = false;
            }
            if candles[j].low <= candles[i].low {
                is_low = false;
            }
        }

        if is_high {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::High,
                price: candles[i].high,
            });
        }
        if is_low {
            swings.push(SwingPoint {
                index: i,
                kind: SwingKind::Low,
                price: candles[i].low,
            });
        }
    }

    swings
}

/// Most recent `lookback` candles
pub fn tail(candles: &[Candle], lookback: usize) -> &[Candle] {
    if lookback == 0 || lookback >= candles.len() {
        candles
    } else {
        &candles[candles.len() - lookback..]
    }
}
