/// Market structure analysis
///
/// Tracks swing highs/lows and the breaks of them:
/// - Break of structure (BOS): close through the last swing in the trend direction
/// - Change of character (CHoCH): close through the last swing against the trend
///
/// With no break in the window, falls back to higher-highs/higher-lows counting.

use super::swings::{find_swings, tail, SwingKind, SwingPoint};
use crate::models::{Bias, Candle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakKind {
    BreakOfStructure,
    ChangeOfCharacter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub kind: BreakKind,
    pub direction: Bias,
    pub level: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStructure {
    pub trend: Bias,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
    pub last_break: Option<StructureBreak>,
}

impl MarketStructure {
    pub fn ranging() -> Self {
        Self {
            trend: Bias::Neutral,
            last_swing_high: None,
            last_swing_low: None,
            last_break: None,
        }
    }

    /// Level whose break would flip the current trend
    pub fn trend_change_level(&self) -> Option<f64> {
        match self.trend {
            Bias::Bullish => self.last_swing_low,
            Bias::Bearish => self.last_swing_high,
            Bias::Neutral => None,
        }
    }
}

pub struct StructureAnalyzer {
    lookback: usize,
    swing_strength: usize,
}

impl Default for StructureAnalyzer {
    fn default() -> Self {
        Self {
            lookback: 100,
            swing_strength: 2,
        }
    }
}

impl StructureAnalyzer {
    pub fn new(lookback: usize, swing_strength: usize) -> Self {
        Self {
            lookback,
            swing_strength,
        }
    }

    pub fn analyze(&self, candles: &[Candle]) -> MarketStructure {
        let candles = tail(candles, self.lookback);
        let swings = find_swings(candles, self.swing_strength);

        if swings.is_empty() {
            return MarketStructure::ranging();
        }

        let mut trend = Bias::Neutral;
        let mut last_break = None;
        let mut active_high: Option<SwingPoint> = None;
        let mut active_low: Option<SwingPoint> = None;
        let mut next_swing = 0;

        for (i, candle) in candles.iter().enumerate() {
            // Swings become usable once their right-hand side has printed
            while next_swing < swings.len()
                && swings[next_swing].confirmed_at(self.swing_strength) < i
            {
                let swing = swings[next_swing];
                match swing.kind {
                    SwingKind::High => active_high = Some(swing),
                    SwingKind::Low => active_low = Some(swing),
                }
                next_swing += 1;
            }

            if let Some(high) = active_high {
                if candle.close > high.price {
                    let kind = if trend == Bias::Bearish {
                        BreakKind::ChangeOfCharacter
                    } else {
                        BreakKind::BreakOfStructure
                    };
                    trend = Bias::Bullish;
                    last_break = Some(StructureBreak {
                        kind,
                        direction: Bias::Bullish,
                        level: high.price,
                        at: candle.time,
                    });
                    active_high = None;
                }
            }

            if let Some(low) = active_low {
                if candle.close < low.price {
                    let kind = if trend == Bias::Bullish {
                        BreakKind::ChangeOfCharacter
                    } else {
                        BreakKind::BreakOfStructure
                    };
                    trend = Bias::Bearish;
                    last_break = Some(StructureBreak {
                        kind,
                        direction: Bias::Bearish,
                        level: low.price,
                        at: candle.time,
                    });
                    active_low = None;
                }
            }
        }

        if last_break.is_none() {
            trend = swing_sequence_trend(&swings);
        }

        let last_swing_high = swings
            .iter()
            .rev()
            .find(|s| s.kind == SwingKind::High)
            .map(|s| s.price);
        let last_swing_low = swings
            .iter()
            .rev()
            .find(|s| s.kind == SwingKind::Low)
            .map(|s| s.price);

        tracing::debug!(
            trend = ?trend,
            swings = swings.len(),
            "Structure: last high {:?}, last low {:?}",
            last_swing_high,
            last_swing_low
        );

        MarketStructure {
            trend,
            last_swing_high,
            last_swing_low,
            last_break,
        }
    }
}

/// Trend from the last two swing highs and lows
fn swing_sequence_trend(swings: &[SwingPoint]) -> Bias {
    let highs: Vec<f64> = swings
        .iter()
        .filter(|s| s.kind == SwingKind::High)
        .map(|s| s.price)
        .collect();
    let lows: Vec<f64> = swings
        .iter()
        .filter(|s| s.kind == SwingKind::Low)
        .map(|s| s.price)
        .collect();

    if highs.len() < 2 || lows.len() < 2 {
        return Bias::Neutral;
    }

    let higher_high = highs[highs.len() - 1] > highs[highs.len() - 2];
    let higher_low = lows[lows.len() - 1] > lows[lows.len() - 2];

    match (higher_high, higher_low) {
        (true, true) => Bias::Bullish,
        (false, false) => Bias::Bearish,
        _ => Bias::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ict::test_support::{candles_from_hl, flat_candles, uptrend};

    #[test]
    fn test_flat_market_is_ranging() {
        let candles = flat_candles(30, 100.0);
        let structure = StructureAnalyzer::default().analyze(&candles);

        assert_eq!(structure.trend, Bias::Neutral);
        assert!(structure.last_break.is_none());
        assert!(structure.trend_change_level().is_none());
    }

    #[test]
    fn test_uptrend_breaks_structure_bullish() {
        let candles = uptrend(40);
        let structure = StructureAnalyzer::default().analyze(&candles);

        assert_eq!(structure.trend, Bias::Bullish);
        let brk = structure.last_break.clone().expect("expected a break");
        assert_eq!(brk.direction, Bias::Bullish);
        assert_eq!(brk.kind, BreakKind::BreakOfStructure);
        assert_eq!(structure.trend_change_level(), structure.last_swing_low);
    }

    #[test]
    fn test_change_of_character() {
        // Rally with a swing low at 98, then a collapse through it
        let candles = candles_from_hl(&[
            (100.0, 99.0),
            (101.0, 99.5),
            (103.0, 100.0),
            (102.0, 98.0), // swing low
            (104.0, 100.5),
            (106.0, 102.0),
            (108.0, 104.0), // breaks swing high at 103 -> bullish BOS
            (107.0, 103.0),
            (105.0, 100.0),
            (100.0, 95.0), // closes below 98 -> bearish CHoCH
            (99.0, 95.0),
        ]);

        let structure = StructureAnalyzer::new(100, 1).analyze(&candles);
        let brk = structure.last_break.unwrap();

        assert_eq!(structure.trend, Bias::Bearish);
        assert_eq!(brk.kind, BreakKind::ChangeOfCharacter);
        assert_eq!(brk.level, 98.0);
    }
}
