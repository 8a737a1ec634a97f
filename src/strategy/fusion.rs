/// Signal fusion
///
/// Each factor casts a weighted vote for a direction:
/// - Structure trend (BOS/CHoCH)
/// - Nearest unmitigated order block / fair value gap
/// - Session bias from the Asian range
/// - External sentiment
///
/// The larger side wins. Confidence is the winning margin plus a bonus for
/// every extra agreeing factor, clamped to [0, 100].

use crate::config::FusionSettings;
use crate::ict::MarketStructure;
use crate::models::{
    Bias, SignalStrength, SignalType, StructureSnapshot, StructureZone, TradingSignal, ZoneKind,
};
use crate::session::KillZone;
use chrono::Utc;
use uuid::Uuid;

/// Everything one fusion pass looks at
#[derive(Debug, Clone)]
pub struct FusionInput<'a> {
    pub symbol: &'a str,
    pub timeframe: &'a str,
    /// Quote mid, or last close when no quote is available
    pub price: f64,
    pub session: Option<&'a KillZone>,
    pub session_bias: Bias,
    pub structure: &'a MarketStructure,
    pub zones: &'a [StructureZone],
    pub sentiment: Option<Bias>,
    pub atr: Option<f64>,
}

#[derive(Debug, Clone)]
struct Vote {
    factor: &'static str,
    bias: Bias,
    weight: f64,
    detail: String,
}

pub struct SignalFusionEngine {
    settings: FusionSettings,
}

impl Default for SignalFusionEngine {
    fn default() -> Self {
        Self::new(FusionSettings::default())
    }
}

impl SignalFusionEngine {
    pub fn new(settings: FusionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    pub fn fuse(&self, input: &FusionInput<'_>) -> TradingSignal {
        let entry = input.price;
        let (votes, zone_used) = self.collect_votes(input);

        let bull: f64 = weight_for(&votes, Bias::Bullish);
        let bear: f64 = weight_for(&votes, Bias::Bearish);

        let (signal_type, confidence) = if bull == bear {
            (SignalType::Hold, 0.0)
        } else {
            let (direction, agree, oppose) = if bull > bear {
                (Bias::Bullish, bull, bear)
            } else {
                (Bias::Bearish, bear, bull)
            };
            let n_agree = votes
                .iter()
                .filter(|v| v.bias == direction && v.weight > 0.0)
                .count();
            let bonus = self.settings.confluence_bonus * n_agree.saturating_sub(1) as f64;
            let confidence = (agree - oppose + bonus).clamp(0.0, 100.0);

            if confidence < self.settings.min_confidence {
                (SignalType::Hold, confidence)
            } else if direction == Bias::Bullish {
                (SignalType::Buy, confidence)
            } else {
                (SignalType::Sell, confidence)
            }
        };

        let mut zones_used: Vec<String> = zone_used.iter().map(|z| z.id.clone()).collect();

        let (stop_loss, take_profit) = match signal_type {
            SignalType::Hold => (entry, entry),
            _ => {
                let (stop, stop_zone) = self.stop_for(signal_type, input);
                let (target, target_zone) = self.target_for(signal_type, input, stop);
                zones_used.extend(stop_zone.into_iter().chain(target_zone));
                (stop, target)
            }
        };
        zones_used.dedup();

        let snapshot = StructureSnapshot {
            session: input.session.map(|z| z.name.to_string()),
            session_bias: Some(input.session_bias),
            trend: Some(input.structure.trend),
            zone_bias: zone_used.map(|z| z.kind.bias()),
            sentiment_bias: input.sentiment,
            zones_used,
        };

        TradingSignal {
            id: Uuid::new_v4(),
            symbol: input.symbol.to_string(),
            timeframe: input.timeframe.to_string(),
            signal_type,
            strength: strength_for(confidence),
            entry_price: entry,
            stop_loss,
            take_profit,
            confidence,
            structure_snapshot: snapshot,
            narrative: narrative(signal_type, confidence, bull, bear, &votes),
            created_at: Utc::now(),
            executed: false,
            linked_trade_id: None,
        }
    }

    fn collect_votes<'z>(&self, input: &FusionInput<'z>) -> (Vec<Vote>, Option<&'z StructureZone>) {
        let s = &self.settings;
        let mut votes = Vec::with_capacity(4);

        let trend_detail = match &input.structure.last_break {
            Some(b) => format!("{:?} at {:.2}", b.kind, b.level),
            None => "swing sequence".to_string(),
        };
        votes.push(Vote {
            factor: "structure",
            bias: input.structure.trend,
            weight: s.structure_weight,
            detail: trend_detail,
        });

        let nearest = nearest_reaction_zone(input.zones, input.price);
        votes.push(Vote {
            factor: "zone",
            bias: nearest.map(|z| z.kind.bias()).unwrap_or(Bias::Neutral),
            weight: s.zone_weight,
            detail: match nearest {
                Some(z) => format!(
                    "{:?} {:.2}-{:.2} ({:.2} away)",
                    z.kind,
                    z.price_low,
                    z.price_high,
                    z.distance_to(input.price)
                ),
                None => "no unmitigated zone".to_string(),
            },
        });

        votes.push(Vote {
            factor: "session",
            bias: input.session_bias,
            weight: s.session_weight,
            detail: input
                .session
                .map(|z| z.name.to_string())
                .unwrap_or_else(|| "outside kill zones".to_string()),
        });

        votes.push(Vote {
            factor: "sentiment",
            bias: input.sentiment.unwrap_or(Bias::Neutral),
            weight: s.sentiment_weight,
            detail: if input.sentiment.is_some() {
                "positioning feed".to_string()
            } else {
                "unavailable".to_string()
            },
        });

        (votes, nearest)
    }

    /// Stop beyond the nearest invalidating level, or an ATR/percentage fallback
    fn stop_for(
        &self,
        signal_type: SignalType,
        input: &FusionInput<'_>,
    ) -> (f64, Option<String>) {
        let s = &self.settings;
        let entry = input.price;
        let buffer = input.atr.map(|atr| atr * s.stop_buffer_atr).unwrap_or(0.0);
        let fallback_distance = match input.atr {
            Some(atr) if atr > 0.0 => atr * s.fallback_stop_atr,
            _ => entry.abs() * s.fallback_stop_pct / 100.0,
        };

        match signal_type {
            SignalType::Buy => {
                let swing = input
                    .structure
                    .last_swing_low
                    .filter(|&l| l < entry)
                    .map(|l| (l, None));
                let zone = unmitigated(input.zones)
                    .filter(|z| z.kind.bias() == Bias::Bullish && !z.kind.is_liquidity())
                    .filter(|z| z.price_low < entry)
                    .map(|z| (z.price_low, Some(z.id.clone())));

                match swing.into_iter().chain(zone).max_by(|a, b| a.0.total_cmp(&b.0)) {
                    Some((level, id)) => (level - buffer, id),
                    None => (entry - fallback_distance, None),
                }
            }
            SignalType::Sell => {
                let swing = input
                    .structure
                    .last_swing_high
                    .filter(|&h| h > entry)
                    .map(|h| (h, None));
                let zone = unmitigated(input.zones)
                    .filter(|z| z.kind.bias() == Bias::Bearish && !z.kind.is_liquidity())
                    .filter(|z| z.price_high > entry)
                    .map(|z| (z.price_high, Some(z.id.clone())));

                match swing.into_iter().chain(zone).min_by(|a, b| a.0.total_cmp(&b.0)) {
                    Some((level, id)) => (level + buffer, id),
                    None => (entry + fallback_distance, None),
                }
            }
            SignalType::Hold => (entry, None),
        }
    }

    /// Target at the nearest opposing zone or pool, or a fixed reward multiple
    fn target_for(
        &self,
        signal_type: SignalType,
        input: &FusionInput<'_>,
        stop: f64,
    ) -> (f64, Option<String>) {
        let entry = input.price;
        let reward = (entry - stop).abs() * self.settings.fallback_reward_ratio;

        match signal_type {
            SignalType::Buy => unmitigated(input.zones)
                .filter(|z| {
                    matches!(
                        z.kind,
                        ZoneKind::BuySideLiquidity
                            | ZoneKind::BearishFairValueGap
                            | ZoneKind::BearishOrderBlock
                    )
                })
                .filter(|z| z.price_low > entry)
                .min_by(|a, b| a.price_low.total_cmp(&b.price_low))
                .map(|z| (z.price_low, Some(z.id.clone())))
                .unwrap_or((entry + reward, None)),
            SignalType::Sell => unmitigated(input.zones)
                .filter(|z| {
                    matches!(
                        z.kind,
                        ZoneKind::SellSideLiquidity
                            | ZoneKind::BullishFairValueGap
                            | ZoneKind::BullishOrderBlock
                    )
                })
                .filter(|z| z.price_high < entry)
                .max_by(|a, b| a.price_high.total_cmp(&b.price_high))
                .map(|z| (z.price_high, Some(z.id.clone())))
                .unwrap_or((entry - reward, None)),
            SignalType::Hold => (entry, None),
        }
    }
}

/// Strength band for a confidence value
pub fn strength_for(confidence: f64) -> SignalStrength {
    if confidence < 50.0 {
        SignalStrength::Weak
    } else if confidence < 65.0 {
        SignalStrength::Moderate
    } else if confidence < 80.0 {
        SignalStrength::Strong
    } else {
        SignalStrength::VeryStrong
    }
}

fn weight_for(votes: &[Vote], bias: Bias) -> f64 {
    votes
        .iter()
        .filter(|v| v.bias == bias)
        .map(|v| v.weight)
        .sum()
}

fn unmitigated(zones: &[StructureZone]) -> impl Iterator<Item = &StructureZone> {
    zones.iter().filter(|z| !z.mitigated)
}

/// Closest unmitigated order block or fair value gap; liquidity pools only serve as targets
fn nearest_reaction_zone(zones: &[StructureZone], price: f64) -> Option<&StructureZone> {
    unmitigated(zones)
        .filter(|z| !z.kind.is_liquidity())
        .min_by(|a, b| a.distance_to(price).total_cmp(&b.distance_to(price)))
}

fn narrative(signal_type: SignalType, confidence: f64, bull: f64, bear: f64, votes: &[Vote]) -> String {
    let mut lines = vec![format!(
        "{} at {:.0}% confidence (bullish {:.0} / bearish {:.0})",
        signal_type.as_str(),
        confidence,
        bull,
        bear
    )];
    for vote in votes {
        let weight = if vote.bias == Bias::Neutral { 0.0 } else { vote.weight };
        lines.push(format!(
            "- {}: {:?} (+{:.0}) {}",
            vote.factor, vote.bias, weight, vote.detail
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::KILL_ZONES;
    use chrono::TimeZone;

    fn structure(trend: Bias, high: Option<f64>, low: Option<f64>) -> MarketStructure {
        MarketStructure {
            trend,
            last_swing_high: high,
            last_swing_low: low,
            last_break: None,
        }
    }

    fn input<'a>(
        structure: &'a MarketStructure,
        zones: &'a [StructureZone],
        session_bias: Bias,
        sentiment: Option<Bias>,
    ) -> FusionInput<'a> {
        FusionInput {
            symbol: "XAUUSD",
            timeframe: "M15",
            price: 1940.0,
            session: Some(&KILL_ZONES[1]),
            session_bias,
            structure,
            zones,
            sentiment,
            atr: Some(4.0),
        }
    }

    fn zone(kind: ZoneKind, a: f64, b: f64, hour: u32) -> StructureZone {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap();
        StructureZone::new(kind, a, b, at)
    }

    #[test]
    fn test_no_confluence_holds() {
        let ranging = MarketStructure::ranging();
        let signal = SignalFusionEngine::default().fuse(&input(&ranging, &[], Bias::Neutral, None));

        assert_eq!(signal.signal_type, SignalType::Hold);
        assert_eq!(signal.confidence, 0.0);
        assert_eq!(signal.stop_loss, signal.entry_price);
        assert_eq!(signal.take_profit, signal.entry_price);
        assert!(!signal.executed());
    }

    #[test]
    fn test_tie_holds_with_zero_confidence() {
        let ranging = MarketStructure::ranging();
        let zones = vec![zone(ZoneKind::BearishOrderBlock, 1942.0, 1945.0, 3)];
        let signal =
            SignalFusionEngine::default().fuse(&input(&ranging, &zones, Bias::Bullish, None));

        assert_eq!(signal.signal_type, SignalType::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn test_full_agreement_is_clamped() {
        let s = structure(Bias::Bullish, Some(1960.0), Some(1930.0));
        let zones = vec![zone(ZoneKind::BullishOrderBlock, 1935.0, 1938.0, 3)];
        let signal = SignalFusionEngine::default()
            .fuse(&input(&s, &zones, Bias::Bullish, Some(Bias::Bullish)));

        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.confidence, 100.0);
        assert_eq!(signal.strength, SignalStrength::VeryStrong);
    }

    #[test]
    fn test_weak_margin_holds_but_keeps_confidence() {
        // 30 bullish vs 25 bearish
        let s = structure(Bias::Bullish, None, None);
        let signal = SignalFusionEngine::default().fuse(&input(&s, &[], Bias::Bearish, None));

        assert_eq!(signal.signal_type, SignalType::Hold);
        assert_eq!(signal.confidence, 5.0);
        assert_eq!(signal.strength, SignalStrength::Weak);
    }

    #[test]
    fn test_buy_stop_below_nearest_support() {
        // structure 30 + zone 25 + bonus 5 = 60
        let s = structure(Bias::Bullish, Some(1960.0), Some(1925.0));
        let zones = vec![
            zone(ZoneKind::BullishFairValueGap, 1932.0, 1936.0, 3),
            zone(ZoneKind::BuySideLiquidity, 1955.0, 1955.0, 4),
            zone(ZoneKind::BearishOrderBlock, 1970.0, 1975.0, 5),
        ];
        let signal = SignalFusionEngine::default().fuse(&input(&s, &zones, Bias::Neutral, None));

        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.confidence, 60.0);
        assert_eq!(signal.strength, SignalStrength::Moderate);

        // FVG low (1932) is above the swing low (1925); buffer 0.1 * ATR 4
        assert!((signal.stop_loss - 1931.6).abs() < 1e-9);
        assert_eq!(signal.take_profit, 1955.0);
        assert!(signal.stop_loss < signal.entry_price);
        assert!(signal.take_profit > signal.entry_price);
        assert!(signal
            .structure_snapshot
            .zones_used
            .iter()
            .any(|id| id.starts_with("liq-buy")));
    }

    #[test]
    fn test_sell_falls_back_to_atr_stop_and_reward_ratio() {
        let s = structure(Bias::Bearish, None, None);
        let signal = SignalFusionEngine::default()
            .fuse(&input(&s, &[], Bias::Bearish, Some(Bias::Bearish)));

        // 30 + 25 + 20 + 2 * 5
        assert_eq!(signal.signal_type, SignalType::Sell);
        assert_eq!(signal.confidence, 85.0);
        assert!((signal.stop_loss - 1946.0).abs() < 1e-9);
        assert!((signal.take_profit - 1928.0).abs() < 1e-9);
    }

    #[test]
    fn test_mitigated_zones_are_ignored() {
        let ranging = MarketStructure::ranging();
        let mut used = zone(ZoneKind::BullishOrderBlock, 1938.0, 1941.0, 3);
        used.mitigate(Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap());
        let zones = vec![used];

        let signal =
            SignalFusionEngine::default().fuse(&input(&ranging, &zones, Bias::Neutral, None));
        assert_eq!(signal.structure_snapshot.zone_bias, None);
        assert_eq!(signal.signal_type, SignalType::Hold);
    }

    #[test]
    fn test_strength_bands_monotone() {
        let strengths: Vec<_> = (0..=100).map(|c| strength_for(c as f64)).collect();
        assert!(strengths.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(strength_for(49.9), SignalStrength::Weak);
        assert_eq!(strength_for(50.0), SignalStrength::Moderate);
        assert_eq!(strength_for(65.0), SignalStrength::Strong);
        assert_eq!(strength_for(80.0), SignalStrength::VeryStrong);
    }
}
