/// Kill-zone session clock
///
/// Converts UTC to broker-local time and classifies it into one of the fixed
/// ICT kill zones. Also derives the Asian range and the session bias that the
/// London and New York opens trade against.

use crate::models::{Bias, Candle};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Expected behaviour of price during a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionRole {
    Accumulation,  // Asia builds the range
    Manipulation,  // London sweeps one side of it
    Distribution,  // New York delivers the move
    Retracement,   // London close pulls back
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KillZone {
    pub name: &'static str,
    pub start_hour: u32,
    pub end_hour: u32,
    pub role: SessionRole,
}

impl KillZone {
    pub fn contains_hour(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

pub const LONDON_OPEN: &str = "London Open Kill Zone";
pub const NEW_YORK_OPEN: &str = "New York Open Kill Zone";
pub const LONDON_CLOSE: &str = "London Close Kill Zone";
pub const ASIAN_SESSION: &str = "Asian Session";

/// Fixed kill zones in lookup priority order (broker-local hours)
///
/// Asia and the London open share hour 9; Asia is listed first and wins it.
pub const KILL_ZONES: [KillZone; 4] = [
    KillZone {
        name: ASIAN_SESSION,
        start_hour: 2,
        end_hour: 10,
        role: SessionRole::Accumulation,
    },
    KillZone {
        name: LONDON_OPEN,
        start_hour: 9,
        end_hour: 12,
        role: SessionRole::Manipulation,
    },
    KillZone {
        name: NEW_YORK_OPEN,
        start_hour: 14,
        end_hour: 17,
        role: SessionRole::Distribution,
    },
    KillZone {
        name: LONDON_CLOSE,
        start_hour: 17,
        end_hour: 19,
        role: SessionRole::Retracement,
    },
];

/// Asian session UTC hours [start, end)
const ASIAN_RANGE_UTC_HOURS: (u32, u32) = (0, 8);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsianRange {
    pub high: f64,
    pub low: f64,
    pub midpoint: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextZone {
    pub name: &'static str,
    pub minutes_until: u32,
}

#[derive(Debug, Clone)]
pub struct SessionClock {
    broker_utc_offset_hours: i32,
    zones: Vec<KillZone>,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new(2)
    }
}

impl SessionClock {
    pub fn new(broker_utc_offset_hours: i32) -> Self {
        Self {
            broker_utc_offset_hours,
            zones: KILL_ZONES.to_vec(),
        }
    }

    pub fn zones(&self) -> &[KillZone] {
        &self.zones
    }

    /// Broker-local (hour, minute) for a UTC instant
    pub fn local_time(&self, now_utc: DateTime<Utc>) -> (u32, u32) {
        let hour = (now_utc.hour() as i32 + self.broker_utc_offset_hours).rem_euclid(24) as u32;
        (hour, now_utc.minute())
    }

    /// Active kill zone at `now_utc`, or None in a session gap
    pub fn classify(&self, now_utc: DateTime<Utc>) -> Option<KillZone> {
        let (hour, _) = self.local_time(now_utc);
        self.classify_hour(hour)
    }

    /// Active kill zone for a broker-local hour
    pub fn classify_hour(&self, local_hour: u32) -> Option<KillZone> {
        self.zones
            .iter()
            .find(|zone| zone.contains_hour(local_hour % 24))
            .cloned()
    }

    /// Next kill zone start, wrapping into tomorrow when all of today's have passed
    pub fn time_to_next_zone(&self, now_utc: DateTime<Utc>) -> Option<NextZone> {
        let (hour, minute) = self.local_time(now_utc);
        let now_minutes = (hour * 60 + minute) as i64;

        let mut best: Option<NextZone> = None;
        for zone in &self.zones {
            let start_minutes = (zone.start_hour * 60) as i64;
            let until = (start_minutes - now_minutes).rem_euclid(24 * 60) as u32;

            // Strict comparison keeps the higher-priority zone on ties
            if best.as_ref().map_or(true, |b| until < b.minutes_until) {
                best = Some(NextZone {
                    name: zone.name,
                    minutes_until: until,
                });
            }
        }

        best
    }
}

/// High/low of candles printed during the Asian session (UTC hours 0-8)
pub fn asian_range(candles: &[Candle]) -> Option<AsianRange> {
    let (start, end) = ASIAN_RANGE_UTC_HOURS;

    let mut asian = candles
        .iter()
        .filter(|c| c.time.hour() >= start && c.time.hour() < end)
        .peekable();
    asian.peek()?;

    let (high, low) = asian.fold((f64::NEG_INFINITY, f64::INFINITY), |(h, l), c| {
        (h.max(c.high), l.min(c.low))
    });

    Some(AsianRange {
        high,
        low,
        midpoint: (high + low) / 2.0,
    })
}

/// Directional bias from the Asian range during the London/New York opens
///
/// London trades the side of the Asian midpoint price is on. New York reads a
/// run beyond the Asian range as a liquidity sweep first: above the high is
/// bearish (expect reversal down), below the low bullish. Inside the range it
/// falls back to the midpoint.
pub fn session_bias(
    asian_high: f64,
    asian_low: f64,
    current_price: f64,
    active_zone: Option<&KillZone>,
) -> Bias {
    let Some(zone) = active_zone else {
        return Bias::Neutral;
    };

    match zone.name {
        LONDON_OPEN => midpoint_bias(asian_high, asian_low, current_price),
        NEW_YORK_OPEN => {
            if current_price > asian_high {
                Bias::Bearish
            } else if current_price < asian_low {
                Bias::Bullish
            } else {
                midpoint_bias(asian_high, asian_low, current_price)
            }
        }
        _ => Bias::Neutral,
    }
}

fn midpoint_bias(asian_high: f64, asian_low: f64, current_price: f64) -> Bias {
    let midpoint = (asian_high + asian_low) / 2.0;
    if current_price > midpoint {
        Bias::Bullish
    } else if current_price < midpoint {
        Bias::Bearish
    } else {
        Bias::Neutral
    }
}
