use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLCV candlestick as delivered by the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Current bid/ask from the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Directional reading shared by sessions, structure, zones and sentiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn opposite(self) -> Bias {
        match self {
            Bias::Bullish => Bias::Bearish,
            Bias::Bearish => Bias::Bullish,
            Bias::Neutral => Bias::Neutral,
        }
    }
}

/// Trading signal direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
        }
    }
}

/// Ordinal signal strength, derived from confidence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl SignalStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStrength::Weak => "WEAK",
            SignalStrength::Moderate => "MODERATE",
            SignalStrength::Strong => "STRONG",
            SignalStrength::VeryStrong => "VERY_STRONG",
        }
    }
}

/// Class of structural zone
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    BullishOrderBlock,
    BearishOrderBlock,
    BullishFairValueGap,
    BearishFairValueGap,
    /// Resting orders above a swing high
    BuySideLiquidity,
    /// Resting orders below a swing low
    SellSideLiquidity,
}

impl ZoneKind {
    pub fn slug(&self) -> &'static str {
        match self {
            ZoneKind::BullishOrderBlock => "ob-bull",
            ZoneKind::BearishOrderBlock => "ob-bear",
            ZoneKind::BullishFairValueGap => "fvg-bull",
            ZoneKind::BearishFairValueGap => "fvg-bear",
            ZoneKind::BuySideLiquidity => "liq-buy",
            ZoneKind::SellSideLiquidity => "liq-sell",
        }
    }

    /// Bullish zones act as support, bearish zones as resistance.
    /// Buy-side liquidity sits above price and is read as bearish (reversal after the sweep).
    pub fn bias(&self) -> Bias {
        match self {
            ZoneKind::BullishOrderBlock | ZoneKind::BullishFairValueGap => Bias::Bullish,
            ZoneKind::BearishOrderBlock | ZoneKind::BearishFairValueGap => Bias::Bearish,
            ZoneKind::BuySideLiquidity => Bias::Bearish,
            ZoneKind::SellSideLiquidity => Bias::Bullish,
        }
    }

    pub fn is_liquidity(&self) -> bool {
        matches!(self, ZoneKind::BuySideLiquidity | ZoneKind::SellSideLiquidity)
    }
}

/// Order block, fair value gap or liquidity pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureZone {
    pub id: String,
    pub kind: ZoneKind,
    pub price_high: f64,
    pub price_low: f64,
    pub formed_at: DateTime<Utc>,
    pub mitigated: bool,
    pub mitigated_at: Option<DateTime<Utc>>,
}

impl StructureZone {
    pub fn new(kind: ZoneKind, a: f64, b: f64, formed_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", kind.slug(), formed_at.timestamp()),
            kind,
            price_high: a.max(b),
            price_low: a.min(b),
            formed_at,
            mitigated: false,
            mitigated_at: None,
        }
    }

    /// Mark the zone mitigated. Only the first call has any effect.
    pub fn mitigate(&mut self, at: DateTime<Utc>) {
        if !self.mitigated {
            self.mitigated = true;
            self.mitigated_at = Some(at);
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.price_low && price <= self.price_high
    }

    /// Distance from price to the nearest edge, 0 when inside
    pub fn distance_to(&self, price: f64) -> f64 {
        if self.contains(price) {
            0.0
        } else if price > self.price_high {
            price - self.price_high
        } else {
            self.price_low - price
        }
    }
}

/// Market context recorded with every signal
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructureSnapshot {
    pub session: Option<String>,
    pub session_bias: Option<Bias>,
    pub trend: Option<Bias>,
    pub zone_bias: Option<Bias>,
    pub sentiment_bias: Option<Bias>,
    pub zones_used: Vec<String>,
}

/// Output of one fusion cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64,
    pub structure_snapshot: StructureSnapshot,
    pub narrative: String,
    pub created_at: DateTime<Utc>,
    pub(crate) executed: bool,
    pub(crate) linked_trade_id: Option<String>,
}

impl TradingSignal {
    pub fn executed(&self) -> bool {
        self.executed
    }

    pub fn linked_trade_id(&self) -> Option<&str> {
        self.linked_trade_id.as_deref()
    }

    /// Link the broker order that executed this signal. Can only happen once.
    pub fn mark_executed(&mut self, trade_id: impl Into<String>) -> anyhow::Result<()> {
        if self.executed {
            anyhow::bail!(
                "Signal {} already executed as trade {}",
                self.id,
                self.linked_trade_id.as_deref().unwrap_or("?")
            );
        }
        self.executed = true;
        self.linked_trade_id = Some(trade_id.into());
        Ok(())
    }

    /// Append an annotation (e.g. advisory commentary) to the narrative
    pub fn annotate(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if !self.narrative.is_empty() {
            self.narrative.push_str("\n\n");
        }
        self.narrative.push_str(text.trim());
    }
}

/// One rung of the money-management ladder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoneyManagementLevel {
    pub level_index: u32,
    pub balance_threshold: f64,
    pub lot_size: f64,
    pub daily_target: f64,
    pub weekly_target: f64,
    pub monthly_target: f64,
}

/// Live leveling state of one broker account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingAccountState {
    pub account_id: String,
    pub initial_balance: f64,
    pub current_balance: f64,
    pub current_level: u32,
    pub current_lot_size: f64,
    pub daily_profit: f64,
    pub weekly_profit: f64,
    pub monthly_profit: f64,
    pub total_profit: f64,
    pub last_trading_day: NaiveDate,
    pub week_start_date: NaiveDate,
    pub month_start_date: NaiveDate,
    pub daily_target_reached: bool,
    pub weekly_target_reached: bool,
    pub monthly_target_reached: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEvent {
    SignalGenerated,
    SignalWithheld,
    OrderPlaced,
    OrderRejected,
    CycleAborted,
    TradeClosed,
    TradeSettled,
}

impl LogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEvent::SignalGenerated => "SIGNAL_GENERATED",
            LogEvent::SignalWithheld => "SIGNAL_WITHHELD",
            LogEvent::OrderPlaced => "ORDER_PLACED",
            LogEvent::OrderRejected => "ORDER_REJECTED",
            LogEvent::CycleAborted => "CYCLE_ABORTED",
            LogEvent::TradeClosed => "TRADE_CLOSED",
            LogEvent::TradeSettled => "TRADE_SETTLED",
        }
    }
}

/// Append-only trading event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingLog {
    pub id: Uuid,
    pub account_id: String,
    pub event_type: LogEvent,
    pub message: String,
    pub structured_data: serde_json::Value,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
}

impl TradingLog {
    pub fn new(
        account_id: &str,
        event_type: LogEvent,
        level: LogLevel,
        message: impl Into<String>,
        structured_data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            event_type,
            message: message.into(),
            structured_data,
            level,
            timestamp: Utc::now(),
        }
    }
}
