use crate::models::MoneyManagementLevel;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level settings
///
/// Layered from `config/default.toml` (optional), an explicit file passed on the
/// command line, and `ICTBOT__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub trading: TradingSettings,
    pub broker: BrokerSettings,
    pub accounts: Vec<AccountSettings>,
    pub analysis: AnalysisSettings,
    pub fusion: FusionSettings,
    pub ladder: Vec<MoneyManagementLevel>,
    pub sentiment: SentimentSettings,
    pub advisor: AdvisorSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub symbol: String,
    pub timeframe: String,
    /// Candles requested per cycle
    pub candle_count: usize,
    /// Fewer candles than this aborts the cycle
    pub min_candles: usize,
    pub interval_secs: u64,
    pub broker_utc_offset_hours: i32,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            timeframe: "M15".to_string(),
            candle_count: 200,
            min_candles: 20,
            interval_secs: 900,
            broker_utc_offset_hours: 2,
        }
    }
}

impl TradingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// How long a validated token is trusted before probing again
    pub revalidate_interval_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            revalidate_interval_secs: 60,
        }
    }
}

impl BrokerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_secs)
    }
}

/// Broker login for one trading account
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub account_id: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub initial_balance: f64,
}

impl std::fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSettings")
            .field("account_id", &self.account_id)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("initial_balance", &self.initial_balance)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub lookback: usize,
    pub swing_strength: usize,
    pub displacement_ratio: f64,
    pub min_gap_pct: f64,
    pub equal_level_tolerance_pct: f64,
    pub atr_period: usize,
    /// Zones remembered across cycles
    pub zone_memory: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            lookback: 100,
            swing_strength: 2,
            displacement_ratio: 0.6,
            min_gap_pct: 0.01,
            equal_level_tolerance_pct: 0.05,
            atr_period: 14,
            zone_memory: 500,
        }
    }
}

/// Vote weights and price placement for the fusion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub structure_weight: f64,
    pub zone_weight: f64,
    pub session_weight: f64,
    pub sentiment_weight: f64,
    /// Added per agreeing factor beyond the first
    pub confluence_bonus: f64,
    pub min_confidence: f64,
    pub stop_buffer_atr: f64,
    pub fallback_stop_atr: f64,
    pub fallback_stop_pct: f64,
    pub fallback_reward_ratio: f64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            structure_weight: 30.0,
            zone_weight: 25.0,
            session_weight: 25.0,
            sentiment_weight: 20.0,
            confluence_bonus: 5.0,
            min_confidence: 40.0,
            stop_buffer_atr: 0.1,
            fallback_stop_atr: 1.5,
            fallback_stop_pct: 0.5,
            fallback_reward_ratio: 2.0,
        }
    }
}

impl FusionSettings {
    fn weights(&self) -> [(&'static str, f64); 4] {
        [
            ("structure_weight", self.structure_weight),
            ("zone_weight", self.zone_weight),
            ("session_weight", self.session_weight),
            ("sentiment_weight", self.sentiment_weight),
        ]
    }

    /// A lone factor must never clear the confidence floor on its own
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.weights() {
            if !weight.is_finite() || weight < 0.0 {
                anyhow::bail!("fusion.{} must be a non-negative number, got {}", name, weight);
            }
            if weight >= self.min_confidence {
                anyhow::bail!(
                    "fusion.{} ({}) reaches fusion.min_confidence ({}) without confluence",
                    name,
                    weight,
                    self.min_confidence
                );
            }
        }
        if self.confluence_bonus < 0.0 {
            anyhow::bail!("fusion.confluence_bonus must not be negative");
        }
        if self.min_confidence > 100.0 {
            anyhow::bail!("fusion.min_confidence must not exceed 100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub ttl_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:5100".to_string(),
            api_key: None,
            ttl_secs: 3600,
            requests_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub candle_retention_hours: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            candle_retention_hours: 72,
        }
    }
}

/// Ladder used when neither the store nor the config defines one
pub fn default_ladder() -> Vec<MoneyManagementLevel> {
    // (threshold, lot, daily, weekly, monthly)
    const RUNGS: [(f64, f64, f64, f64, f64); 5] = [
        (0.0, 0.01, 5.0, 25.0, 100.0),
        (1000.0, 0.02, 10.0, 50.0, 200.0),
        (2500.0, 0.05, 25.0, 125.0, 500.0),
        (5000.0, 0.10, 50.0, 250.0, 1000.0),
        (10000.0, 0.20, 100.0, 500.0, 2000.0),
    ];

    RUNGS
        .iter()
        .enumerate()
        .map(|(i, &(threshold, lot, daily, weekly, monthly))| MoneyManagementLevel {
            level_index: i as u32,
            balance_threshold: threshold,
            lot_size: lot,
            daily_target: daily,
            weekly_target: weekly,
            monthly_target: monthly,
        })
        .collect()
}

impl Settings {
    /// Load layered settings
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("ICTBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trading.symbol.is_empty() {
            anyhow::bail!("trading.symbol must be set");
        }
        if self.trading.min_candles > self.trading.candle_count {
            anyhow::bail!(
                "trading.min_candles ({}) exceeds trading.candle_count ({})",
                self.trading.min_candles,
                self.trading.candle_count
            );
        }
        if self.broker.connect_timeout_secs > self.broker.request_timeout_secs {
            anyhow::bail!("broker.connect_timeout_secs must not exceed request_timeout_secs");
        }
        self.fusion.validate()?;
        for account in &self.accounts {
            if account.account_id.is_empty() {
                anyhow::bail!("every account needs an account_id");
            }
        }
        Ok(())
    }

    /// Ladder from config, or the built-in default
    pub fn ladder_levels(&self) -> Vec<MoneyManagementLevel> {
        if self.ladder.is_empty() {
            default_ladder()
        } else {
            self.ladder.clone()
        }
    }
}
