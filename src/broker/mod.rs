// Brokerage bridge: trait, token session, REST adapter
pub mod rest_bridge;
pub mod session;

pub use rest_bridge::RestBridgeClient;
pub use session::{BrokerSession, SessionHandle};

use crate::config::AccountSettings;
use crate::error::BrokerError;
use crate::models::{Candle, Quote, SignalType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Login for the broker bridge
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl From<&AccountSettings> for Credentials {
    fn from(account: &AccountSettings) -> Self {
        Self {
            user: account.user.clone(),
            password: account.password.clone(),
            host: account.host.clone(),
            port: account.port,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// HOLD has no order side
    pub fn from_signal(signal_type: SignalType) -> Option<Self> {
        match signal_type {
            SignalType::Buy => Some(OrderSide::Buy),
            SignalType::Sell => Some(OrderSide::Sell),
            SignalType::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub comment: Option<String>,
}

/// Broker verdict on an order. A rejection is an answer, not a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub accepted: bool,
    pub broker_order_id: Option<String>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn accepted(broker_order_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            broker_order_id: Some(broker_order_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            broker_order_id: None,
            error: Some(error.into()),
        }
    }
}

/// Logical operations of a brokerage bridge
///
/// Every call after `connect` carries the session token. Implementations never
/// retry writes (`send_order`, `close_order`).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<String, BrokerError>;

    /// Broker-side validity probe for a token
    async fn check_token(&self, token: &str) -> Result<bool, BrokerError>;

    async fn quote(&self, token: &str, symbol: &str) -> Result<Quote, BrokerError>;

    /// Most recent `count` candles, oldest first
    async fn candles(
        &self,
        token: &str,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError>;

    async fn send_order(&self, token: &str, order: &OrderRequest)
        -> Result<OrderResult, BrokerError>;

    async fn close_order(
        &self,
        token: &str,
        broker_order_id: &str,
        volume: Option<f64>,
    ) -> Result<bool, BrokerError>;
}

/// Format probe run before a token is trusted
///
/// Bridges answer some failures with HTTP 200 and an error text in the body,
/// so a token must look like an identifier before it is even probed.
pub fn is_well_formed_token(token: &str) -> bool {
    let token = token.trim();
    (8..=256).contains(&token.len())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
