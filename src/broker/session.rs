use super::{is_well_formed_token, Broker, Credentials, OrderRequest, OrderResult};
use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::models::{Candle, Quote};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TokenCell {
    token: Option<String>,
    validated_at: Option<Instant>,
}

/// Token borrowed by one trading cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    token: String,
}

impl SessionHandle {
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Owns the single broker token of one account
///
/// All broker calls of the account go through one async lock, so a token
/// renewal is never interleaved with data or order calls.
pub struct BrokerSession {
    account_id: String,
    broker: Arc<dyn Broker>,
    credentials: Credentials,
    cell: Mutex<TokenCell>,
    connect_timeout: Duration,
    request_timeout: Duration,
    revalidate_interval: Duration,
}

impl BrokerSession {
    pub fn new(
        account_id: impl Into<String>,
        broker: Arc<dyn Broker>,
        credentials: Credentials,
        settings: &BrokerSettings,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            broker,
            credentials,
            cell: Mutex::new(TokenCell::default()),
            connect_timeout: settings.connect_timeout(),
            request_timeout: settings.request_timeout(),
            revalidate_interval: settings.revalidate_interval(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Return a usable token, probing or reconnecting as needed
    pub async fn ensure_connected(&self) -> Result<SessionHandle, BrokerError> {
        let mut cell = self.cell.lock().await;

        if let (Some(token), Some(at)) = (&cell.token, cell.validated_at) {
            if at.elapsed() < self.revalidate_interval {
                return Ok(SessionHandle {
                    token: token.clone(),
                });
            }
        }

        if let Some(token) = cell.token.clone() {
            match self.probe(&token).await {
                Ok(true) => {
                    debug!("Broker token for {} still valid", self.account_id);
                    cell.validated_at = Some(Instant::now());
                    return Ok(SessionHandle { token });
                }
                Ok(false) => info!("🔑 Broker token for {} expired, reconnecting", self.account_id),
                Err(e) => warn!("Token probe for {} failed: {}, reconnecting", self.account_id, e),
            }
            cell.token = None;
            cell.validated_at = None;
        }

        let token = with_timeout(self.connect_timeout, self.broker.connect(&self.credentials))
            .await?
            .trim()
            .to_string();

        if !is_well_formed_token(&token) {
            return Err(BrokerError::Unauthorized(format!(
                "malformed token returned for {}",
                self.account_id
            )));
        }
        if !self.probe(&token).await? {
            return Err(BrokerError::Unauthorized(format!(
                "fresh token for {} failed validation",
                self.account_id
            )));
        }

        info!("🔌 Connected broker session for {}", self.account_id);
        cell.token = Some(token.clone());
        cell.validated_at = Some(Instant::now());
        Ok(SessionHandle { token })
    }

    /// Drop the cached token; the next cycle reconnects
    pub async fn invalidate(&self) {
        let mut cell = self.cell.lock().await;
        cell.token = None;
        cell.validated_at = None;
    }

    pub async fn quote(&self, handle: &SessionHandle, symbol: &str) -> Result<Quote, BrokerError> {
        let mut cell = self.cell.lock().await;
        let result =
            with_timeout(self.request_timeout, self.broker.quote(handle.token(), symbol)).await;
        forget_on_unauthorized(&mut cell, result)
    }

    pub async fn candles(
        &self,
        handle: &SessionHandle,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let mut cell = self.cell.lock().await;
        let result = with_timeout(
            self.request_timeout,
            self.broker.candles(handle.token(), symbol, timeframe, count),
        )
        .await;
        forget_on_unauthorized(&mut cell, result)
    }

    pub async fn send_order(
        &self,
        handle: &SessionHandle,
        order: &OrderRequest,
    ) -> Result<OrderResult, BrokerError> {
        let mut cell = self.cell.lock().await;
        let result =
            with_timeout(self.request_timeout, self.broker.send_order(handle.token(), order)).await;
        forget_on_unauthorized(&mut cell, result)
    }

    pub async fn close_order(
        &self,
        handle: &SessionHandle,
        broker_order_id: &str,
        volume: Option<f64>,
    ) -> Result<bool, BrokerError> {
        let mut cell = self.cell.lock().await;
        let result = with_timeout(
            self.request_timeout,
            self.broker.close_order(handle.token(), broker_order_id, volume),
        )
        .await;
        forget_on_unauthorized(&mut cell, result)
    }

    async fn probe(&self, token: &str) -> Result<bool, BrokerError> {
        if !is_well_formed_token(token) {
            return Ok(false);
        }
        with_timeout(self.connect_timeout, self.broker.check_token(token)).await
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BrokerError::Timeout(limit.as_secs()))?
}

fn forget_on_unauthorized<T>(
    cell: &mut TokenCell,
    result: Result<T, BrokerError>,
) -> Result<T, BrokerError> {
    if let Err(BrokerError::Unauthorized(_)) = &result {
        cell.token = None;
        cell.validated_at = None;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TOKEN: &str = "0a1b2c3d-4e5f-6789-abcd-ef0123456789";

    #[derive(Default)]
    struct CountingBroker {
        connects: AtomicUsize,
        checks: AtomicUsize,
        token_valid: AtomicBool,
        malformed: bool,
        slow: bool,
    }

    #[async_trait]
    impl Broker for CountingBroker {
        async fn connect(&self, _credentials: &Credentials) -> Result<String, BrokerError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.token_valid.store(true, Ordering::SeqCst);
            if self.malformed {
                Ok("Invalid account".to_string())
            } else {
                Ok(TOKEN.to_string())
            }
        }

        async fn check_token(&self, _token: &str) -> Result<bool, BrokerError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.token_valid.load(Ordering::SeqCst))
        }

        async fn quote(&self, _token: &str, _symbol: &str) -> Result<Quote, BrokerError> {
            Err(BrokerError::Unauthorized("session expired".to_string()))
        }

        async fn candles(
            &self,
            _token: &str,
            _symbol: &str,
            _timeframe: &str,
            _count: usize,
        ) -> Result<Vec<Candle>, BrokerError> {
            Ok(vec![])
        }

        async fn send_order(
            &self,
            _token: &str,
            _order: &OrderRequest,
        ) -> Result<OrderResult, BrokerError> {
            Ok(OrderResult::rejected("market closed"))
        }

        async fn close_order(
            &self,
            _token: &str,
            _broker_order_id: &str,
            _volume: Option<f64>,
        ) -> Result<bool, BrokerError> {
            Ok(true)
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            user: "1001".to_string(),
            password: "secret".to_string(),
            host: "demo.broker".to_string(),
            port: 443,
        }
    }

    fn session(broker: Arc<CountingBroker>, revalidate_secs: u64) -> BrokerSession {
        let settings = BrokerSettings {
            revalidate_interval_secs: revalidate_secs,
            ..Default::default()
        };
        BrokerSession::new("demo", broker, credentials(), &settings)
    }

    #[tokio::test]
    async fn test_token_reused_within_revalidate_interval() {
        let broker = Arc::new(CountingBroker::default());
        let session = session(broker.clone(), 60);

        let first = session.ensure_connected().await.unwrap();
        let second = session.ensure_connected().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(broker.connects.load(Ordering::SeqCst), 1);
        // Only the probe of the fresh token
        assert_eq!(broker.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_reconnects() {
        let broker = Arc::new(CountingBroker::default());
        let session = session(broker.clone(), 0);

        session.ensure_connected().await.unwrap();
        broker.token_valid.store(false, Ordering::SeqCst);
        session.ensure_connected().await.unwrap();

        assert_eq!(broker.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_token_rejected() {
        let broker = Arc::new(CountingBroker {
            malformed: true,
            ..Default::default()
        });
        let session = session(broker.clone(), 60);

        let result = session.ensure_connected().await;
        assert!(matches!(result, Err(BrokerError::Unauthorized(_))));
        // The bogus token is never probed
        assert_eq!(broker.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let broker = Arc::new(CountingBroker {
            slow: true,
            ..Default::default()
        });
        let settings = BrokerSettings {
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let session = BrokerSession::new("demo", broker, credentials(), &settings);

        let result = session.ensure_connected().await;
        assert!(matches!(result, Err(BrokerError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_unauthorized_call_forgets_token() {
        let broker = Arc::new(CountingBroker::default());
        let session = session(broker.clone(), 60);

        let handle = session.ensure_connected().await.unwrap();
        assert!(session.quote(&handle, "XAUUSD").await.is_err());

        session.ensure_connected().await.unwrap();
        assert_eq!(broker.connects.load(Ordering::SeqCst), 2);
    }
}
