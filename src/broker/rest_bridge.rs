use super::{Broker, Credentials, OrderRequest, OrderResult};
use crate::error::BrokerError;
use crate::models::{Candle, Quote};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::time::{sleep, Duration};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// JSON client for an MT-style REST bridge
///
/// Reads (`/GetQuote`, `/PriceHistory`) retry on transport failures with
/// exponential backoff. Orders are sent exactly once.
#[derive(Clone)]
pub struct RestBridgeClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QuoteDto {
    bid: f64,
    ask: f64,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BarDto {
    time: String,
    open_price: f64,
    high_price: f64,
    low_price: f64,
    close_price: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct OrderDto {
    ticket: i64,
}

impl RestBridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Response, BrokerError> {
        let response = self.client.get(self.url(endpoint)).query(query).send().await?;
        check_status(response).await
    }

    /// GET with retry on transport errors only
    async fn get_with_retry(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Response, BrokerError> {
        let mut attempt = 1;
        loop {
            match self.get(endpoint, query).await {
                Err(BrokerError::Unreachable(e)) if attempt < MAX_RETRIES => {
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                    tracing::warn!(
                        "Attempt {}/{} of {} failed: {}. Retrying in {}ms...",
                        attempt,
                        MAX_RETRIES,
                        endpoint,
                        e,
                        backoff_ms
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, BrokerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BrokerError::Unauthorized(body)),
        _ => Err(BrokerError::InvalidResponse(format!("{}: {}", status, body))),
    }
}

/// Bridges send either RFC 3339 or `YYYY-MM-DDTHH:MM:SS` without an offset (UTC)
fn parse_time(raw: &str) -> Result<DateTime<Utc>, BrokerError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|t| t.and_utc())
        .map_err(|e| BrokerError::InvalidResponse(format!("bad timestamp {:?}: {}", raw, e)))
}

/// Text bodies sometimes arrive JSON-quoted
fn unquote(body: &str) -> String {
    body.trim().trim_matches('"').to_string()
}

#[async_trait]
impl Broker for RestBridgeClient {
    async fn connect(&self, credentials: &Credentials) -> Result<String, BrokerError> {
        let query = [
            ("user", credentials.user.clone()),
            ("password", credentials.password.clone()),
            ("host", credentials.host.clone()),
            ("port", credentials.port.to_string()),
        ];
        let body = self.get("Connect", &query).await?.text().await?;
        Ok(unquote(&body))
    }

    async fn check_token(&self, token: &str) -> Result<bool, BrokerError> {
        let response = self.get("CheckConnect", &[("id", token.to_string())]).await;
        match response {
            Ok(r) => Ok(unquote(&r.text().await?).eq_ignore_ascii_case("OK")),
            Err(BrokerError::Unauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn quote(&self, token: &str, symbol: &str) -> Result<Quote, BrokerError> {
        let query = [("id", token.to_string()), ("symbol", symbol.to_string())];
        let dto: QuoteDto = self.get_with_retry("GetQuote", &query).await?.json().await?;

        if dto.bid <= 0.0 || dto.ask <= 0.0 {
            return Err(BrokerError::InvalidResponse(format!(
                "empty quote for {}",
                symbol
            )));
        }

        let time = match dto.time.as_deref() {
            Some(raw) => parse_time(raw)?,
            None => Utc::now(),
        };

        Ok(Quote {
            bid: dto.bid,
            ask: dto.ask,
            time,
        })
    }

    async fn candles(
        &self,
        token: &str,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let query = [
            ("id", token.to_string()),
            ("symbol", symbol.to_string()),
            ("timeframe", timeframe.to_string()),
            ("count", count.to_string()),
        ];
        let bars: Vec<BarDto> = self
            .get_with_retry("PriceHistory", &query)
            .await?
            .json()
            .await?;

        let mut candles = bars
            .into_iter()
            .map(|bar| {
                Ok(Candle {
                    time: parse_time(&bar.time)?,
                    open: bar.open_price,
                    high: bar.high_price,
                    low: bar.low_price,
                    close: bar.close_price,
                    volume: bar.tick_volume,
                })
            })
            .collect::<Result<Vec<_>, BrokerError>>()?;

        // Oldest first, strictly increasing
        candles.sort_by_key(|c| c.time);
        candles.dedup_by_key(|c| c.time);
        Ok(candles)
    }

    async fn send_order(
        &self,
        token: &str,
        order: &OrderRequest,
    ) -> Result<OrderResult, BrokerError> {
        let mut query = vec![
            ("id", token.to_string()),
            ("symbol", order.symbol.clone()),
            ("operation", order.side.as_str().to_string()),
            ("volume", order.volume.to_string()),
        ];
        if let Some(sl) = order.stop_loss {
            query.push(("stoploss", sl.to_string()));
        }
        if let Some(tp) = order.take_profit {
            query.push(("takeprofit", tp.to_string()));
        }
        if let Some(comment) = &order.comment {
            query.push(("comment", comment.clone()));
        }

        match self.get("OrderSend", &query).await {
            Ok(response) => {
                let dto: OrderDto = response.json().await?;
                Ok(OrderResult::accepted(dto.ticket.to_string()))
            }
            // The bridge reports trade-server refusals as 4xx/5xx with a reason
            Err(BrokerError::InvalidResponse(reason)) => Ok(OrderResult::rejected(reason)),
            Err(e) => Err(e),
        }
    }

    async fn close_order(
        &self,
        token: &str,
        broker_order_id: &str,
        volume: Option<f64>,
    ) -> Result<bool, BrokerError> {
        let mut query = vec![
            ("id", token.to_string()),
            ("ticket", broker_order_id.to_string()),
        ];
        if let Some(lots) = volume {
            query.push(("lots", lots.to_string()));
        }

        match self.get("OrderClose", &query).await {
            Ok(_) => Ok(true),
            Err(BrokerError::InvalidResponse(reason)) => {
                tracing::warn!("Close of order {} refused: {}", broker_order_id, reason);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
