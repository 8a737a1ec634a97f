use crate::models::Bias;
use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Net positioning inside this band (% of open interest) reads as neutral
const NEUTRAL_BAND_PCT: f64 = 5.0;

type FeedRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Positioning-based directional sentiment for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sentiment {
    pub bias: Bias,
    /// Net speculative position (long minus short contracts)
    pub net_value: f64,
    pub net_pct_of_open_interest: f64,
}

impl Sentiment {
    pub fn from_positioning(net_value: f64, net_pct_of_open_interest: f64) -> Self {
        let bias = if net_pct_of_open_interest > NEUTRAL_BAND_PCT {
            Bias::Bullish
        } else if net_pct_of_open_interest < -NEUTRAL_BAND_PCT {
            Bias::Bearish
        } else {
            Bias::Neutral
        };
        Self {
            bias,
            net_value,
            net_pct_of_open_interest,
        }
    }
}

/// Source of sentiment readings. `None` means the feed has nothing for the symbol.
#[async_trait]
pub trait SentimentFeed: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<Option<Sentiment>>;
}

#[derive(Debug, Deserialize)]
struct PositioningResponse {
    net_value: f64,
    #[serde(default)]
    open_interest: Option<f64>,
    #[serde(default)]
    net_pct_of_open_interest: Option<f64>,
}

/// Client for a Commitment-of-Traders style positioning feed
#[derive(Clone)]
pub struct CotSentimentClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<FeedRateLimiter>,
}

impl CotSentimentClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_minute: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(requests_per_minute).context("requests_per_minute must be > 0")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
        })
    }
}

#[async_trait]
impl SentimentFeed for CotSentimentClient {
    async fn fetch(&self, symbol: &str) -> Result<Option<Sentiment>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/positioning/{}", self.base_url, symbol);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach sentiment feed for {}", symbol))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Sentiment feed returned {} for {}", response.status(), symbol);
        }

        let body: PositioningResponse = response
            .json()
            .await
            .context("Failed to parse positioning response")?;

        let pct = match (body.net_pct_of_open_interest, body.open_interest) {
            (Some(pct), _) => pct,
            (None, Some(oi)) if oi > 0.0 => body.net_value / oi * 100.0,
            _ => 0.0,
        };

        Ok(Some(Sentiment::from_positioning(body.net_value, pct)))
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedSentiment {
    value: Option<Sentiment>,
    fetched_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedSentiment>>>;

/// TTL cache in front of a sentiment feed
///
/// Each symbol has its own slot. Concurrent callers queue on the slot, so a
/// stale entry triggers exactly one fetch and everyone sees its result. A
/// failed refresh falls back to the last value, however old.
pub struct SentimentCache {
    feed: Arc<dyn SentimentFeed>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SentimentCache {
    pub fn new(feed: Arc<dyn SentimentFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<Sentiment> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(symbol.to_string()).or_default().clone()
        };

        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.value;
            }
        }

        match self.feed.fetch(symbol).await {
            Ok(value) => {
                tracing::debug!("Refreshed sentiment for {}: {:?}", symbol, value);
                *cached = Some(CachedSentiment {
                    value,
                    fetched_at: Instant::now(),
                });
                value
            }
            Err(e) => {
                tracing::warn!("Sentiment refresh for {} failed: {:#}", symbol, e);
                cached.as_ref().and_then(|entry| entry.value)
            }
        }
    }
}
