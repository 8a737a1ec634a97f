use crate::models::Candle;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

/// Optional long-term store for broker candles
#[async_trait]
pub trait CandleArchive: Send + Sync {
    /// Upsert candles; a candle re-sent for the same time replaces the old one
    async fn save_candles(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Result<()>;

    /// Candles at or after `since`, oldest first
    async fn load_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Drop candles older than `keep_hours`; returns how many were removed
    async fn cleanup_old(&self, symbol: &str, timeframe: &str, keep_hours: u64) -> Result<usize>;
}

fn archive_key(symbol: &str, timeframe: &str) -> String {
    format!("candles:{}:{}", symbol, timeframe)
}

/// Redis candle archive
///
/// One sorted set per symbol/timeframe, candle open time (unix seconds) as score
#[derive(Clone)]
pub struct RedisCandleArchive {
    conn: ConnectionManager,
}

impl RedisCandleArchive {
    /// Connect to Redis, giving up after 5 seconds
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis candle archive");

        Ok(Self { conn })
    }
}

#[async_trait]
impl CandleArchive for RedisCandleArchive {
    async fn save_candles(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }

        let key = archive_key(symbol, timeframe);
        let mut pipe = redis::pipe();
        pipe.atomic();

        for candle in candles {
            let score = candle.time.timestamp();
            // The forming candle changes every cycle; replace rather than duplicate
            pipe.zrembyscore(&key, score, score).ignore();
            pipe.zadd(&key, serde_json::to_string(candle)?, score).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!("Archived {} candles for {}", candles.len(), key);
        Ok(())
    }

    async fn load_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let key = archive_key(symbol, timeframe);
        let mut conn = self.conn.clone();

        let results: Vec<String> = conn.zrangebyscore(&key, since.timestamp(), "+inf").await?;

        let candles = results
            .iter()
            .map(|json| serde_json::from_str::<Candle>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!("Loaded {} archived candles for {}", candles.len(), key);
        Ok(candles)
    }

    async fn cleanup_old(&self, symbol: &str, timeframe: &str, keep_hours: u64) -> Result<usize> {
        let key = archive_key(symbol, timeframe);
        let cutoff = Utc::now() - chrono::Duration::hours(keep_hours as i64);
        let mut conn = self.conn.clone();

        // Exclusive upper bound keeps a candle opened exactly at the cutoff
        let removed: usize = conn
            .zrembyscore(&key, "-inf", format!("({}", cutoff.timestamp()))
            .await?;

        if removed > 0 {
            tracing::debug!("Cleaned up {} old candles for {}", removed, key);
        }
        Ok(removed)
    }
}
