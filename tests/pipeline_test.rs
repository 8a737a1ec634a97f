use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ictbot::api::{Sentiment, SentimentCache, SentimentFeed};
use ictbot::broker::{Broker, BrokerSession, Credentials, OrderRequest, OrderResult, OrderSide};
use ictbot::config::{default_ladder, Settings};
use ictbot::db::{MemoryStore, TradingStore};
use ictbot::execution::{CycleOutcome, TradeOrchestrator};
use ictbot::models::{Candle, LogEvent, Quote, SignalType};
use ictbot::risk::MoneyManagementLadder;
use ictbot::{BrokerError, CycleError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const TOKEN: &str = "0a1b2c3d-4e5f-6789-abcd-ef0123456789";

struct MockBroker {
    candles: Vec<Candle>,
    quote: Quote,
    order_result: OrderResult,
    connect_delay: Duration,
    fail_connect: bool,
    orders: Mutex<Vec<OrderRequest>>,
    closes: Mutex<Vec<String>>,
}

impl MockBroker {
    fn new(candles: Vec<Candle>, price: f64) -> Self {
        let time = candles.last().map(|c| c.time).unwrap_or_else(Utc::now);
        Self {
            candles,
            quote: Quote {
                bid: price - 0.1,
                ask: price + 0.1,
                time,
            },
            order_result: OrderResult::accepted("90001"),
            connect_delay: Duration::ZERO,
            fail_connect: false,
            orders: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
        }
    }

    fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self, _credentials: &Credentials) -> Result<String, BrokerError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(BrokerError::Unreachable("connection refused".to_string()));
        }
        Ok(TOKEN.to_string())
    }

    async fn check_token(&self, token: &str) -> Result<bool, BrokerError> {
        Ok(token == TOKEN)
    }

    async fn quote(&self, _token: &str, _symbol: &str) -> Result<Quote, BrokerError> {
        Ok(self.quote)
    }

    async fn candles(
        &self,
        _token: &str,
        _symbol: &str,
        _timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let skip = self.candles.len().saturating_sub(count);
        Ok(self.candles[skip..].to_vec())
    }

    async fn send_order(
        &self,
        _token: &str,
        order: &OrderRequest,
    ) -> Result<OrderResult, BrokerError> {
        self.orders.lock().unwrap().push(order.clone());
        Ok(self.order_result.clone())
    }

    async fn close_order(
        &self,
        _token: &str,
        broker_order_id: &str,
        _volume: Option<f64>,
    ) -> Result<bool, BrokerError> {
        self.closes.lock().unwrap().push(broker_order_id.to_string());
        Ok(true)
    }
}

struct BullishFeed;

#[async_trait]
impl SentimentFeed for BullishFeed {
    async fn fetch(&self, _symbol: &str) -> anyhow::Result<Option<Sentiment>> {
        Ok(Some(Sentiment::from_positioning(150_000.0, 25.0)))
    }
}

/// Monday 2024-03-04, 00:00 UTC
fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
}

fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                time: session_start() + ChronoDuration::minutes(15 * i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 500.0,
            }
        })
        .collect()
}

/// Rising zig-zag through the Asian session: higher highs, higher lows, bullish breaks
fn asian_uptrend() -> Vec<Candle> {
    const WAVE: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 2.0, 1.0];
    let closes: Vec<f64> = (0..32)
        .map(|i| 1900.0 + WAVE[i % 6] * 1.5 + 0.5 * i as f64)
        .collect();
    candles_from_closes(&closes)
}

fn flat() -> Vec<Candle> {
    candles_from_closes(&[1940.0; 40])
}

/// Inside the Asian range, above its midpoint
fn upper_range_price(candles: &[Candle]) -> f64 {
    let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    low + (high - low) * 0.8
}

/// 10:00 broker time (UTC+2), London Open kill zone
fn london_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

/// 23:00 broker time, outside every kill zone
fn dead_hours() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 21, 0, 0).unwrap()
}

fn orchestrator(
    broker: Arc<MockBroker>,
    store: Arc<MemoryStore>,
    bullish_sentiment: bool,
) -> Arc<TradeOrchestrator> {
    let settings = Settings::default();
    let credentials = Credentials {
        user: "1001".to_string(),
        password: "secret".to_string(),
        host: "demo.broker".to_string(),
        port: 443,
    };
    let session = Arc::new(BrokerSession::new(
        "demo",
        broker,
        credentials,
        &settings.broker,
    ));
    let ladder = MoneyManagementLadder::new(default_ladder()).unwrap();

    let mut orchestrator =
        TradeOrchestrator::new("demo", 500.0, &settings, session, ladder, store);
    if bullish_sentiment {
        let cache = SentimentCache::new(Arc::new(BullishFeed), Duration::from_secs(3600));
        orchestrator = orchestrator.with_sentiment(Arc::new(cache));
    }
    Arc::new(orchestrator)
}

async fn events(store: &MemoryStore) -> Vec<LogEvent> {
    store
        .recent_logs("demo", 100)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.event_type)
        .collect()
}

#[tokio::test]
async fn test_no_confluence_persists_hold() {
    let broker = Arc::new(MockBroker::new(flat(), 1940.0));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker.clone(), store.clone(), false);

    let outcome = assert_ok!(orchestrator.run_cycle_at(dead_hours()).await);

    let CycleOutcome::Hold(signal) = outcome else {
        panic!("expected HOLD, got {:?}", outcome);
    };
    assert_eq!(signal.confidence, 0.0);
    assert!(broker.orders().is_empty());

    let stored = store.recent_signals("XAUUSD", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].signal_type, SignalType::Hold);
    assert!(!stored[0].executed());
    assert_eq!(events(&store).await, vec![LogEvent::SignalGenerated]);
}

#[tokio::test]
async fn test_confluence_places_order() {
    let candles = asian_uptrend();
    let price = upper_range_price(&candles);
    let broker = Arc::new(MockBroker::new(candles, price));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker.clone(), store.clone(), true);

    let outcome = orchestrator.run_cycle_at(london_open()).await.unwrap();

    let CycleOutcome::OrderPlaced {
        signal,
        broker_order_id,
        lot_size,
    } = outcome
    else {
        panic!("expected an order, got {:?}", outcome);
    };
    assert_eq!(signal.signal_type, SignalType::Buy);
    assert!(signal.confidence >= 60.0);
    assert_eq!(broker_order_id, "90001");
    assert_eq!(lot_size, 0.01);
    assert!(signal.stop_loss < signal.entry_price);
    assert!(signal.take_profit > signal.entry_price);

    let orders = broker.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].volume, 0.01);
    assert_eq!(orders[0].stop_loss, Some(signal.stop_loss));

    let stored = store.recent_signals("XAUUSD", 10).await.unwrap();
    assert!(stored[0].executed());
    assert_eq!(stored[0].linked_trade_id(), Some("90001"));
    assert_eq!(events(&store).await, vec![LogEvent::OrderPlaced]);

    let state = store.load_account_state("demo").await.unwrap().unwrap();
    assert_eq!(state.current_lot_size, 0.01);
}

#[tokio::test]
async fn test_reached_target_withholds_signal() {
    let candles = asian_uptrend();
    let price = upper_range_price(&candles);
    let broker = Arc::new(MockBroker::new(candles, price));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker.clone(), store.clone(), true);

    // Daily target of the first rung is 5
    let state = orchestrator
        .settle_closed_trade_at("89999", 6.0, london_open())
        .await
        .unwrap();
    assert!(state.daily_target_reached);

    let outcome = orchestrator.run_cycle_at(london_open()).await.unwrap();

    let CycleOutcome::Withheld { signal, reason } = outcome else {
        panic!("expected withheld signal, got {:?}", outcome);
    };
    assert_eq!(reason, "daily target reached");
    assert!(!signal.executed());
    assert!(broker.orders().is_empty());
    assert_eq!(
        events(&store).await,
        vec![LogEvent::SignalWithheld, LogEvent::TradeSettled]
    );

    // Next day the daily gate is lifted
    let tomorrow = london_open() + ChronoDuration::days(1);
    let outcome = orchestrator.run_cycle_at(tomorrow).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::OrderPlaced { .. }));
}

#[tokio::test]
async fn test_rejected_order_persists_unexecuted_signal() {
    let candles = asian_uptrend();
    let price = upper_range_price(&candles);
    let mut broker = MockBroker::new(candles, price);
    broker.order_result = OrderResult::rejected("Market is closed");
    let broker = Arc::new(broker);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker.clone(), store.clone(), true);

    let result = orchestrator.run_cycle_at(london_open()).await;

    match result {
        Err(CycleError::OrderRejected(reason)) => assert!(reason.contains("Market is closed")),
        other => panic!("expected rejection, got {:?}", other),
    }
    let stored = store.recent_signals("XAUUSD", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].executed());
    assert_eq!(events(&store).await, vec![LogEvent::OrderRejected]);
}

#[tokio::test]
async fn test_short_history_aborts_without_signal() {
    let candles = flat().into_iter().take(5).collect();
    let broker = Arc::new(MockBroker::new(candles, 1940.0));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker, store.clone(), false);

    let error = assert_err!(orchestrator.run_cycle_at(dead_hours()).await);

    assert!(matches!(error, CycleError::DataUnavailable(_)));
    assert!(store.recent_signals("XAUUSD", 10).await.unwrap().is_empty());
    assert_eq!(events(&store).await, vec![LogEvent::CycleAborted]);
}

#[tokio::test]
async fn test_overlapping_cycle_is_skipped() {
    let mut broker = MockBroker::new(flat(), 1940.0);
    broker.connect_delay = Duration::from_millis(300);
    let broker = Arc::new(broker);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker, store, false);

    let (first, second) = tokio::join!(orchestrator.run_cycle_at(dead_hours()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.run_cycle_at(dead_hours()).await
    });

    assert!(matches!(first, Ok(CycleOutcome::Hold(_))));
    assert!(matches!(second, Ok(CycleOutcome::Skipped)));

    // The guard is released afterwards
    assert!(matches!(
        orchestrator.run_cycle_at(dead_hours()).await,
        Ok(CycleOutcome::Hold(_))
    ));
}

#[tokio::test]
async fn test_tick_records_connectivity_failure() {
    let mut broker = MockBroker::new(flat(), 1940.0);
    broker.fail_connect = true;
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(Arc::new(broker), store.clone(), false);

    orchestrator.tick().await;

    let logs = store.recent_logs("demo", 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event_type, LogEvent::CycleAborted);
    assert_eq!(logs[0].structured_data["kind"], "CONNECTIVITY");
}

#[tokio::test]
async fn test_close_trade_is_logged() {
    let broker = Arc::new(MockBroker::new(flat(), 1940.0));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(broker.clone(), store.clone(), false);

    assert!(assert_ok!(orchestrator.close_trade("90001", None).await));
    assert_eq!(broker.closes.lock().unwrap().as_slice(), ["90001".to_string()]);
    assert_eq!(events(&store).await, vec![LogEvent::TradeClosed]);
}
