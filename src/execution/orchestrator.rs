use crate::api::{Advisor, SentimentCache};
use crate::broker::{BrokerSession, OrderRequest, OrderSide, SessionHandle};
use crate::config::Settings;
use crate::db::TradingStore;
use crate::error::{BrokerError, CycleError};
use crate::ict::{IctAnalyzer, ZoneBook};
use crate::indicators::calculate_atr;
use crate::models::{Bias, LogEvent, LogLevel, TradingAccountState, TradingLog, TradingSignal};
use crate::persistence::CandleArchive;
use crate::risk::MoneyManagementLadder;
use crate::session::{asian_range, session_bias, SessionClock};
use crate::strategy::{FusionInput, SignalFusionEngine};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// How a cycle ended when it did not fail
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Another cycle was still running
    Skipped,
    Hold(TradingSignal),
    Withheld {
        signal: TradingSignal,
        reason: String,
    },
    OrderPlaced {
        signal: TradingSignal,
        broker_order_id: String,
        lot_size: f64,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Skipped => "SKIPPED",
            CycleOutcome::Hold(_) => "HOLD",
            CycleOutcome::Withheld { .. } => "WITHHELD",
            CycleOutcome::OrderPlaced { .. } => "ORDER_PLACED",
        }
    }

    pub fn signal(&self) -> Option<&TradingSignal> {
        match self {
            CycleOutcome::Skipped => None,
            CycleOutcome::Hold(signal)
            | CycleOutcome::Withheld { signal, .. }
            | CycleOutcome::OrderPlaced { signal, .. } => Some(signal),
        }
    }
}

/// Clears the in-flight flag when the cycle ends, panics included
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the trading cycle of one account
pub struct TradeOrchestrator {
    account_id: String,
    initial_balance: f64,
    symbol: String,
    timeframe: String,
    candle_count: usize,
    min_candles: usize,
    atr_period: usize,
    retention_hours: u64,
    session: Arc<BrokerSession>,
    clock: SessionClock,
    analyzer: IctAnalyzer,
    zone_book: Mutex<ZoneBook>,
    fusion: SignalFusionEngine,
    ladder: MoneyManagementLadder,
    store: Arc<dyn TradingStore>,
    sentiment: Option<Arc<SentimentCache>>,
    advisor: Option<Arc<dyn Advisor>>,
    archive: Option<Arc<dyn CandleArchive>>,
    in_flight: AtomicBool,
    // Serialises read-modify-write of the account state between cycles and settlements
    account_lock: tokio::sync::Mutex<()>,
}

impl TradeOrchestrator {
    pub fn new(
        account_id: impl Into<String>,
        initial_balance: f64,
        settings: &Settings,
        session: Arc<BrokerSession>,
        ladder: MoneyManagementLadder,
        store: Arc<dyn TradingStore>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            initial_balance,
            symbol: settings.trading.symbol.clone(),
            timeframe: settings.trading.timeframe.clone(),
            candle_count: settings.trading.candle_count,
            min_candles: settings.trading.min_candles,
            atr_period: settings.analysis.atr_period,
            retention_hours: settings.storage.candle_retention_hours,
            session,
            clock: SessionClock::new(settings.trading.broker_utc_offset_hours),
            analyzer: IctAnalyzer::from_settings(&settings.analysis),
            zone_book: Mutex::new(ZoneBook::new(settings.analysis.zone_memory)),
            fusion: SignalFusionEngine::new(settings.fusion.clone()),
            ladder,
            store,
            sentiment: None,
            advisor: None,
            archive: None,
            in_flight: AtomicBool::new(false),
            account_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_sentiment(mut self, sentiment: Arc<SentimentCache>) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn CandleArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Scheduler entry point: never fails, never panics through
    ///
    /// The cycle runs in its own task so a panic is contained and recorded as a
    /// connectivity-class abort.
    pub async fn tick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cycle = tokio::spawn(async move { this.run_cycle().await });

        match cycle.await {
            Ok(Ok(outcome)) => {
                info!("✅ [{}] Cycle finished: {}", self.account_id, outcome.label());
            }
            Ok(Err(e)) => {
                warn!("[{}] Cycle ended early ({}): {}", self.account_id, e.kind(), e);
            }
            Err(join_error) => {
                error!("💥 [{}] Cycle task failed: {}", self.account_id, join_error);
                self.record(
                    LogEvent::CycleAborted,
                    LogLevel::Error,
                    format!("Cycle task failed: {}", join_error),
                    json!({ "kind": "CONNECTIVITY", "panic": join_error.is_panic() }),
                )
                .await;
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// One full cycle as of `now`. Failures are recorded in the trading log before returning.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            info!("⏭️  [{}] Previous cycle still running, skipping", self.account_id);
            return Ok(CycleOutcome::Skipped);
        }
        let _in_flight = InFlight(&self.in_flight);

        let result = self.execute_cycle(now).await;

        if let Err(e) = &result {
            let level = match e {
                CycleError::DataUnavailable(_) => LogLevel::Warn,
                _ => LogLevel::Error,
            };
            self.record(
                e.log_event(),
                level,
                e.to_string(),
                json!({ "kind": e.kind(), "symbol": self.symbol }),
            )
            .await;
        }

        result
    }

    async fn execute_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        // 1. Broker session
        let handle = self.session.ensure_connected().await?;

        // 2. Market data
        let quote = self
            .session
            .quote(&handle, &self.symbol)
            .await
            .map_err(data_error)?;
        let candles = self
            .session
            .candles(&handle, &self.symbol, &self.timeframe, self.candle_count)
            .await
            .map_err(data_error)?;

        if candles.len() < self.min_candles.max(1) {
            return Err(CycleError::DataUnavailable(format!(
                "{} candles for {} {}, need {}",
                candles.len(),
                self.symbol,
                self.timeframe,
                self.min_candles
            )));
        }
        self.archive_candles(&candles).await;

        // 3. Session and structure
        let price = quote.mid();
        let kill_zone = self.clock.classify(now);
        let bias = asian_range(&candles)
            .map(|r| session_bias(r.high, r.low, price, kill_zone.as_ref()))
            .unwrap_or(Bias::Neutral);
        let structure = self.analyzer.structure.analyze(&candles);
        let detected = self.analyzer.detect_zones(&candles);
        let zones = self
            .zone_book
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .absorb(detected);
        let atr = calculate_atr(&candles, self.atr_period);

        let sentiment = match &self.sentiment {
            Some(cache) => cache.get(&self.symbol).await.map(|s| s.bias),
            None => None,
        };

        // 4. Fusion
        let mut signal = self.fusion.fuse(&FusionInput {
            symbol: &self.symbol,
            timeframe: &self.timeframe,
            price,
            session: kill_zone.as_ref(),
            session_bias: bias,
            structure: &structure,
            zones: &zones,
            sentiment,
            atr,
        });

        info!(
            "📊 [{}] {} {} @ {:.2} confidence {:.0}% ({}) session={}",
            self.account_id,
            signal.signal_type.as_str(),
            self.symbol,
            signal.entry_price,
            signal.confidence,
            signal.strength.as_str(),
            kill_zone.as_ref().map(|z| z.name).unwrap_or("none")
        );

        // 5. Nothing to trade
        let Some(side) = OrderSide::from_signal(signal.signal_type) else {
            self.persist_signal(&signal).await;
            self.record(
                LogEvent::SignalGenerated,
                LogLevel::Info,
                format!("HOLD {} at {:.2}", self.symbol, signal.entry_price),
                signal_data(&signal),
            )
            .await;
            return Ok(CycleOutcome::Hold(signal));
        };

        self.annotate(&mut signal).await;

        // 6. Money management
        let _account = self.account_lock.lock().await;
        let mut state = self.load_account_state(now).await?;
        let authorization = self.ladder.authorize(&state);

        if !authorization.permitted {
            let reason = authorization
                .reason
                .unwrap_or_else(|| "not permitted".to_string());
            info!("🛑 [{}] Signal withheld: {}", self.account_id, reason);
            self.persist_signal(&signal).await;
            let mut data = signal_data(&signal);
            data["reason"] = json!(reason);
            self.record(
                LogEvent::SignalWithheld,
                LogLevel::Info,
                format!("{} withheld: {}", signal.signal_type.as_str(), reason),
                data,
            )
            .await;
            return Ok(CycleOutcome::Withheld { signal, reason });
        }

        // 7. Order
        let order = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            volume: authorization.lot_size,
            stop_loss: Some(signal.stop_loss),
            take_profit: Some(signal.take_profit),
            comment: Some(format!("ictbot {}", signal.id)),
        };

        let result = match self.session.send_order(&handle, &order).await {
            Ok(result) => result,
            Err(e) => {
                self.persist_signal(&signal).await;
                return Err(e.into());
            }
        };

        let broker_order_id = match (result.accepted, result.broker_order_id) {
            (true, Some(id)) => id,
            (accepted, _) => {
                self.persist_signal(&signal).await;
                let reason = result.error.unwrap_or_else(|| {
                    if accepted {
                        "accepted without order id".to_string()
                    } else {
                        "rejected without reason".to_string()
                    }
                });
                return Err(CycleError::OrderRejected(reason));
            }
        };

        if let Err(e) = signal.mark_executed(broker_order_id.clone()) {
            warn!("[{}] {}", self.account_id, e);
        }
        self.persist_signal(&signal).await;

        info!(
            "💰 [{}] {} {} lots {} (order {}) SL {:.2} TP {:.2}",
            self.account_id,
            side.as_str(),
            authorization.lot_size,
            self.symbol,
            broker_order_id,
            signal.stop_loss,
            signal.take_profit
        );

        let mut data = signal_data(&signal);
        data["broker_order_id"] = json!(broker_order_id);
        data["lot_size"] = json!(authorization.lot_size);
        self.record(
            LogEvent::OrderPlaced,
            LogLevel::Info,
            format!(
                "{} {} {} lots, order {}",
                side.as_str(),
                self.symbol,
                authorization.lot_size,
                broker_order_id
            ),
            data,
        )
        .await;

        state.current_lot_size = authorization.lot_size;
        self.ladder.advance(&mut state);
        self.save_account_state(&state).await;

        Ok(CycleOutcome::OrderPlaced {
            signal,
            broker_order_id,
            lot_size: authorization.lot_size,
        })
    }

    /// Close an open order through the account's session
    pub async fn close_trade(
        &self,
        broker_order_id: &str,
        volume: Option<f64>,
    ) -> Result<bool, CycleError> {
        let handle: SessionHandle = self.session.ensure_connected().await?;
        let closed = self
            .session
            .close_order(&handle, broker_order_id, volume)
            .await?;

        let (level, message) = if closed {
            (LogLevel::Info, format!("Order {} closed", broker_order_id))
        } else {
            (LogLevel::Warn, format!("Broker refused to close order {}", broker_order_id))
        };
        self.record(
            LogEvent::TradeClosed,
            level,
            message,
            json!({ "broker_order_id": broker_order_id, "volume": volume, "closed": closed }),
        )
        .await;

        Ok(closed)
    }

    pub async fn settle_closed_trade(
        &self,
        broker_order_id: &str,
        realized_profit: f64,
    ) -> Result<TradingAccountState, CycleError> {
        self.settle_closed_trade_at(broker_order_id, realized_profit, Utc::now())
            .await
    }

    /// Book the realised result of a closed trade against the ladder
    pub async fn settle_closed_trade_at(
        &self,
        broker_order_id: &str,
        realized_profit: f64,
        now: DateTime<Utc>,
    ) -> Result<TradingAccountState, CycleError> {
        let _account = self.account_lock.lock().await;
        let mut state = self.load_account_state(now).await?;
        let level_before = state.current_level;

        self.ladder.settle(&mut state, realized_profit, now.date_naive());
        self.store.save_account_state(&state).await?;

        self.record(
            LogEvent::TradeSettled,
            LogLevel::Info,
            format!(
                "Order {} settled with {:+.2}, balance ${:.2}",
                broker_order_id, realized_profit, state.current_balance
            ),
            json!({
                "broker_order_id": broker_order_id,
                "profit": realized_profit,
                "balance": state.current_balance,
                "level_before": level_before,
                "level_after": state.current_level,
                "daily_target_reached": state.daily_target_reached,
                "weekly_target_reached": state.weekly_target_reached,
                "monthly_target_reached": state.monthly_target_reached,
            }),
        )
        .await;

        Ok(state)
    }

    /// Stored state rolled to `now`, or a fresh account on the right rung
    async fn load_account_state(&self, now: DateTime<Utc>) -> Result<TradingAccountState, CycleError> {
        let today = now.date_naive();

        match self.store.load_account_state(&self.account_id).await? {
            Some(mut state) => {
                if self.ladder.roll_periods(&mut state, today) {
                    info!("🗓️  [{}] Profit periods rolled over", self.account_id);
                    self.save_account_state(&state).await;
                }
                Ok(state)
            }
            None => {
                let state = self
                    .ladder
                    .new_account(&self.account_id, self.initial_balance, today);
                info!(
                    "🆕 [{}] New account state at level {} (balance ${:.2})",
                    self.account_id, state.current_level, state.current_balance
                );
                self.save_account_state(&state).await;
                Ok(state)
            }
        }
    }

    async fn annotate(&self, signal: &mut TradingSignal) {
        let Some(advisor) = &self.advisor else {
            return;
        };
        match advisor.analyze(signal).await {
            Ok(text) => signal.annotate(&text),
            Err(e) => warn!("[{}] Advisory commentary unavailable: {:#}", self.account_id, e),
        }
    }

    async fn archive_candles(&self, candles: &[crate::models::Candle]) {
        let Some(archive) = &self.archive else {
            return;
        };
        if let Err(e) = archive
            .save_candles(&self.symbol, &self.timeframe, candles)
            .await
        {
            warn!("[{}] Failed to archive candles: {}", self.account_id, e);
            return;
        }
        if let Err(e) = archive
            .cleanup_old(&self.symbol, &self.timeframe, self.retention_hours)
            .await
        {
            warn!("[{}] Failed to trim candle archive: {}", self.account_id, e);
        }
    }

    async fn persist_signal(&self, signal: &TradingSignal) {
        if let Err(e) = self.store.save_signal(signal).await {
            error!("[{}] Failed to persist signal {}: {}", self.account_id, signal.id, e);
        }
    }

    async fn save_account_state(&self, state: &TradingAccountState) {
        if let Err(e) = self.store.save_account_state(state).await {
            error!("[{}] Failed to persist account state: {}", self.account_id, e);
        }
    }

    async fn record(
        &self,
        event: LogEvent,
        level: LogLevel,
        message: String,
        data: serde_json::Value,
    ) {
        let log = TradingLog::new(&self.account_id, event, level, message, data);
        if let Err(e) = self.store.append_log(&log).await {
            error!(
                "[{}] Failed to write {} log: {}",
                self.account_id,
                event.as_str(),
                e
            );
        }
    }
}

/// Malformed data is a data problem, everything else is connectivity
fn data_error(e: BrokerError) -> CycleError {
    match e {
        BrokerError::InvalidResponse(msg) => CycleError::DataUnavailable(msg),
        other => other.into(),
    }
}

fn signal_data(signal: &TradingSignal) -> serde_json::Value {
    json!({
        "signal_id": signal.id,
        "signal_type": signal.signal_type.as_str(),
        "strength": signal.strength.as_str(),
        "confidence": signal.confidence,
        "entry_price": signal.entry_price,
        "stop_loss": signal.stop_loss,
        "take_profit": signal.take_profit,
        "snapshot": signal.structure_snapshot,
    })
}
