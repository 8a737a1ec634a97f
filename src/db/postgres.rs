use super::TradingStore;
use crate::error::StoreError;
use crate::models::{
    LogEvent, LogLevel, MoneyManagementLevel, SignalStrength, SignalType, StructureSnapshot,
    TradingAccountState, TradingLog, TradingSignal,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

/// Postgres persistence for signals, logs, ladder and account state
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run embedded migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    fn signal_from_row(row: &PgRow) -> Result<TradingSignal, StoreError> {
        let signal_type: String = row.try_get("signal_type")?;
        let strength: String = row.try_get("strength")?;
        let snapshot: serde_json::Value = row.try_get("structure_snapshot")?;

        Ok(TradingSignal {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            timeframe: row.try_get("timeframe")?,
            signal_type: match signal_type.as_str() {
                "BUY" => SignalType::Buy,
                "SELL" => SignalType::Sell,
                "HOLD" => SignalType::Hold,
                other => return Err(StoreError::Corrupt(format!("signal type {}", other))),
            },
            strength: match strength.as_str() {
                "WEAK" => SignalStrength::Weak,
                "MODERATE" => SignalStrength::Moderate,
                "STRONG" => SignalStrength::Strong,
                "VERY_STRONG" => SignalStrength::VeryStrong,
                other => return Err(StoreError::Corrupt(format!("signal strength {}", other))),
            },
            entry_price: num(row, "entry_price")?,
            stop_loss: num(row, "stop_loss")?,
            take_profit: num(row, "take_profit")?,
            confidence: num(row, "confidence")?,
            structure_snapshot: serde_json::from_value::<StructureSnapshot>(snapshot)?,
            narrative: row.try_get("narrative")?,
            created_at: row.try_get("created_at")?,
            executed: row.try_get("executed")?,
            linked_trade_id: row.try_get("linked_trade_id")?,
        })
    }

    fn log_from_row(row: &PgRow) -> Result<TradingLog, StoreError> {
        let event: String = row.try_get("event_type")?;
        let level: String = row.try_get("level")?;

        Ok(TradingLog {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            event_type: serde_json::from_value::<LogEvent>(serde_json::Value::String(event))?,
            message: row.try_get("message")?,
            structured_data: row.try_get("structured_data")?,
            level: serde_json::from_value::<LogLevel>(serde_json::Value::String(level))?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

/// NUMERIC column as f64
fn num(row: &PgRow, column: &str) -> Result<f64, StoreError> {
    let value: Decimal = row.try_get(column)?;
    value
        .to_f64()
        .ok_or_else(|| StoreError::Corrupt(format!("{} out of range", column)))
}

fn dec(value: f64) -> Result<Decimal, StoreError> {
    Decimal::from_f64(value).ok_or_else(|| StoreError::Corrupt(format!("{} is not a number", value)))
}

#[async_trait]
impl TradingStore for PostgresStore {
    async fn save_signal(&self, signal: &TradingSignal) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trading_signals (
                id, symbol, timeframe, signal_type, strength, entry_price,
                stop_loss, take_profit, confidence, structure_snapshot,
                narrative, executed, linked_trade_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                executed = EXCLUDED.executed,
                linked_trade_id = EXCLUDED.linked_trade_id,
                narrative = EXCLUDED.narrative
            "#,
        )
        .bind(signal.id)
        .bind(&signal.symbol)
        .bind(&signal.timeframe)
        .bind(signal.signal_type.as_str())
        .bind(signal.strength.as_str())
        .bind(dec(signal.entry_price)?)
        .bind(dec(signal.stop_loss)?)
        .bind(dec(signal.take_profit)?)
        .bind(dec(signal.confidence)?)
        .bind(serde_json::to_value(&signal.structure_snapshot)?)
        .bind(&signal.narrative)
        .bind(signal.executed)
        .bind(signal.linked_trade_id.as_deref())
        .bind(signal.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved signal {} ({})", signal.id, signal.signal_type.as_str());
        Ok(())
    }

    async fn recent_signals(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<TradingSignal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, timeframe, signal_type, strength, entry_price,
                   stop_loss, take_profit, confidence, structure_snapshot,
                   narrative, executed, linked_trade_id, created_at
            FROM trading_signals
            WHERE symbol = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::signal_from_row).collect()
    }

    async fn append_log(&self, log: &TradingLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trading_logs (
                id, account_id, event_type, message, structured_data, level, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(&log.account_id)
        .bind(log.event_type.as_str())
        .bind(&log.message)
        .bind(&log.structured_data)
        .bind(log.level.as_str())
        .bind(log.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_logs(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<TradingLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, event_type, message, structured_data, level, timestamp
            FROM trading_logs
            WHERE account_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::log_from_row).collect()
    }

    async fn load_levels(&self) -> Result<Vec<MoneyManagementLevel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT level_index, balance_threshold, lot_size,
                   daily_target, weekly_target, monthly_target
            FROM money_management_levels
            ORDER BY balance_threshold ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<MoneyManagementLevel, StoreError> {
                let level_index: i32 = row.try_get("level_index")?;
                Ok(MoneyManagementLevel {
                    level_index: u32::try_from(level_index)
                        .map_err(|_| StoreError::Corrupt(format!("level index {}", level_index)))?,
                    balance_threshold: num(row, "balance_threshold")?,
                    lot_size: num(row, "lot_size")?,
                    daily_target: num(row, "daily_target")?,
                    weekly_target: num(row, "weekly_target")?,
                    monthly_target: num(row, "monthly_target")?,
                })
            })
            .collect()
    }

    async fn save_levels(&self, levels: &[MoneyManagementLevel]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM money_management_levels")
            .execute(&mut *tx)
            .await?;

        for level in levels {
            sqlx::query(
                r#"
                INSERT INTO money_management_levels (
                    level_index, balance_threshold, lot_size,
                    daily_target, weekly_target, monthly_target
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(level.level_index as i32)
            .bind(dec(level.balance_threshold)?)
            .bind(dec(level.lot_size)?)
            .bind(dec(level.daily_target)?)
            .bind(dec(level.weekly_target)?)
            .bind(dec(level.monthly_target)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!("Stored {} money management levels", levels.len());
        Ok(())
    }

    async fn load_account_state(
        &self,
        account_id: &str,
    ) -> Result<Option<TradingAccountState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT account_id, initial_balance, current_balance, current_level,
                   current_lot_size, daily_profit, weekly_profit, monthly_profit,
                   total_profit, last_trading_day, week_start_date, month_start_date,
                   daily_target_reached, weekly_target_reached, monthly_target_reached
            FROM trading_account_states
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let current_level: i32 = row.try_get("current_level")?;
        let last_trading_day: NaiveDate = row.try_get("last_trading_day")?;

        Ok(Some(TradingAccountState {
            account_id: row.try_get("account_id")?,
            initial_balance: num(&row, "initial_balance")?,
            current_balance: num(&row, "current_balance")?,
            current_level: current_level.max(0) as u32,
            current_lot_size: num(&row, "current_lot_size")?,
            daily_profit: num(&row, "daily_profit")?,
            weekly_profit: num(&row, "weekly_profit")?,
            monthly_profit: num(&row, "monthly_profit")?,
            total_profit: num(&row, "total_profit")?,
            last_trading_day,
            week_start_date: row.try_get("week_start_date")?,
            month_start_date: row.try_get("month_start_date")?,
            daily_target_reached: row.try_get("daily_target_reached")?,
            weekly_target_reached: row.try_get("weekly_target_reached")?,
            monthly_target_reached: row.try_get("monthly_target_reached")?,
        }))
    }

    async fn save_account_state(&self, state: &TradingAccountState) -> Result<(), StoreError> {
        let now: DateTime<Utc> = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO trading_account_states (
                account_id, initial_balance, current_balance, current_level,
                current_lot_size, daily_profit, weekly_profit, monthly_profit,
                total_profit, last_trading_day, week_start_date, month_start_date,
                daily_target_reached, weekly_target_reached, monthly_target_reached,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (account_id) DO UPDATE SET
                current_balance = EXCLUDED.current_balance,
                current_level = EXCLUDED.current_level,
                current_lot_size = EXCLUDED.current_lot_size,
                daily_profit = EXCLUDED.daily_profit,
                weekly_profit = EXCLUDED.weekly_profit,
                monthly_profit = EXCLUDED.monthly_profit,
                total_profit = EXCLUDED.total_profit,
                last_trading_day = EXCLUDED.last_trading_day,
                week_start_date = EXCLUDED.week_start_date,
                month_start_date = EXCLUDED.month_start_date,
                daily_target_reached = EXCLUDED.daily_target_reached,
                weekly_target_reached = EXCLUDED.weekly_target_reached,
                monthly_target_reached = EXCLUDED.monthly_target_reached,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state.account_id)
        .bind(dec(state.initial_balance)?)
        .bind(dec(state.current_balance)?)
        .bind(state.current_level as i32)
        .bind(dec(state.current_lot_size)?)
        .bind(dec(state.daily_profit)?)
        .bind(dec(state.weekly_profit)?)
        .bind(dec(state.monthly_profit)?)
        .bind(dec(state.total_profit)?)
        .bind(state.last_trading_day)
        .bind(state.week_start_date)
        .bind(state.month_start_date)
        .bind(state.daily_target_reached)
        .bind(state.weekly_target_reached)
        .bind(state.monthly_target_reached)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved account state for {} (level {}, balance ${:.2})",
            state.account_id,
            state.current_level,
            state.current_balance
        );
        Ok(())
    }
}
