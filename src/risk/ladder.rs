use crate::models::{MoneyManagementLevel, TradingAccountState};
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Answer to "may this account trade now, and how big?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub permitted: bool,
    pub lot_size: f64,
    pub reason: Option<String>,
}

/// Progressive bankroll ladder
///
/// Lot size grows as the balance climbs through the rungs. Each rung carries
/// daily/weekly/monthly profit targets; once one is reached the account stops
/// trading until that period rolls over. Levels never drop automatically.
#[derive(Debug, Clone)]
pub struct MoneyManagementLadder {
    levels: Vec<MoneyManagementLevel>,
}

impl MoneyManagementLadder {
    pub fn new(mut levels: Vec<MoneyManagementLevel>) -> Result<Self> {
        if levels.is_empty() {
            anyhow::bail!("money management ladder needs at least one level");
        }
        levels.sort_by(|a, b| a.balance_threshold.total_cmp(&b.balance_threshold));
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[MoneyManagementLevel] {
        &self.levels
    }

    /// Highest rung whose threshold is <= balance (first rung below all thresholds)
    pub fn level_for_balance(&self, balance: f64) -> &MoneyManagementLevel {
        self.levels
            .iter()
            .rev()
            .find(|l| l.balance_threshold <= balance)
            .unwrap_or(&self.levels[0])
    }

    fn level_by_index(&self, level_index: u32) -> Option<&MoneyManagementLevel> {
        self.levels.iter().find(|l| l.level_index == level_index)
    }

    /// Rung currently in force: the stored level, or a higher one the balance already qualifies for
    pub fn active_level(&self, state: &TradingAccountState) -> &MoneyManagementLevel {
        let by_balance = self.level_for_balance(state.current_balance);
        match self.level_by_index(state.current_level) {
            Some(current) if current.balance_threshold >= by_balance.balance_threshold => current,
            _ => by_balance,
        }
    }

    pub fn new_account(
        &self,
        account_id: &str,
        initial_balance: f64,
        today: NaiveDate,
    ) -> TradingAccountState {
        let level = self.level_for_balance(initial_balance);
        TradingAccountState {
            account_id: account_id.to_string(),
            initial_balance,
            current_balance: initial_balance,
            current_level: level.level_index,
            current_lot_size: level.lot_size,
            daily_profit: 0.0,
            weekly_profit: 0.0,
            monthly_profit: 0.0,
            total_profit: 0.0,
            last_trading_day: today,
            week_start_date: week_start(today),
            month_start_date: month_start(today),
            daily_target_reached: false,
            weekly_target_reached: false,
            monthly_target_reached: false,
        }
    }

    pub fn authorize(&self, state: &TradingAccountState) -> Authorization {
        let refusal = if state.daily_target_reached {
            Some("daily target reached")
        } else if state.weekly_target_reached {
            Some("weekly target reached")
        } else if state.monthly_target_reached {
            Some("monthly target reached")
        } else {
            None
        };

        match refusal {
            Some(reason) => Authorization {
                permitted: false,
                lot_size: 0.0,
                reason: Some(reason.to_string()),
            },
            None => Authorization {
                permitted: true,
                lot_size: self.active_level(state).lot_size,
                reason: None,
            },
        }
    }

    /// Reset counters for any period that ended before `today`. Returns whether anything changed.
    pub fn roll_periods(&self, state: &mut TradingAccountState, today: NaiveDate) -> bool {
        let mut changed = false;

        if state.last_trading_day != today {
            state.daily_profit = 0.0;
            state.daily_target_reached = false;
            state.last_trading_day = today;
            changed = true;
        }

        let week = week_start(today);
        if state.week_start_date != week {
            state.weekly_profit = 0.0;
            state.weekly_target_reached = false;
            state.week_start_date = week;
            changed = true;
        }

        let month = month_start(today);
        if state.month_start_date != month {
            state.monthly_profit = 0.0;
            state.monthly_target_reached = false;
            state.month_start_date = month;
            changed = true;
        }

        changed
    }

    /// Book a realised profit (or loss) against the account
    pub fn settle(&self, state: &mut TradingAccountState, profit: f64, today: NaiveDate) {
        self.roll_periods(state, today);

        // Targets of the rung the trade was taken on
        let rung = self.active_level(state).clone();

        state.current_balance += profit;
        state.daily_profit += profit;
        state.weekly_profit += profit;
        state.monthly_profit += profit;
        state.total_profit += profit;

        state.daily_target_reached = reached(state.daily_profit, rung.daily_target);
        state.weekly_target_reached = reached(state.weekly_profit, rung.weekly_target);
        state.monthly_target_reached = reached(state.monthly_profit, rung.monthly_target);

        self.advance(state);
    }

    /// Move up when the balance reaches a higher rung. Returns whether the level changed.
    pub fn advance(&self, state: &mut TradingAccountState) -> bool {
        let target = self.level_for_balance(state.current_balance);
        let current_threshold = self
            .level_by_index(state.current_level)
            .map(|l| l.balance_threshold)
            .unwrap_or(f64::NEG_INFINITY);

        if target.balance_threshold > current_threshold {
            info!(
                "📈 Account {} advanced to level {} (lot {:.2}, balance ${:.2})",
                state.account_id, target.level_index, target.lot_size, state.current_balance
            );
            state.current_level = target.level_index;
            state.current_lot_size = target.lot_size;
            true
        } else {
            false
        }
    }
}

fn reached(profit: f64, target: f64) -> bool {
    target > 0.0 && profit >= target
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}
