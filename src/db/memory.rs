use super::TradingStore;
use crate::error::StoreError;
use crate::models::{MoneyManagementLevel, TradingAccountState, TradingLog, TradingSignal};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    signals: Vec<TradingSignal>,
    logs: Vec<TradingLog>,
    levels: Vec<MoneyManagementLevel>,
    accounts: HashMap<String, TradingAccountState>,
}

/// In-process store, used when no database is configured
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradingStore for MemoryStore {
    async fn save_signal(&self, signal: &TradingSignal) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.signals.iter_mut().find(|s| s.id == signal.id) {
            Some(existing) => *existing = signal.clone(),
            None => tables.signals.push(signal.clone()),
        }
        Ok(())
    }

    async fn recent_signals(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<TradingSignal>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .signals
            .iter()
            .rev()
            .filter(|s| s.symbol == symbol)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_log(&self, log: &TradingLog) -> Result<(), StoreError> {
        self.tables.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn recent_logs(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<TradingLog>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .logs
            .iter()
            .rev()
            .filter(|l| l.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn load_levels(&self) -> Result<Vec<MoneyManagementLevel>, StoreError> {
        Ok(self.tables.read().await.levels.clone())
    }

    async fn save_levels(&self, levels: &[MoneyManagementLevel]) -> Result<(), StoreError> {
        let mut sorted = levels.to_vec();
        sorted.sort_by(|a, b| a.balance_threshold.total_cmp(&b.balance_threshold));
        self.tables.write().await.levels = sorted;
        Ok(())
    }

    async fn load_account_state(
        &self,
        account_id: &str,
    ) -> Result<Option<TradingAccountState>, StoreError> {
        Ok(self.tables.read().await.accounts.get(account_id).cloned())
    }

    async fn save_account_state(&self, state: &TradingAccountState) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .accounts
            .insert(state.account_id.clone(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_ladder;
    use crate::models::{LogEvent, LogLevel};
    use crate::risk::MoneyManagementLadder;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_logs_newest_first_per_account() {
        let store = MemoryStore::new();
        for (account, message) in [("a", "first"), ("b", "other"), ("a", "second")] {
            let log = TradingLog::new(
                account,
                LogEvent::SignalGenerated,
                LogLevel::Info,
                message,
                serde_json::json!({}),
            );
            store.append_log(&log).await.unwrap();
        }

        let logs = store.recent_logs("a", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "second");
    }

    #[tokio::test]
    async fn test_account_state_upsert() {
        let store = MemoryStore::new();
        let ladder = MoneyManagementLadder::new(default_ladder()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        let mut state = ladder.new_account("demo", 500.0, today);
        store.save_account_state(&state).await.unwrap();
        state.current_balance = 750.0;
        store.save_account_state(&state).await.unwrap();

        let loaded = store.load_account_state("demo").await.unwrap().unwrap();
        assert_eq!(loaded.current_balance, 750.0);
        assert!(store.load_account_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_levels_stored_sorted() {
        let store = MemoryStore::new();
        let mut levels = default_ladder();
        levels.reverse();
        store.save_levels(&levels).await.unwrap();

        let loaded = store.load_levels().await.unwrap();
        assert_eq!(loaded[0].balance_threshold, 0.0);
    }
}
