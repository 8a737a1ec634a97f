// Persistence: signals, trading logs, ladder levels, account state
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::StoreError;
use crate::models::{MoneyManagementLevel, TradingAccountState, TradingLog, TradingSignal};
use async_trait::async_trait;

#[async_trait]
pub trait TradingStore: Send + Sync {
    /// Insert or update (executed flag, trade link, narrative) a signal
    async fn save_signal(&self, signal: &TradingSignal) -> Result<(), StoreError>;

    /// Newest first
    async fn recent_signals(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<TradingSignal>, StoreError>;

    async fn append_log(&self, log: &TradingLog) -> Result<(), StoreError>;

    /// Newest first
    async fn recent_logs(&self, account_id: &str, limit: usize)
        -> Result<Vec<TradingLog>, StoreError>;

    /// Ladder rungs sorted by threshold; empty when none are stored
    async fn load_levels(&self) -> Result<Vec<MoneyManagementLevel>, StoreError>;

    /// Replace the stored ladder
    async fn save_levels(&self, levels: &[MoneyManagementLevel]) -> Result<(), StoreError>;

    async fn load_account_state(
        &self,
        account_id: &str,
    ) -> Result<Option<TradingAccountState>, StoreError>;

    async fn save_account_state(&self, state: &TradingAccountState) -> Result<(), StoreError>;
}
