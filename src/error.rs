use thiserror::Error;

use crate::models::LogEvent;

/// Errors returned by broker collaborators
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("credentials rejected: {0}")]
    Unauthorized(String),

    #[error("broker call timed out after {0}s")]
    Timeout(u64),

    #[error("unexpected broker response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BrokerError::Timeout(0)
        } else if e.is_decode() {
            BrokerError::InvalidResponse(e.to_string())
        } else {
            BrokerError::Unreachable(e.to_string())
        }
    }
}

/// Errors returned by the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Why a trading cycle ended early
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("persistence: {0}")]
    Persistence(String),
}

impl CycleError {
    /// Log event recorded when a cycle ends with this error
    pub fn log_event(&self) -> LogEvent {
        match self {
            CycleError::OrderRejected(_) => LogEvent::OrderRejected,
            _ => LogEvent::CycleAborted,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Connectivity(_) => "CONNECTIVITY",
            CycleError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            CycleError::OrderRejected(_) => "ORDER_REJECTED",
            CycleError::Persistence(_) => "PERSISTENCE",
        }
    }
}

impl From<BrokerError> for CycleError {
    fn from(e: BrokerError) -> Self {
        CycleError::Connectivity(e.to_string())
    }
}

impl From<StoreError> for CycleError {
    fn from(e: StoreError) -> Self {
        CycleError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_errors_are_connectivity() {
        let err: CycleError = BrokerError::Timeout(10).into();
        assert!(matches!(err, CycleError::Connectivity(_)));
        assert_eq!(err.log_event(), LogEvent::CycleAborted);
    }

    #[test]
    fn test_rejection_has_own_event() {
        let err = CycleError::OrderRejected("market closed".to_string());
        assert_eq!(err.log_event(), LogEvent::OrderRejected);
        assert_eq!(err.kind(), "ORDER_REJECTED");
    }
}
