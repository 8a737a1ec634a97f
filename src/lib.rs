// Core modules
pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod ict;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod strategy;

// Re-export commonly used types
pub use error::{BrokerError, CycleError, StoreError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
