// Technical indicators
pub mod atr;

pub use atr::calculate_atr;
