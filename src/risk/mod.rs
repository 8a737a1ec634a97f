// Money management
pub mod ladder;

pub use ladder::{Authorization, MoneyManagementLadder};
