// Trading cycle and its scheduler
pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{CycleOutcome, TradeOrchestrator};
pub use scheduler::{delay_until_boundary, Scheduler};
