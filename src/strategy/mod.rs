// Signal fusion
pub mod fusion;

pub use fusion::{strength_for, FusionInput, SignalFusionEngine};
