// Simulated position handling and the per-candle engine
pub mod engine;
pub mod position_manager;

pub use engine::GapEngine;
pub use position_manager::{Cumulative, EntryOutcome, PositionManager, PriceError};
