// Core modules
pub mod config;
pub mod detection;
pub mod execution;
pub mod feed;
pub mod models;
pub mod sink;
pub mod stats;
pub mod stream;

// Re-export commonly used types
pub use config::{EngineConfig, StatsInterval, Timeframe};
pub use execution::GapEngine;
pub use models::*;
pub use sink::EventSink;
pub use stream::Supervisor;
