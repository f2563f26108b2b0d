// Connection lifecycle: reconnect policy and the candle loop
pub mod backoff;
pub mod supervisor;

pub use backoff::Backoff;
pub use supervisor::{ConnectionState, RunSummary, StopReason, Supervisor};
