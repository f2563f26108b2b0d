// Market data: kline sources and candle normalization
pub mod binance;
pub mod normalizer;
pub mod source;

use std::time::Duration;
use thiserror::Error;

pub use normalizer::{CandleNormalizer, Discontinuity, NormalizeOutcome, RejectReason};
pub use source::{BinanceKlineSource, CandleSource, ReplaySource};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("source is not connected")]
    NotConnected,

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
