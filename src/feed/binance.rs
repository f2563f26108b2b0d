//! Binance USDⓈ-M futures kline stream decoding.
//!
//! Accepts both the combined-stream envelope
//! (`{"stream": "btcusdt@kline_5m", "data": {...}}`) and the raw event.
//! Prices arrive as decimal strings.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::FeedError;
use crate::models::Candle;

pub const DEFAULT_WS_URL: &str = "wss://fstream.binance.com";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamMessage {
    Combined { data: KlineEvent },
    Raw(KlineEvent),
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: KlineData,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// Combined stream URL for one symbol and interval
pub fn stream_url(base: &str, symbol: &str, interval: &str) -> String {
    format!(
        "{}/stream?streams={}@kline_{}",
        base.trim_end_matches('/'),
        symbol.to_lowercase(),
        interval
    )
}

/// Decode one text frame
///
/// Returns `Ok(None)` for valid JSON that is not a kline event (subscription acks etc).
pub fn parse_kline_message(text: &str) -> Result<Option<Candle>, FeedError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FeedError::Decode(e.to_string()))?;

    let Ok(message) = serde_json::from_value::<StreamMessage>(value) else {
        return Ok(None);
    };
    let event = match message {
        StreamMessage::Combined { data } => data,
        StreamMessage::Raw(event) => event,
    };
    if event.event_type != "kline" {
        return Ok(None);
    }

    to_candle(event.kline).map(Some)
}

fn to_candle(kline: KlineData) -> Result<Candle, FeedError> {
    let open_time = timestamp(kline.open_time)?;
    let close_time = timestamp(kline.close_time)?;

    Ok(Candle {
        symbol: kline.symbol.to_uppercase(),
        open_time,
        close_time,
        open: price(&kline.open, "open")?,
        high: price(&kline.high, "high")?,
        low: price(&kline.low, "low")?,
        close: price(&kline.close, "close")?,
        is_closed: kline.is_closed,
    })
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, FeedError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| FeedError::Decode(format!("timestamp out of range: {}", millis)))
}

fn price(raw: &str, field: &str) -> Result<f64, FeedError> {
    raw.parse::<f64>()
        .map_err(|_| FeedError::Decode(format!("invalid {} price '{}'", field, raw)))
}
