use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::binance::{parse_kline_message, stream_url, DEFAULT_WS_URL};
use super::FeedError;
use crate::config::Timeframe;
use crate::models::Candle;

/// Anything that yields kline updates for a single symbol
///
/// `next_candle` returning `Ok(None)` means the source is exhausted for good;
/// an `Err` means the connection was lost and `connect` should be retried.
#[async_trait]
pub trait CandleSource: Send {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), FeedError>;

    async fn next_candle(&mut self) -> Result<Option<Candle>, FeedError>;
}

/// Replays a JSON-lines file of candles or raw Binance kline messages
pub struct ReplaySource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_number: usize,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            line_number: 0,
        }
    }

    fn decode_line(line: &str) -> Result<Option<Candle>, FeedError> {
        if let Ok(candle) = serde_json::from_str::<Candle>(line) {
            return Ok(Some(candle));
        }
        parse_kline_message(line)
    }
}

#[async_trait]
impl CandleSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        // Reconnecting resumes where the reader stopped
        if self.lines.is_some() {
            return Ok(());
        }
        let file = File::open(&self.path).await?;
        self.lines = Some(BufReader::new(file).lines());
        tracing::info!(path = %self.path.display(), "Replay file opened");
        Ok(())
    }

    async fn next_candle(&mut self) -> Result<Option<Candle>, FeedError> {
        let Some(lines) = self.lines.as_mut() else {
            return Err(FeedError::NotConnected);
        };

        while let Some(line) = lines.next_line().await? {
            self.line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match Self::decode_line(trimmed) {
                Ok(Some(candle)) => return Ok(Some(candle)),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(line = self.line_number, error = %e, "Skipping undecodable replay line");
                }
            }
        }

        Ok(None)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live kline stream from Binance futures
pub struct BinanceKlineSource {
    url: String,
    idle_timeout: Duration,
    stream: Option<WsStream>,
}

impl BinanceKlineSource {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self::with_base_url(DEFAULT_WS_URL, symbol, timeframe)
    }

    pub fn with_base_url(base_url: &str, symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            url: stream_url(base_url, symbol, &timeframe.as_binance_interval()),
            idle_timeout: Duration::from_secs(60),
            stream: None,
        }
    }

    /// Treat the connection as dead when nothing arrives for this long
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CandleSource for BinanceKlineSource {
    fn name(&self) -> &str {
        "binance"
    }

    async fn connect(&mut self) -> Result<(), FeedError> {
        self.stream = None;
        tracing::info!(url = %self.url, "Connecting to kline stream...");

        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        self.stream = Some(stream);

        tracing::info!("✓ Kline stream connected");
        Ok(())
    }

    async fn next_candle(&mut self) -> Result<Option<Candle>, FeedError> {
        let idle_timeout = self.idle_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(FeedError::NotConnected);
        };

        loop {
            let message = match tokio::time::timeout(idle_timeout, stream.next()).await {
                Err(_) => {
                    self.stream = None;
                    return Err(FeedError::Timeout(idle_timeout));
                }
                Ok(None) => {
                    self.stream = None;
                    return Err(FeedError::Disconnected("stream ended".to_string()));
                }
                Ok(Some(Err(e))) => {
                    self.stream = None;
                    return Err(FeedError::WebSocket(e.to_string()));
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => match parse_kline_message(&text) {
                    Ok(Some(candle)) => return Ok(Some(candle)),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable kline message");
                    }
                },
                Message::Close(frame) => {
                    self.stream = None;
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "close frame".to_string());
                    return Err(FeedError::Disconnected(reason));
                }
                // Pongs are answered by tungstenite
                _ => continue,
            }
        }
    }
}
