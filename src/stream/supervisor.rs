use std::fmt;
use tokio::sync::watch;

use super::backoff::Backoff;
use crate::execution::GapEngine;
use crate::feed::{CandleNormalizer, CandleSource, NormalizeOutcome, RejectReason};
use crate::models::{Candle, OutputEvent, SessionStatus};
use crate::sink::EventSink;
use crate::stats::StatsTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Connected, waiting for the first aligned candle
    Connected,
    Aligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Shutdown => write!(f, "shutdown requested"),
            StopReason::Exhausted => write!(f, "feed exhausted"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub candles_received: u64,
    pub candles_accepted: u64,
    pub reconnects: u32,
    pub stop_reason: Option<StopReason>,
}

/// Drives one source through normalization and the engine, one candle at a time
pub struct Supervisor {
    symbol: String,
    engine: GapEngine,
    normalizer: CandleNormalizer,
    source: Box<dyn CandleSource>,
    sinks: Vec<Box<dyn EventSink>>,
    stats: Option<StatsTracker>,
    backoff: Backoff,
    state: ConnectionState,
    summary: RunSummary,
}

impl Supervisor {
    pub fn new(engine: GapEngine, source: Box<dyn CandleSource>) -> Self {
        let config = engine.config();
        let symbol = config.symbol.clone();
        let normalizer = CandleNormalizer::new(&symbol, config.timeframe);

        Self {
            symbol,
            engine,
            normalizer,
            source,
            sinks: Vec::new(),
            stats: None,
            backoff: Backoff::default(),
            state: ConnectionState::Disconnected,
            summary: RunSummary::default(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_stats(mut self, stats: StatsTracker) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn engine(&self) -> &GapEngine {
        &self.engine
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until the source is exhausted or `shutdown` flips to true
    ///
    /// Transport failures never end the run; they trigger a reconnect after the
    /// current backoff delay. A candle already being processed always completes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        tracing::info!(symbol = %self.symbol, source = self.source.name(), "Supervisor starting");
        self.publish(OutputEvent::Status {
            symbol: self.symbol.clone(),
            status: SessionStatus::Started,
        })
        .await;

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Shutdown;
            }

            if self.state == ConnectionState::Disconnected {
                let connected = tokio::select! {
                    biased;
                    _ = shutdown.changed() => break StopReason::Shutdown,
                    result = self.source.connect() => result,
                };

                match connected {
                    Ok(()) => {
                        self.state = ConnectionState::Connected;
                        self.normalizer.begin_session();
                        tracing::info!(symbol = %self.symbol, "Connected, waiting for aligned candle");
                    }
                    Err(e) => {
                        tracing::error!(symbol = %self.symbol, error = %e, "Connection failed");
                        if !self.wait_backoff(&mut shutdown).await {
                            break StopReason::Shutdown;
                        }
                        continue;
                    }
                }
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break StopReason::Shutdown,
                result = self.source.next_candle() => result,
            };

            match next {
                Ok(Some(candle)) => {
                    self.summary.candles_received += 1;
                    self.process_candle(&candle).await;
                }
                Ok(None) => break StopReason::Exhausted,
                Err(e) => {
                    tracing::error!(symbol = %self.symbol, error = %e, "Feed lost");
                    self.state = ConnectionState::Disconnected;
                    self.summary.reconnects += 1;
                    if !self.wait_backoff(&mut shutdown).await {
                        break StopReason::Shutdown;
                    }
                }
            }
        };

        tracing::info!(symbol = %self.symbol, reason = %reason, "Supervisor stopping");
        self.publish(OutputEvent::Status {
            symbol: self.symbol.clone(),
            status: SessionStatus::Stopped {
                reason: reason.to_string(),
            },
        })
        .await;

        self.summary.stop_reason = Some(reason);
        self.summary.clone()
    }

    /// Normalize one raw candle and, if accepted, run it through the engine
    pub async fn process_candle(&mut self, candle: &Candle) {
        let (first_of_session, discontinuity) = match self.normalizer.accept(candle) {
            NormalizeOutcome::Accepted {
                first_of_session,
                discontinuity,
            } => (first_of_session, discontinuity),
            NormalizeOutcome::Rejected(RejectReason::NotClosed) => return,
            NormalizeOutcome::Rejected(reason) => {
                tracing::warn!(symbol = %self.symbol, reason = %reason, "Candle rejected");
                return;
            }
        };

        self.summary.candles_accepted += 1;
        tracing::debug!(
            symbol = %self.symbol,
            open_time = %candle.open_time,
            close = candle.close,
            "Candle accepted"
        );

        if first_of_session {
            if self.backoff.attempts() > 0 {
                tracing::info!(symbol = %self.symbol, "Re-aligned after reconnect");
            }
            self.state = ConnectionState::Aligned;
            self.backoff.reset();
        }

        if let Some(gap) = discontinuity {
            tracing::warn!(
                symbol = %self.symbol,
                expected = %gap.expected_open,
                actual = %gap.actual_open,
                missing = gap.missing_candles,
                "⚠️  Gap in candle data"
            );
        }

        for event in self.engine.on_candle(candle) {
            if let Some(stats) = self.stats.as_mut() {
                stats.record(&event);
            }
            self.publish(event).await;
        }

        // Kline close times end one millisecond before the next open
        let closed_at = candle.close_time + chrono::Duration::milliseconds(1);
        let snapshot = self
            .stats
            .as_mut()
            .and_then(|stats| stats.poll(closed_at));
        if let Some((boundary, stats)) = snapshot {
            self.publish(OutputEvent::Stats {
                symbol: self.symbol.clone(),
                boundary,
                stats,
            })
            .await;
        }
    }

    async fn publish(&mut self, event: OutputEvent) {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.publish(&event).await {
                tracing::warn!(sink = sink.name(), error = %e, "Sink failed to publish event");
            }
        }
    }

    /// Sleep for the next backoff delay; false if shutdown arrived first
    async fn wait_backoff(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.backoff.next_delay();
        tracing::info!(
            symbol = %self.symbol,
            delay_secs = delay.as_secs(),
            attempt = self.backoff.attempts(),
            "Reconnecting after delay"
        );

        tokio::select! {
            biased;
            _ = shutdown.changed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
