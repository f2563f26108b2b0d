use chrono::{DateTime, Duration, Utc};

use super::position_manager::PositionManager;
use crate::config::{ConfigError, EngineConfig};
use crate::detection::{CandidateTracker, GapClassifier, GapHistory};
use crate::models::{Candle, CloseReason, OutputEvent, PendingEntry, Position};

/// Gap detection and position handling for one symbol/timeframe
///
/// Accepted candles go through three steps, always in this order:
/// 1. expiry check of the open position at the candle's close
/// 2. execution of the entry queued by the previous candle, at this candle's open
/// 3. gap detection and classification, which may queue a new entry
pub struct GapEngine {
    config: EngineConfig,
    tracker: CandidateTracker,
    classifier: GapClassifier,
    positions: PositionManager,
    pending: Option<PendingEntry>,
    expiry: Duration,
}

impl GapEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let expiry = config.try_expiry()?;

        tracing::info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            notional_usd = config.notional_usd,
            "Gap engine initialized"
        );

        Ok(Self {
            positions: PositionManager::new(&config),
            tracker: CandidateTracker::new(),
            classifier: GapClassifier::new(),
            pending: None,
            expiry,
            config,
        })
    }

    /// Process one accepted candle, using its close as the expiry price
    pub fn on_candle(&mut self, candle: &Candle) -> Vec<OutputEvent> {
        self.on_candle_marked(candle, None)
    }

    /// Process one accepted candle with an optional external mark price for expiry
    pub fn on_candle_marked(&mut self, candle: &Candle, mark_price: Option<f64>) -> Vec<OutputEvent> {
        let mut events = Vec::new();

        self.check_expiry(candle, mark_price, &mut events);
        self.execute_pending(candle, &mut events);
        self.detect(candle, &mut events);

        events
    }

    /// Close whatever is open at `mark_price`, e.g. on operator request
    pub fn close_all(&mut self, mark_price: f64, time: DateTime<Utc>) -> Vec<OutputEvent> {
        self.pending = None;
        match self.positions.close_position(mark_price, time, CloseReason::Manual) {
            Ok(Some(result)) => vec![OutputEvent::PositionClosed(result)],
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(symbol = %self.config.symbol, error = %e, "Manual close skipped");
                Vec::new()
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pending_entry(&self) -> Option<&PendingEntry> {
        self.pending.as_ref()
    }

    pub fn open_position(&self) -> Option<&Position> {
        self.positions.open_position()
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn tracker(&self) -> &CandidateTracker {
        &self.tracker
    }

    pub fn gap_history(&self) -> &GapHistory {
        self.classifier.history()
    }

    fn check_expiry(&mut self, candle: &Candle, mark_price: Option<f64>, events: &mut Vec<OutputEvent>) {
        let exit_price = mark_price.unwrap_or(candle.close);
        match self
            .positions
            .check_expiry(candle.close_time, exit_price, self.expiry)
        {
            Ok(Some(result)) => events.push(OutputEvent::PositionClosed(result)),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                symbol = %candle.symbol,
                error = %e,
                "Expiry check skipped for this candle"
            ),
        }
    }

    // The pending entry is consumed whether or not it executes
    fn execute_pending(&mut self, candle: &Candle, events: &mut Vec<OutputEvent>) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match self.positions.execute_entry(&pending, candle.open, candle.open_time) {
            Ok(outcome) => {
                if let Some(closed) = outcome.closed {
                    events.push(OutputEvent::PositionClosed(closed));
                }
                if let Some(position) = outcome.opened {
                    events.push(OutputEvent::PositionOpened {
                        position,
                        gap_level: pending.gap_level,
                        sequence_number: pending.sequence_number,
                    });
                }
            }
            Err(e) => tracing::warn!(
                symbol = %candle.symbol,
                side = %pending.side,
                error = %e,
                "Pending entry dropped"
            ),
        }
    }

    fn detect(&mut self, candle: &Candle, events: &mut Vec<OutputEvent>) {
        let Some(detection) = self.tracker.ingest(candle) else {
            return;
        };

        let (event, pending) = self.classifier.classify(&detection, &self.config.symbol);
        if let Some(pending) = pending {
            tracing::debug!(
                symbol = %candle.symbol,
                side = %pending.side,
                "Entry queued for next candle open"
            );
            self.pending = Some(pending);
        }
        events.push(OutputEvent::Gap(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Polarity, Side};
    use chrono::{Duration, TimeZone};

    fn create_test_engine() -> GapEngine {
        let config = EngineConfig::new("BTCUSDT", "1m".parse().unwrap());
        GapEngine::new(config).unwrap()
    }

    fn create_test_candle(minute: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
            open,
            high,
            low,
            close,
            is_closed: true,
        }
    }

    fn gaps(events: &[OutputEvent]) -> Vec<&crate::models::GapEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Gap(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.notional_usd = 0.0;
        assert!(GapEngine::new(config).is_err());
    }

    #[test]
    fn test_new_rejects_out_of_range_expiry() {
        let mut config = EngineConfig::new("BTCUSDT", "1m".parse().unwrap());
        config.expiry_secs = i64::MAX / 10;
        assert!(matches!(
            GapEngine::new(config),
            Err(ConfigError::InvalidExpiry(_))
        ));
    }

    #[test]
    fn test_first_gap_emits_event_without_trade() {
        let mut engine = create_test_engine();
        engine.on_candle(&create_test_candle(1, 101.0, 105.0, 100.0, 104.0));
        engine.on_candle(&create_test_candle(2, 104.0, 107.0, 102.0, 106.0));
        engine.on_candle(&create_test_candle(3, 106.0, 108.0, 104.0, 107.0));

        let events = engine.on_candle(&create_test_candle(4, 110.0, 112.0, 109.0, 111.0));

        let found = gaps(&events);
        assert_eq!(found.len(), 1);
        assert!(found[0].is_first_gap);
        assert_eq!(found[0].polarity, Polarity::Bullish);
        assert!(engine.pending_entry().is_none());
        assert!(engine.open_position().is_none());
    }

    #[test]
    fn test_reversal_enters_on_next_open() {
        let mut engine = create_test_engine();
        engine.on_candle(&create_test_candle(1, 101.0, 105.0, 100.0, 104.0));
        engine.on_candle(&create_test_candle(2, 104.0, 107.0, 102.0, 106.0));
        engine.on_candle(&create_test_candle(3, 106.0, 108.0, 104.0, 107.0));
        engine.on_candle(&create_test_candle(4, 110.0, 112.0, 109.0, 111.0)); // bullish, first

        let events = engine.on_candle(&create_test_candle(5, 100.0, 104.0, 95.0, 96.0));
        let found = gaps(&events);
        assert_eq!(found.len(), 1);
        assert!(found[0].is_reversal);
        assert_eq!(found[0].polarity, Polarity::Bearish);
        assert_eq!(engine.pending_entry().unwrap().side, Side::Short);
        assert!(engine.open_position().is_none());

        let events = engine.on_candle(&create_test_candle(6, 97.0, 98.0, 94.0, 95.0));
        let opened = events.iter().find_map(|e| match e {
            OutputEvent::PositionOpened { position, .. } => Some(position),
            _ => None,
        });
        let opened = opened.unwrap();
        assert_eq!(opened.side, Side::Short);
        assert_eq!(opened.entry_price, 97.0);
        assert_eq!(opened.entry_time, create_test_candle(6, 0.0, 0.0, 0.0, 0.0).open_time);
        assert!(engine.pending_entry().is_none());
    }

    #[test]
    fn test_invalid_open_drops_pending_entry() {
        let mut engine = create_test_engine();
        engine.on_candle(&create_test_candle(1, 101.0, 105.0, 100.0, 104.0));
        engine.on_candle(&create_test_candle(2, 110.0, 112.0, 109.0, 111.0)); // bullish, first
        engine.on_candle(&create_test_candle(3, 100.0, 104.0, 95.0, 96.0)); // bearish reversal
        assert!(engine.pending_entry().is_some());

        let events = engine.on_candle(&create_test_candle(4, 0.0, 98.0, 94.0, 95.0));

        assert!(!events
            .iter()
            .any(|e| matches!(e, OutputEvent::PositionOpened { .. })));
        assert!(engine.pending_entry().is_none());
        assert!(engine.open_position().is_none());
    }

    #[test]
    fn test_invalid_open_still_detects_gap() {
        let mut engine = create_test_engine();
        engine.on_candle(&create_test_candle(1, 101.0, 105.0, 100.0, 104.0));
        engine.on_candle(&create_test_candle(2, 110.0, 112.0, 109.0, 111.0)); // bullish, first
        engine.on_candle(&create_test_candle(3, 100.0, 104.0, 95.0, 96.0)); // bearish reversal
        assert_eq!(engine.pending_entry().unwrap().side, Side::Short);
        assert_eq!(engine.tracker().bullish_candidate_high(), Some(104.0));

        // zero open, but low clears the lowest high of the group
        let candle = create_test_candle(4, 0.0, 112.0, 109.0, 111.0);
        let events = engine.on_candle(&candle);

        assert!(!events
            .iter()
            .any(|e| matches!(e, OutputEvent::PositionOpened { .. })));
        assert!(engine.open_position().is_none());

        let found = gaps(&events);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].polarity, Polarity::Bullish);
        assert!(found[0].is_reversal);
        assert_eq!(found[0].gap_level, 104.0);

        let group = engine.tracker().group();
        assert_eq!(group.len(), 1);
        assert_eq!(group.iter().last().map(|c| c.open_time), Some(candle.open_time));
        assert_eq!(engine.tracker().bearish_candidate_low(), Some(109.0));
        // the short was dropped; the new reversal queues a long for the next open
        assert_eq!(engine.pending_entry().map(|p| p.side), Some(Side::Long));
    }

    #[test]
    fn test_close_all_reports_manual_close() {
        let mut engine = create_test_engine();
        engine.on_candle(&create_test_candle(1, 101.0, 105.0, 100.0, 104.0));
        engine.on_candle(&create_test_candle(2, 110.0, 112.0, 109.0, 111.0));
        engine.on_candle(&create_test_candle(3, 100.0, 104.0, 95.0, 96.0));
        engine.on_candle(&create_test_candle(4, 97.0, 98.0, 94.0, 95.0));
        assert!(engine.open_position().is_some());

        let time = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let events = engine.close_all(90.0, time);

        assert_eq!(events.len(), 1);
        match &events[0] {
            OutputEvent::PositionClosed(result) => {
                assert_eq!(result.close_reason, CloseReason::Manual);
                assert_eq!(result.exit_price, 90.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(engine.open_position().is_none());
        assert!(engine.close_all(90.0, time).is_empty());
    }
}
