use chrono::{DateTime, Utc};

use super::CandleGroup;
use crate::models::{Candle, Polarity};

/// Raw gap found by the tracker, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub polarity: Polarity,
    pub gap_level: f64,
    pub gap_opening_bar_time: DateTime<Utc>,
    pub detection_bar_time: DateTime<Utc>,
    pub group_size_before_cleanup: usize,
}

/// Tracks candidate extremes since the last gap and detects external gaps
///
/// * Bullish gap: `candle.low > bullish_candidate_high` (lowest high of the group)
/// * Bearish gap: `candle.high < bearish_candidate_low` (highest low of the group)
///
/// Both tests use the candidates as they stood before the candle arrived.
#[derive(Debug, Clone, Default)]
pub struct CandidateTracker {
    group: CandleGroup,
}

impl CandidateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one accepted candle; returns a detection if it breaks a candidate
    ///
    /// Cleanup does not always reseed with the breakout candle. Bars after the
    /// opening bar that the breakout has not cleared stay in the group.
    pub fn ingest(&mut self, candle: &Candle) -> Option<Detection> {
        let Some((polarity, gap_level)) = self.breach(candle) else {
            self.group.push(candle.clone());
            return None;
        };

        let group_size_before_cleanup = self.group.len();
        let opening_bar = match polarity {
            Polarity::Bullish => self.group.earliest_with_high(gap_level),
            Polarity::Bearish => self.group.earliest_with_low(gap_level),
        };
        let gap_opening_bar_time = opening_bar
            .or_else(|| self.group.oldest())
            .map(|c| c.open_time)
            .unwrap_or(candle.open_time);

        // Drop the opening bar, everything before it, and any bar whose
        // extreme the breakout candle has already cleared
        let removed = self.group.remove_while(|bar| {
            bar.open_time <= gap_opening_bar_time
                || match polarity {
                    Polarity::Bullish => bar.high < candle.low,
                    Polarity::Bearish => bar.low > candle.high,
                }
        });

        if self.group.is_empty() {
            self.group.reseed(candle.clone());
        } else {
            self.group.push(candle.clone());
        }

        tracing::debug!(
            symbol = %candle.symbol,
            polarity = %polarity,
            removed,
            remaining = self.group.len(),
            "Group cleaned after gap"
        );

        Some(Detection {
            polarity,
            gap_level,
            gap_opening_bar_time,
            detection_bar_time: candle.close_time,
            group_size_before_cleanup,
        })
    }

    /// Highest low since the last gap
    pub fn bearish_candidate_low(&self) -> Option<f64> {
        self.group.bearish_candidate_low()
    }

    /// Lowest high since the last gap
    pub fn bullish_candidate_high(&self) -> Option<f64> {
        self.group.bullish_candidate_high()
    }

    pub fn group(&self) -> &CandleGroup {
        &self.group
    }

    /// Bullish is tested first; both cannot hold for a candle with `high >= low`
    fn breach(&self, candle: &Candle) -> Option<(Polarity, f64)> {
        if let Some(high) = self.group.bullish_candidate_high() {
            if candle.low > high {
                return Some((Polarity::Bullish, high));
            }
        }
        if let Some(low) = self.group.bearish_candidate_low() {
            if candle.high < low {
                return Some((Polarity::Bearish, low));
            }
        }
        None
    }
}
