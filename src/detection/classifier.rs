use super::Detection;
use crate::models::{GapEvent, PendingEntry, Polarity};

/// Per-symbol memory of previous gaps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapHistory {
    pub first_gap_detected: bool,
    pub first_gap_polarity: Option<Polarity>,
    pub last_gap_polarity: Option<Polarity>,
    pub last_gap_level: Option<f64>,
    pub current_sequence_number: u32,
    /// Sequence abandoned on the most recent reversal
    pub last_sequence_number: u32,
}

/// Annotate a detection against `history`
///
/// * First gap ever: sequence 1, never traded.
/// * Same polarity as the last gap: sequence continues.
/// * Opposite polarity: reversal, sequence resets to 1 and an entry is queued
///   in the direction of the new gap.
pub fn classify(
    history: &GapHistory,
    detection: &Detection,
    symbol: &str,
) -> (GapEvent, GapHistory, Option<PendingEntry>) {
    let polarity = detection.polarity;
    let mut next = history.clone();
    next.last_gap_level = Some(detection.gap_level);

    let (is_first_gap, is_reversal, prev_sequence_number) = match history.last_gap_polarity {
        _ if !history.first_gap_detected => {
            next.first_gap_detected = true;
            next.first_gap_polarity = Some(polarity);
            next.last_gap_polarity = Some(polarity);
            next.current_sequence_number = 1;
            (true, false, 0)
        }
        Some(last) if last == polarity => {
            next.current_sequence_number = history.current_sequence_number + 1;
            (false, false, 0)
        }
        _ => {
            next.last_sequence_number = history.current_sequence_number;
            next.current_sequence_number = 1;
            next.last_gap_polarity = Some(polarity);
            (false, true, history.current_sequence_number)
        }
    };

    let event = GapEvent {
        symbol: symbol.to_string(),
        polarity,
        gap_level: detection.gap_level,
        gap_opening_bar_time: detection.gap_opening_bar_time,
        detection_bar_time: detection.detection_bar_time,
        is_first_gap,
        is_reversal,
        sequence_number: next.current_sequence_number,
        group_size_before_cleanup: detection.group_size_before_cleanup,
        prev_gap_level: history.last_gap_level,
        prev_sequence_number,
    };

    let pending = is_reversal.then(|| PendingEntry {
        side: polarity.entry_side(),
        created_at: detection.detection_bar_time,
        gap_level: detection.gap_level,
        sequence_number: next.current_sequence_number,
    });

    (event, next, pending)
}

/// Owns the gap history for one symbol and applies [`classify`] in order
#[derive(Debug, Clone, Default)]
pub struct GapClassifier {
    history: GapHistory,
}

impl GapClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(
        &mut self,
        detection: &Detection,
        symbol: &str,
    ) -> (GapEvent, Option<PendingEntry>) {
        let (event, history, pending) = classify(&self.history, detection, symbol);
        self.history = history;

        if event.is_first_gap {
            tracing::info!(
                symbol,
                polarity = %event.polarity,
                level = event.gap_level,
                "First gap detected, waiting for reversal to start trading"
            );
        } else if event.is_reversal {
            tracing::info!(
                symbol,
                polarity = %event.polarity,
                level = event.gap_level,
                abandoned_sequence = event.prev_sequence_number,
                "Reversal gap detected, preparing entry"
            );
        } else {
            tracing::info!(
                symbol,
                polarity = %event.polarity,
                level = event.gap_level,
                sequence = event.sequence_number,
                "Continuation gap detected"
            );
        }

        (event, pending)
    }

    pub fn history(&self) -> &GapHistory {
        &self.history
    }
}
