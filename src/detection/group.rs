use crate::models::Candle;
use std::collections::VecDeque;

/// Ordered buffer of the candles accumulated since the last gap
///
/// Oldest first. The two candidate extremes are recomputed from the full buffer
/// after every mutation, so they can never drift from the candles actually held.
#[derive(Debug, Clone, Default)]
pub struct CandleGroup {
    candles: VecDeque<Candle>,
    bearish_candidate_low: Option<f64>,
    bullish_candidate_high: Option<f64>,
}

impl CandleGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candle at the newest end
    pub fn push(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        self.recompute();
    }

    /// Drop everything and start over from a single candle
    pub fn reseed(&mut self, candle: Candle) {
        self.candles.clear();
        self.candles.push_back(candle);
        self.recompute();
    }

    /// Remove candles from the oldest end while `predicate` holds
    ///
    /// Returns the number of candles removed.
    pub fn remove_while<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Candle) -> bool,
    {
        let mut removed = 0;
        while let Some(front) = self.candles.front() {
            if !predicate(front) {
                break;
            }
            self.candles.pop_front();
            removed += 1;
        }

        if removed > 0 {
            self.recompute();
        }
        removed
    }

    /// Highest low over the group
    pub fn bearish_candidate_low(&self) -> Option<f64> {
        self.bearish_candidate_low
    }

    /// Lowest high over the group
    pub fn bullish_candidate_high(&self) -> Option<f64> {
        self.bullish_candidate_high
    }

    /// Earliest candle whose high equals `level`
    pub fn earliest_with_high(&self, level: f64) -> Option<&Candle> {
        self.candles.iter().find(|c| c.high == level)
    }

    /// Earliest candle whose low equals `level`
    pub fn earliest_with_low(&self, level: f64) -> Option<&Candle> {
        self.candles.iter().find(|c| c.low == level)
    }

    pub fn oldest(&self) -> Option<&Candle> {
        self.candles.front()
    }

    pub fn newest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    fn recompute(&mut self) {
        self.bearish_candidate_low = self.candles.iter().map(|c| c.low).reduce(f64::max);
        self.bullish_candidate_high = self.candles.iter().map(|c| c.high).reduce(f64::min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_candle(minute: i64, low: f64, high: f64) -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + Duration::minutes(1) - Duration::milliseconds(1),
            open: low,
            high,
            low,
            close: high,
            is_closed: true,
        }
    }

    fn assert_candidates_match_full_recompute(group: &CandleGroup) {
        let max_low = group.iter().map(|c| c.low).fold(f64::NEG_INFINITY, f64::max);
        let min_high = group.iter().map(|c| c.high).fold(f64::INFINITY, f64::min);
        assert_eq!(group.bearish_candidate_low(), Some(max_low));
        assert_eq!(group.bullish_candidate_high(), Some(min_high));
    }

    #[test]
    fn test_new_group_has_no_candidates() {
        let group = CandleGroup::new();
        assert!(group.is_empty());
        assert_eq!(group.bearish_candidate_low(), None);
        assert_eq!(group.bullish_candidate_high(), None);
    }

    #[test]
    fn test_push_recomputes_extremes() {
        let mut group = CandleGroup::new();
        group.push(create_test_candle(1, 100.0, 105.0));
        group.push(create_test_candle(2, 102.0, 107.0));
        group.push(create_test_candle(3, 104.0, 108.0));

        assert_eq!(group.len(), 3);
        assert_eq!(group.bearish_candidate_low(), Some(104.0));
        assert_eq!(group.bullish_candidate_high(), Some(105.0));
        assert_candidates_match_full_recompute(&group);
    }

    #[test]
    fn test_remove_while_stops_at_first_mismatch() {
        let mut group = CandleGroup::new();
        group.push(create_test_candle(1, 100.0, 105.0));
        group.push(create_test_candle(2, 102.0, 107.0));
        group.push(create_test_candle(3, 90.0, 95.0));
        group.push(create_test_candle(4, 101.0, 103.0));

        let removed = group.remove_while(|c| c.low >= 100.0);

        assert_eq!(removed, 2);
        assert_eq!(group.len(), 2);
        assert_eq!(group.oldest().unwrap().low, 90.0);
        assert_eq!(group.newest().unwrap().low, 101.0);
        assert_candidates_match_full_recompute(&group);
    }

    #[test]
    fn test_remove_while_can_empty_group() {
        let mut group = CandleGroup::new();
        group.push(create_test_candle(1, 100.0, 105.0));
        group.push(create_test_candle(2, 102.0, 107.0));

        assert_eq!(group.remove_while(|_| true), 2);
        assert!(group.is_empty());
        assert_eq!(group.bearish_candidate_low(), None);
        assert_eq!(group.bullish_candidate_high(), None);
    }

    #[test]
    fn test_reseed_replaces_contents() {
        let mut group = CandleGroup::new();
        group.push(create_test_candle(1, 100.0, 105.0));
        group.push(create_test_candle(2, 102.0, 107.0));

        group.reseed(create_test_candle(3, 109.0, 112.0));

        assert_eq!(group.len(), 1);
        assert_eq!(group.bearish_candidate_low(), Some(109.0));
        assert_eq!(group.bullish_candidate_high(), Some(112.0));
    }

    #[test]
    fn test_earliest_extreme_lookup_prefers_oldest_on_ties() {
        let mut group = CandleGroup::new();
        group.push(create_test_candle(1, 100.0, 105.0));
        group.push(create_test_candle(2, 104.0, 105.0));
        group.push(create_test_candle(3, 104.0, 110.0));

        assert_eq!(group.earliest_with_high(105.0).unwrap().low, 100.0);
        let tied_low = group.earliest_with_low(104.0).unwrap();
        assert_eq!(tied_low.high, 105.0);
        assert!(group.earliest_with_low(50.0).is_none());
    }
}
