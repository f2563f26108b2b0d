use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::StatsInterval;
use crate::models::{GapEvent, OutputEvent, Polarity, TradeResult, TradeStatus};

/// Aggregate gap and trade statistics over a time window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapStatistics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    // Gaps
    pub bullish_gaps: u32,
    pub bearish_gaps: u32,
    pub reversals: u32,
    pub avg_gap_interval_minutes: Option<f64>,
    pub current_trend: Option<Polarity>,
    pub current_sequence: u32,

    // Trades
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64, // percent
    pub avg_winning_trade: f64,
    pub avg_losing_trade: f64,
    pub net_pnl: f64,
    pub total_fees: f64,
    pub volume_usd: f64,
    /// Running total from the latest closed trade, if any
    pub cumulative_pnl: Option<f64>,
}

impl GapStatistics {
    /// Summarize the gaps and trades that fall in `(window_start, window_end]`
    ///
    /// Trend and sequence come from the latest gap at or before `window_end`,
    /// even if it is older than the window.
    pub fn compute<'a, G, T>(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        gaps: G,
        trades: T,
    ) -> Self
    where
        G: IntoIterator<Item = &'a GapEvent>,
        T: IntoIterator<Item = &'a TradeResult>,
    {
        let in_window = |t: DateTime<Utc>| t > window_start && t <= window_end;

        let mut stats = Self {
            window_start,
            window_end,
            bullish_gaps: 0,
            bearish_gaps: 0,
            reversals: 0,
            avg_gap_interval_minutes: None,
            current_trend: None,
            current_sequence: 0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            avg_winning_trade: 0.0,
            avg_losing_trade: 0.0,
            net_pnl: 0.0,
            total_fees: 0.0,
            volume_usd: 0.0,
            cumulative_pnl: None,
        };

        let mut gap_times = Vec::new();
        for gap in gaps {
            if gap.detection_bar_time > window_end {
                continue;
            }
            stats.current_trend = Some(gap.polarity);
            stats.current_sequence = gap.sequence_number;

            if !in_window(gap.detection_bar_time) {
                continue;
            }
            match gap.polarity {
                Polarity::Bullish => stats.bullish_gaps += 1,
                Polarity::Bearish => stats.bearish_gaps += 1,
            }
            if gap.is_reversal {
                stats.reversals += 1;
            }
            gap_times.push(gap.detection_bar_time);
        }

        if let (Some(first), Some(last)) = (gap_times.first(), gap_times.last()) {
            if gap_times.len() > 1 {
                let span = (*last - *first).num_seconds() as f64 / 60.0;
                stats.avg_gap_interval_minutes = Some(span / (gap_times.len() - 1) as f64);
            }
        }

        let mut wins = Vec::new();
        let mut losses = Vec::new();
        for trade in trades {
            if !in_window(trade.close_time) {
                continue;
            }
            stats.total_trades += 1;
            stats.net_pnl += trade.net_pnl;
            stats.total_fees += trade.total_fees;
            stats.volume_usd += trade.notional_usd;
            stats.cumulative_pnl = Some(trade.cumulative_pnl);
            match trade.status {
                TradeStatus::Win => wins.push(trade.net_pnl),
                TradeStatus::Loss => losses.push(trade.net_pnl),
                TradeStatus::Breakeven => {}
            }
        }

        stats.winning_trades = wins.len() as u32;
        stats.losing_trades = losses.len() as u32;
        if stats.total_trades > 0 {
            stats.win_rate = stats.winning_trades as f64 / stats.total_trades as f64 * 100.0;
        }
        if !wins.is_empty() {
            stats.avg_winning_trade = wins.iter().sum::<f64>() / wins.len() as f64;
        }
        if !losses.is_empty() {
            stats.avg_losing_trade = losses.iter().sum::<f64>() / losses.len() as f64;
        }

        stats
    }

    pub fn total_gaps(&self) -> u32 {
        self.bullish_gaps + self.bearish_gaps
    }
}

/// Floor `time` to the interval grid counted from UTC midnight
///
/// 4h at 10:37 gives 08:00, 15m at 10:37 gives 10:30.
pub fn stats_boundary(time: DateTime<Utc>, interval: StatsInterval) -> DateTime<Utc> {
    let minutes_since_midnight = time.hour() * 60 + time.minute();
    let floored = minutes_since_midnight / interval.minutes() * interval.minutes();

    let midnight = time
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(time);
    midnight + Duration::minutes(floored as i64)
}

/// Keeps a pruned event history and decides when a snapshot is due
#[derive(Debug, Clone)]
pub struct StatsTracker {
    interval: StatsInterval,
    window: Duration,
    gaps: VecDeque<GapEvent>,
    trades: VecDeque<TradeResult>,
    last_boundary: Option<DateTime<Utc>>,
}

impl StatsTracker {
    /// Window defaults to one interval
    pub fn new(interval: StatsInterval) -> Self {
        Self::with_window(interval, interval.duration())
    }

    pub fn with_window(interval: StatsInterval, window: Duration) -> Self {
        Self {
            interval,
            window,
            gaps: VecDeque::new(),
            trades: VecDeque::new(),
            last_boundary: None,
        }
    }

    pub fn interval(&self) -> StatsInterval {
        self.interval
    }

    pub fn record(&mut self, event: &OutputEvent) {
        match event {
            OutputEvent::Gap(gap) => self.gaps.push_back(gap.clone()),
            OutputEvent::PositionClosed(trade) => self.trades.push_back(trade.clone()),
            _ => {}
        }
    }

    /// Returns `(boundary, snapshot)` the first time `now` crosses a new boundary
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, GapStatistics)> {
        let boundary = stats_boundary(now, self.interval);

        let Some(previous) = self.last_boundary else {
            self.last_boundary = Some(boundary);
            return None;
        };
        if boundary <= previous {
            return None;
        }
        self.last_boundary = Some(boundary);

        let window_start = now - self.window;
        self.prune(window_start);
        Some((boundary, self.snapshot(window_start, now)))
    }

    pub fn snapshot(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> GapStatistics {
        GapStatistics::compute(window_start, window_end, &self.gaps, &self.trades)
    }

    // The newest gap is kept so trend and sequence survive quiet windows
    fn prune(&mut self, window_start: DateTime<Utc>) {
        while self.gaps.len() > 1
            && self
                .gaps
                .front()
                .map_or(false, |g| g.detection_bar_time <= window_start)
        {
            self.gaps.pop_front();
        }
        while self
            .trades
            .front()
            .map_or(false, |t| t.close_time <= window_start)
        {
            self.trades.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloseReason, Side};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn create_test_gap(time: DateTime<Utc>, polarity: Polarity, is_reversal: bool, sequence: u32) -> GapEvent {
        GapEvent {
            symbol: "BTCUSDT".to_string(),
            polarity,
            gap_level: 100.0,
            gap_opening_bar_time: time - Duration::minutes(15),
            detection_bar_time: time,
            is_first_gap: false,
            is_reversal,
            sequence_number: sequence,
            group_size_before_cleanup: 3,
            prev_gap_level: None,
            prev_sequence_number: 0,
        }
    }

    fn create_test_trade(close_time: DateTime<Utc>, net_pnl: f64, cumulative_pnl: f64) -> TradeResult {
        TradeResult {
            position_id: Uuid::new_v4(),
            status: TradeStatus::from_net_pnl(net_pnl),
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            open_time: close_time - Duration::hours(1),
            close_time,
            entry_price: 100.0,
            exit_price: 101.0,
            notional_usd: 1000.0,
            quantity: 10.0,
            gross_pnl: net_pnl + 0.6,
            net_pnl,
            total_fees: 0.6,
            close_reason: CloseReason::Reverse,
            cumulative_wins: 0,
            cumulative_losses: 0,
            cumulative_pnl,
            cumulative_fees: 0.0,
        }
    }

    #[test]
    fn test_stats_boundary_alignment() {
        let four_hours: StatsInterval = "4h".parse().unwrap();
        let fifteen: StatsInterval = "15m".parse().unwrap();

        assert_eq!(stats_boundary(at(10, 37), four_hours), at(8, 0));
        assert_eq!(stats_boundary(at(10, 37), fifteen), at(10, 30));
        assert_eq!(stats_boundary(at(0, 0), four_hours), at(0, 0));
        assert_eq!(stats_boundary(at(23, 59), four_hours), at(20, 0));
    }

    #[test]
    fn test_compute_counts_gaps_and_trades() {
        let gaps = vec![
            create_test_gap(at(0, 30), Polarity::Bullish, false, 1), // outside window
            create_test_gap(at(1, 0), Polarity::Bullish, false, 2),
            create_test_gap(at(1, 30), Polarity::Bearish, true, 1),
            create_test_gap(at(2, 30), Polarity::Bearish, false, 2),
        ];
        let trades = vec![
            create_test_trade(at(1, 45), 12.0, 12.0),
            create_test_trade(at(2, 15), -4.0, 8.0),
            create_test_trade(at(2, 45), 6.0, 14.0),
        ];

        let stats = GapStatistics::compute(at(0, 45), at(3, 0), &gaps, &trades);

        assert_eq!(stats.bullish_gaps, 1);
        assert_eq!(stats.bearish_gaps, 2);
        assert_eq!(stats.total_gaps(), 3);
        assert_eq!(stats.reversals, 1);
        assert_eq!(stats.avg_gap_interval_minutes, Some(45.0));
        assert_eq!(stats.current_trend, Some(Polarity::Bearish));
        assert_eq!(stats.current_sequence, 2);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_winning_trade, 9.0);
        assert_eq!(stats.avg_losing_trade, -4.0);
        assert!((stats.net_pnl - 14.0).abs() < 1e-9);
        assert_eq!(stats.volume_usd, 3000.0);
        assert_eq!(stats.cumulative_pnl, Some(14.0));
    }

    #[test]
    fn test_compute_empty_window() {
        let gaps = vec![create_test_gap(at(0, 30), Polarity::Bullish, false, 4)];
        let stats = GapStatistics::compute(at(1, 0), at(2, 0), &gaps, &Vec::<TradeResult>::new());

        assert_eq!(stats.total_gaps(), 0);
        assert_eq!(stats.avg_gap_interval_minutes, None);
        assert_eq!(stats.win_rate, 0.0);
        // trend carries over from before the window
        assert_eq!(stats.current_trend, Some(Polarity::Bullish));
        assert_eq!(stats.current_sequence, 4);
    }

    #[test]
    fn test_tracker_emits_once_per_boundary() {
        let mut tracker = StatsTracker::new("1h".parse().unwrap());

        assert!(tracker.poll(at(0, 10)).is_none()); // establishes the first boundary
        tracker.record(&OutputEvent::Gap(create_test_gap(at(0, 20), Polarity::Bullish, false, 1)));
        assert!(tracker.poll(at(0, 55)).is_none());

        let (boundary, stats) = tracker.poll(at(1, 0)).unwrap();
        assert_eq!(boundary, at(1, 0));
        assert_eq!(stats.bullish_gaps, 1);

        assert!(tracker.poll(at(1, 5)).is_none());
        assert!(tracker.poll(at(2, 0)).is_some());
    }

    #[test]
    fn test_tracker_prunes_outside_window() {
        let mut tracker = StatsTracker::new("1h".parse().unwrap());
        tracker.poll(at(0, 0));
        tracker.record(&OutputEvent::Gap(create_test_gap(at(0, 10), Polarity::Bearish, false, 1)));
        tracker.record(&OutputEvent::PositionClosed(create_test_trade(at(0, 20), 5.0, 5.0)));

        let (_, stats) = tracker.poll(at(3, 0)).unwrap();
        assert_eq!(stats.total_gaps(), 0);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.current_trend, Some(Polarity::Bearish));
    }
}
