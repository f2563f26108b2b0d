use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::Timeframe;
use crate::models::Candle;

/// Why a candle never reached the engine
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NotClosed,
    WrongSymbol(String),
    Malformed(String),
    Misaligned(DateTime<Utc>),
    /// Open time at or before the last accepted candle
    Stale(DateTime<Utc>),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotClosed => write!(f, "candle not closed"),
            RejectReason::WrongSymbol(s) => write!(f, "unexpected symbol {}", s),
            RejectReason::Malformed(msg) => write!(f, "malformed candle: {}", msg),
            RejectReason::Misaligned(t) => write!(f, "open time {} not on timeframe boundary", t),
            RejectReason::Stale(t) => write!(f, "duplicate or stale candle at {}", t),
        }
    }
}

/// Missing candles between two accepted candles of the same session
#[derive(Debug, Clone, PartialEq)]
pub struct Discontinuity {
    pub expected_open: DateTime<Utc>,
    pub actual_open: DateTime<Utc>,
    pub missing_candles: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Accepted {
        /// First aligned candle since the last (re)connect
        first_of_session: bool,
        discontinuity: Option<Discontinuity>,
    },
    Rejected(RejectReason),
}

impl NormalizeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, NormalizeOutcome::Accepted { .. })
    }
}

/// Filters raw klines down to the closed, aligned, forward-moving candles the engine sees
#[derive(Debug, Clone)]
pub struct CandleNormalizer {
    symbol: String,
    timeframe: Timeframe,
    last_open_time: Option<DateTime<Utc>>,
    session_reference: Option<DateTime<Utc>>,
}

impl CandleNormalizer {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            last_open_time: None,
            session_reference: None,
        }
    }

    /// Call after every (re)connect; the next aligned candle becomes the reference
    pub fn begin_session(&mut self) {
        self.session_reference = None;
    }

    /// True once an aligned candle has been accepted in the current session
    pub fn is_session_aligned(&self) -> bool {
        self.session_reference.is_some()
    }

    pub fn last_open_time(&self) -> Option<DateTime<Utc>> {
        self.last_open_time
    }

    pub fn accept(&mut self, candle: &Candle) -> NormalizeOutcome {
        if let Err(reason) = self.check(candle) {
            return NormalizeOutcome::Rejected(reason);
        }

        let first_of_session = self.session_reference.is_none();
        let discontinuity = self.session_reference.and_then(|previous| {
            let expected_open = previous + self.timeframe.duration();
            (candle.open_time > expected_open).then(|| Discontinuity {
                expected_open,
                actual_open: candle.open_time,
                missing_candles: (candle.open_time - expected_open).num_milliseconds()
                    / self.timeframe.as_millis(),
            })
        });

        self.session_reference = Some(candle.open_time);
        self.last_open_time = Some(candle.open_time);

        NormalizeOutcome::Accepted {
            first_of_session,
            discontinuity,
        }
    }

    fn check(&self, candle: &Candle) -> Result<(), RejectReason> {
        if !candle.is_closed {
            return Err(RejectReason::NotClosed);
        }
        if !candle.symbol.eq_ignore_ascii_case(&self.symbol) {
            return Err(RejectReason::WrongSymbol(candle.symbol.clone()));
        }

        let prices = [candle.open, candle.high, candle.low, candle.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(RejectReason::Malformed("non-finite price".to_string()));
        }
        if candle.high < candle.low {
            return Err(RejectReason::Malformed(format!(
                "high ({}) is less than low ({})",
                candle.high, candle.low
            )));
        }

        if !self.timeframe.is_aligned(candle.open_time) {
            return Err(RejectReason::Misaligned(candle.open_time));
        }
        if let Some(last) = self.last_open_time {
            if candle.open_time <= last {
                return Err(RejectReason::Stale(candle.open_time));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn create_test_candle(minute: i64) -> Candle {
        let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Candle {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + Duration::minutes(5) - Duration::milliseconds(1),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            is_closed: true,
        }
    }

    fn normalizer() -> CandleNormalizer {
        CandleNormalizer::new("BTCUSDT", "5m".parse().unwrap())
    }

    #[test]
    fn test_first_aligned_candle_starts_session() {
        let mut n = normalizer();
        assert!(!n.is_session_aligned());

        let outcome = n.accept(&create_test_candle(0));
        assert_eq!(
            outcome,
            NormalizeOutcome::Accepted {
                first_of_session: true,
                discontinuity: None
            }
        );
        assert!(n.is_session_aligned());

        let outcome = n.accept(&create_test_candle(5));
        assert_eq!(
            outcome,
            NormalizeOutcome::Accepted {
                first_of_session: false,
                discontinuity: None
            }
        );
    }

    #[test]
    fn test_rejects_misaligned_candles() {
        let mut n = normalizer();
        let outcome = n.accept(&create_test_candle(3));
        assert!(matches!(outcome, NormalizeOutcome::Rejected(RejectReason::Misaligned(_))));
        assert!(!n.is_session_aligned());

        assert!(n.accept(&create_test_candle(5)).is_accepted());
        assert!(!n.accept(&create_test_candle(12)).is_accepted());
    }

    #[test]
    fn test_rejects_open_and_malformed_candles() {
        let mut n = normalizer();

        let mut open = create_test_candle(0);
        open.is_closed = false;
        assert_eq!(n.accept(&open), NormalizeOutcome::Rejected(RejectReason::NotClosed));

        let mut inverted = create_test_candle(0);
        inverted.high = 98.0;
        assert!(matches!(n.accept(&inverted), NormalizeOutcome::Rejected(RejectReason::Malformed(_))));

        let mut nan = create_test_candle(0);
        nan.close = f64::NAN;
        assert!(matches!(n.accept(&nan), NormalizeOutcome::Rejected(RejectReason::Malformed(_))));

        let mut other = create_test_candle(0);
        other.symbol = "ETHUSDT".to_string();
        assert!(matches!(n.accept(&other), NormalizeOutcome::Rejected(RejectReason::WrongSymbol(_))));
    }

    #[test]
    fn test_zero_price_is_not_malformed() {
        let mut n = normalizer();
        let mut candle = create_test_candle(0);
        candle.open = 0.0;
        candle.low = 0.0;
        assert!(n.accept(&candle).is_accepted());
    }

    #[test]
    fn test_reports_missing_candles() {
        let mut n = normalizer();
        n.accept(&create_test_candle(0));

        // 5 and 10 are missing
        let outcome = n.accept(&create_test_candle(15));
        match outcome {
            NormalizeOutcome::Accepted {
                discontinuity: Some(d),
                ..
            } => {
                assert_eq!(d.missing_candles, 2);
                assert_eq!(d.expected_open, create_test_candle(5).open_time);
            }
            other => panic!("expected discontinuity, got {:?}", other),
        }
    }

    #[test]
    fn test_drops_duplicates_and_stale_candles() {
        let mut n = normalizer();
        n.accept(&create_test_candle(10));

        assert!(matches!(
            n.accept(&create_test_candle(10)),
            NormalizeOutcome::Rejected(RejectReason::Stale(_))
        ));
        assert!(matches!(
            n.accept(&create_test_candle(5)),
            NormalizeOutcome::Rejected(RejectReason::Stale(_))
        ));
    }

    #[test]
    fn test_reconnect_resets_reference_but_not_ordering() {
        let mut n = normalizer();
        n.accept(&create_test_candle(0));
        n.accept(&create_test_candle(5));

        n.begin_session();
        assert!(!n.is_session_aligned());

        // Replayed candle from before the disconnect is still dropped
        assert!(!n.accept(&create_test_candle(5)).is_accepted());

        // Outage candles are not reported as a discontinuity
        let outcome = n.accept(&create_test_candle(30));
        assert_eq!(
            outcome,
            NormalizeOutcome::Accepted {
                first_of_session: true,
                discontinuity: None
            }
        );
    }
}
