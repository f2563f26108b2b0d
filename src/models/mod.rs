use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::stats::GapStatistics;

/// Closed kline for one symbol/timeframe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default = "default_closed")]
    pub is_closed: bool,
}

fn default_closed() -> bool {
    true
}

/// Direction of an external gap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Bullish,
    Bearish,
}

impl Polarity {
    /// Side a reversal gap of this polarity enters
    pub fn entry_side(self) -> Side {
        match self {
            Polarity::Bullish => Side::Long,
            Polarity::Bearish => Side::Short,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Bullish => write!(f, "BULLISH"),
            Polarity::Bearish => write!(f, "BEARISH"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Detected external gap, annotated by the classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapEvent {
    pub symbol: String,
    pub polarity: Polarity,
    /// The breached candidate extreme
    pub gap_level: f64,
    pub gap_opening_bar_time: DateTime<Utc>,
    pub detection_bar_time: DateTime<Utc>,
    pub is_first_gap: bool,
    pub is_reversal: bool,
    pub sequence_number: u32,
    pub group_size_before_cleanup: usize,
    pub prev_gap_level: Option<f64>,
    /// Sequence abandoned by this gap when it is a reversal, 0 otherwise
    pub prev_sequence_number: u32,
}

/// Trade intent created by a reversal gap, consumed on the next candle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingEntry {
    pub side: Side,
    pub created_at: DateTime<Utc>,
    pub gap_level: f64,
    pub sequence_number: u32,
}

/// Simulated open position (at most one per symbol)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub notional_usd: f64,
    pub quantity: f64,
    pub entry_fee: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CloseReason {
    Reverse,
    Expiry,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Reverse => write!(f, "REVERSE"),
            CloseReason::Expiry => write!(f, "24H_EXPIRY"),
            CloseReason::Manual => write!(f, "MANUAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeStatus {
    Win,
    Loss,
    Breakeven,
}

impl TradeStatus {
    pub fn from_net_pnl(net_pnl: f64) -> Self {
        if net_pnl > 0.0 {
            TradeStatus::Win
        } else if net_pnl < 0.0 {
            TradeStatus::Loss
        } else {
            TradeStatus::Breakeven
        }
    }
}

/// Closed-position record with running totals for the symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeResult {
    pub position_id: Uuid,
    pub status: TradeStatus,
    pub symbol: String,
    pub side: Side,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub notional_usd: f64,
    pub quantity: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub total_fees: f64,
    pub close_reason: CloseReason,
    pub cumulative_wins: u32,
    pub cumulative_losses: u32,
    pub cumulative_pnl: f64,
    pub cumulative_fees: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SessionStatus {
    Started,
    Stopped { reason: String },
}

/// Everything handed to external collaborators, in occurrence order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum OutputEvent {
    Status {
        symbol: String,
        status: SessionStatus,
    },
    Gap(GapEvent),
    PositionOpened {
        position: Position,
        gap_level: f64,
        sequence_number: u32,
    },
    PositionClosed(TradeResult),
    Stats {
        symbol: String,
        boundary: DateTime<Utc>,
        stats: GapStatistics,
    },
}
