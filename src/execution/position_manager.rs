use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{CloseReason, PendingEntry, Position, Side, TradeResult, TradeStatus};

/// Price input that cannot be traded on
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceError {
    #[error("{context}: price must be positive, got {price}")]
    NonPositive { context: &'static str, price: f64 },

    #[error("{context}: price is not finite")]
    NonFinite { context: &'static str },
}

fn validate_price(price: f64, context: &'static str) -> Result<f64, PriceError> {
    if !price.is_finite() {
        return Err(PriceError::NonFinite { context });
    }
    if price <= 0.0 {
        return Err(PriceError::NonPositive { context, price });
    }
    Ok(price)
}

/// Running totals across all closed trades of the symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cumulative {
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub net_pnl: f64,
    pub fees: f64,
    pub volume_usd: f64,
}

/// What happened when a pending entry was executed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryOutcome {
    /// Opposite-side position closed by the reversal
    pub closed: Option<TradeResult>,
    /// Newly opened position; `None` when the signal matched the open side
    pub opened: Option<Position>,
}

/// Owns the single simulated position of one symbol
pub struct PositionManager {
    symbol: String,
    notional_usd: f64,
    entry_cost_rate: f64,
    exit_cost_rate: f64,
    position: Option<Position>,
    history: Vec<TradeResult>,
    cumulative: Cumulative,
}

impl PositionManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            notional_usd: config.notional_usd,
            entry_cost_rate: config.entry_cost_rate(),
            exit_cost_rate: config.exit_cost_rate(),
            position: None,
            history: Vec::new(),
            cumulative: Cumulative::default(),
        }
    }

    pub fn open_position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    /// Every closed trade, oldest first
    pub fn trade_history(&self) -> &[TradeResult] {
        &self.history
    }

    pub fn cumulative(&self) -> &Cumulative {
        &self.cumulative
    }

    /// Close the open position if it has been held for at least `max_age`
    pub fn check_expiry(
        &mut self,
        now: DateTime<Utc>,
        exit_price: f64,
        max_age: Duration,
    ) -> Result<Option<TradeResult>, PriceError> {
        let Some(position) = &self.position else {
            return Ok(None);
        };

        if now - position.entry_time < max_age {
            return Ok(None);
        }

        tracing::info!(
            symbol = %self.symbol,
            side = %position.side,
            held_hours = (now - position.entry_time).num_hours(),
            "Expiry reached, closing position"
        );
        self.close_position(exit_price, now, CloseReason::Expiry)
    }

    /// Execute a pending entry at `price`, reversing an opposite position first
    pub fn execute_entry(
        &mut self,
        pending: &PendingEntry,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<EntryOutcome, PriceError> {
        let price = validate_price(price, "entry")?;
        let mut outcome = EntryOutcome::default();

        if let Some(current) = &self.position {
            if current.side == pending.side {
                tracing::warn!(
                    symbol = %self.symbol,
                    side = %pending.side,
                    "Ignoring entry signal, already holding this side"
                );
                return Ok(outcome);
            }
            outcome.closed = self.close_position(price, time, CloseReason::Reverse)?;
        }

        outcome.opened = Some(self.open(pending.side, price, time));
        Ok(outcome)
    }

    /// Close the open position at `exit_price`
    ///
    /// Returns `Ok(None)` when nothing is open.
    pub fn close_position(
        &mut self,
        exit_price: f64,
        time: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<Option<TradeResult>, PriceError> {
        if self.position.is_none() {
            return Ok(None);
        }
        let exit_price = validate_price(exit_price, "exit")?;
        let Some(position) = self.position.take() else {
            return Ok(None);
        };

        let gross_pnl = (exit_price - position.entry_price) * position.quantity * position.side.sign();
        let exit_fee = position.notional_usd * self.exit_cost_rate;
        let total_fees = position.entry_fee + exit_fee;
        let net_pnl = gross_pnl - total_fees;
        let status = TradeStatus::from_net_pnl(net_pnl);

        self.cumulative.trades += 1;
        self.cumulative.net_pnl += net_pnl;
        self.cumulative.fees += total_fees;
        self.cumulative.volume_usd += position.notional_usd;
        match status {
            TradeStatus::Win => self.cumulative.wins += 1,
            TradeStatus::Loss => self.cumulative.losses += 1,
            TradeStatus::Breakeven => {}
        }

        let result = TradeResult {
            position_id: position.id,
            status,
            symbol: position.symbol.clone(),
            side: position.side,
            open_time: position.entry_time,
            close_time: time,
            entry_price: position.entry_price,
            exit_price,
            notional_usd: position.notional_usd,
            quantity: position.quantity,
            gross_pnl,
            net_pnl,
            total_fees,
            close_reason: reason,
            cumulative_wins: self.cumulative.wins,
            cumulative_losses: self.cumulative.losses,
            cumulative_pnl: self.cumulative.net_pnl,
            cumulative_fees: self.cumulative.fees,
        };

        tracing::info!(
            symbol = %result.symbol,
            side = %result.side,
            exit_price,
            net_pnl = format!("{:.2}", net_pnl),
            reason = %reason,
            "Closed position"
        );

        self.history.push(result.clone());
        Ok(Some(result))
    }

    /// Mark-to-market P&L of the open position, before exit fees
    pub fn unrealized_pnl(&self, mark_price: f64) -> Option<f64> {
        self.position.as_ref().map(|p| {
            (mark_price - p.entry_price) * p.quantity * p.side.sign() - p.entry_fee
        })
    }

    fn open(&mut self, side: Side, entry_price: f64, entry_time: DateTime<Utc>) -> Position {
        let quantity = self.notional_usd / entry_price;
        let entry_fee = self.notional_usd * self.entry_cost_rate;

        let position = Position {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            side,
            entry_price,
            entry_time,
            notional_usd: self.notional_usd,
            quantity,
            entry_fee,
        };
        self.cumulative.volume_usd += self.notional_usd;

        tracing::info!(
            symbol = %self.symbol,
            side = %side,
            entry_price,
            quantity = format!("{:.6}", quantity),
            "Opened position"
        );

        self.position = Some(position.clone());
        position
    }
}
