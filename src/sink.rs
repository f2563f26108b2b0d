//! Output event consumers.
//!
//! The engine never formats or delivers notifications itself; every
//! [`OutputEvent`] is handed to each registered [`EventSink`] in order.

use async_trait::async_trait;

use crate::models::{OutputEvent, SessionStatus};

#[async_trait]
pub trait EventSink: Send {
    fn name(&self) -> &str;

    async fn publish(&mut self, event: &OutputEvent) -> anyhow::Result<()>;
}

/// Writes every event to the log
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&mut self, event: &OutputEvent) -> anyhow::Result<()> {
        match event {
            OutputEvent::Status { symbol, status } => match status {
                SessionStatus::Started => tracing::info!(%symbol, "🚀 Session started"),
                SessionStatus::Stopped { reason } => {
                    tracing::info!(%symbol, %reason, "🛑 Session stopped")
                }
            },
            OutputEvent::Gap(gap) => {
                let emoji = if gap.is_reversal { "🔄" } else { "📍" };
                tracing::info!(
                    symbol = %gap.symbol,
                    polarity = %gap.polarity,
                    level = gap.gap_level,
                    sequence = gap.sequence_number,
                    first = gap.is_first_gap,
                    reversal = gap.is_reversal,
                    opening_bar = %gap.gap_opening_bar_time,
                    "{} External gap",
                    emoji
                );
            }
            OutputEvent::PositionOpened {
                position,
                gap_level,
                sequence_number,
            } => {
                tracing::info!(
                    symbol = %position.symbol,
                    side = %position.side,
                    entry_price = position.entry_price,
                    quantity = format!("{:.6}", position.quantity),
                    gap_level,
                    sequence_number,
                    "📈 Position opened"
                );
            }
            OutputEvent::PositionClosed(trade) => {
                tracing::info!(
                    symbol = %trade.symbol,
                    side = %trade.side,
                    reason = %trade.close_reason,
                    entry_price = trade.entry_price,
                    exit_price = trade.exit_price,
                    net_pnl = format!("{:.2}", trade.net_pnl),
                    fees = format!("{:.2}", trade.total_fees),
                    cumulative_pnl = format!("{:.2}", trade.cumulative_pnl),
                    wins = trade.cumulative_wins,
                    losses = trade.cumulative_losses,
                    "💰 Position closed"
                );
            }
            OutputEvent::Stats {
                symbol,
                boundary,
                stats,
            } => {
                tracing::info!(
                    %symbol,
                    boundary = %boundary.format("%H:%M"),
                    bullish = stats.bullish_gaps,
                    bearish = stats.bearish_gaps,
                    reversals = stats.reversals,
                    trades = stats.total_trades,
                    win_rate = format!("{:.1}%", stats.win_rate),
                    net_pnl = format!("{:.2}", stats.net_pnl),
                    "📊 Periodic statistics"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_accepts_all_events() {
        let mut sink = LogSink;
        let event = OutputEvent::Status {
            symbol: "BTCUSDT".to_string(),
            status: SessionStatus::Stopped {
                reason: "test".to_string(),
            },
        };
        assert!(sink.publish(&event).await.is_ok());
        assert_eq!(sink.name(), "log");
    }
}
