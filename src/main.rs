use anyhow::Context;
use clap::Parser;
use extgap::config::{EngineConfig, StatsInterval, Timeframe};
use extgap::feed::{binance::DEFAULT_WS_URL, BinanceKlineSource, CandleSource, ReplaySource};
use extgap::sink::LogSink;
use extgap::stats::StatsTracker;
use extgap::stream::Supervisor;
use extgap::GapEngine;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "extgap")]
#[command(about = "External gap detector and simulated reversal trader for Binance klines")]
struct Args {
    /// Trading pair, e.g. BTCUSDT
    #[arg(long)]
    symbol: Option<String>,

    /// Kline interval (1m, 5m, 15m, 1h, 4h, ...)
    #[arg(long)]
    timeframe: Option<Timeframe>,

    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Replay candles from a JSON-lines file instead of the live stream
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Position notional in USD
    #[arg(long)]
    notional: Option<f64>,

    /// Hours after which an open position is closed
    #[arg(long)]
    expiry_hours: Option<i64>,

    /// Periodic statistics interval (UTC-aligned)
    #[arg(long, default_value = "4h")]
    stats_interval: StatsInterval,

    /// Rolling window for statistics, defaults to the stats interval
    #[arg(long)]
    stats_window: Option<StatsInterval>,

    /// WebSocket base URL
    #[arg(long, default_value = DEFAULT_WS_URL)]
    ws_url: String,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.log_level.as_deref());

    tracing::info!("🚀 External gap engine starting");

    let config = build_config(&args)?;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {}", config.symbol);
    tracing::info!("  Timeframe: {}", config.timeframe);
    tracing::info!("  Notional: ${:.2}", config.notional_usd);
    tracing::info!(
        "  Fees: entry {:.4}% / exit {:.4}% / slippage {:.4}%",
        config.entry_fee_rate * 100.0,
        config.exit_fee_rate * 100.0,
        config.slippage_rate * 100.0
    );
    tracing::info!("  Expiry: {}h", config.expiry().num_hours());
    tracing::info!("  Stats interval: {} (UTC-aligned)", args.stats_interval);

    let source: Box<dyn CandleSource> = match &args.replay {
        Some(path) => {
            tracing::info!("  Source: replay {}", path.display());
            Box::new(ReplaySource::new(path))
        }
        None => {
            let source = BinanceKlineSource::with_base_url(&args.ws_url, &config.symbol, config.timeframe);
            tracing::info!("  Source: {}", source.url());
            Box::new(source)
        }
    };

    let stats = match args.stats_window {
        Some(window) => StatsTracker::with_window(args.stats_interval, window.duration()),
        None => StatsTracker::new(args.stats_interval),
    };

    let engine = GapEngine::new(config).context("invalid engine configuration")?;
    let mut supervisor = Supervisor::new(engine, source)
        .with_sink(Box::new(LogSink))
        .with_stats(stats);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!("\nPress Ctrl+C to stop...\n");
    let summary = supervisor.run(shutdown_rx).await;

    if let Some(position) = supervisor.engine().open_position() {
        tracing::info!(
            "  Open position left: {} {} @ {:.2}",
            position.side,
            position.symbol,
            position.entry_price
        );
    }
    let totals = supervisor.engine().positions().cumulative();
    tracing::info!(
        "  Candles: {} received / {} accepted, reconnects: {}",
        summary.candles_received,
        summary.candles_accepted,
        summary.reconnects
    );
    tracing::info!(
        "  Trades: {} ({}W / {}L), net P&L ${:.2}, fees ${:.2}",
        totals.trades,
        totals.wins,
        totals.losses,
        totals.net_pnl,
        totals.fees
    );

    tracing::info!("👋 External gap engine stopped");
    Ok(())
}

fn setup_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("extgap=info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Defaults, config file, `EXTGAP_*` env, then command line
fn build_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(symbol) = &args.symbol {
        config.symbol = symbol.to_uppercase();
    }
    if let Some(timeframe) = args.timeframe {
        config.timeframe = timeframe;
    }
    if let Some(notional) = args.notional {
        config.notional_usd = notional;
    }
    if let Some(hours) = args.expiry_hours {
        config.expiry_secs = hours
            .checked_mul(3600)
            .ok_or_else(|| anyhow::anyhow!("--expiry-hours {} is out of range", hours))?;
    }

    config.validate()?;
    Ok(config)
}
