use alerter::error::AlerterError;
use alerter::{run_alerter_service, TelegramAlerter};
use api_client::{BackoffPolicy, BinanceClient, ExchangeGateway, LiveConnector};
use clap::{Args, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use configuration::{init_tracing, load_config, Config, Overrides};
use core_types::TrendSignal;
use engine::{load_history, HistoryRow, LiveEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long the alerter may take to flush the final notifications.
const ALERTER_FLUSH: Duration = Duration::from_secs(5);

/// The main entry point for the Heikin-Ashi trading client.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the settings may come from config.toml or the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = load_config()?;
    config.apply_overrides(cli.command.overrides());
    config.validate()?;

    // Keep the guard alive so the file writer flushes on exit.
    let _log_guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run(_) => run(config).await,
        Commands::History(args) => history(config, args.limit).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Long-only Heikin-Ashi stop-entry trader for Binance USDⓈ-M futures.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade the configured symbol until interrupted.
    Run(RunArgs),
    /// Print recent candles with their Heikin-Ashi values and signals.
    History(HistoryArgs),
}

impl Commands {
    fn overrides(&self) -> &Overrides {
        match self {
            Commands::Run(args) => &args.overrides,
            Commands::History(args) => &args.overrides,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args)]
struct HistoryArgs {
    #[command(flatten)]
    overrides: Overrides,

    /// Number of closed candles to show.
    #[arg(long, default_value_t = 20)]
    limit: u16,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn gateway(config: &Config) -> anyhow::Result<Arc<dyn ExchangeGateway>> {
    Ok(Arc::new(BinanceClient::new(
        config.exchange.testnet,
        config.active_keys(),
        config.exchange.hedge_mode,
    )?))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        symbol = %config.trading.symbol,
        interval = %config.trading.interval,
        testnet = config.exchange.testnet,
        "Starting trading client"
    );

    let connector =
        LiveConnector::new(config.exchange.testnet, BackoffPolicy::from(&config.stream))?;
    let engine = LiveEngine::new(&config, gateway(&config)?, connector);

    let alerts = match TelegramAlerter::new(&config.telegram) {
        Ok(alerter) => Some(tokio::spawn(run_alerter_service(alerter, engine.subscribe()))),
        Err(AlerterError::NotConfigured) => {
            info!("Telegram alerts disabled (no token or chat_id).");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let handle = engine.start().await?;

    let stop = handle.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down.");
            stop.cancel();
        }
    });

    let result = handle.join().await;
    if let Err(e) = &result {
        error!(error = %e, "Engine terminated with an error");
    }

    if let Some(task) = alerts {
        let _ = tokio::time::timeout(ALERTER_FLUSH, task).await;
    }

    Ok(result?)
}

async fn history(config: Config, limit: u16) -> anyhow::Result<()> {
    let gateway = gateway(&config)?;
    let rows = load_history(
        gateway.as_ref(),
        &config.trading.symbol,
        config.trading.interval,
        limit,
    )
    .await?;

    println!(
        "{} {}: last {} closed candles",
        config.trading.symbol,
        config.trading.interval,
        rows.len()
    );
    println!("{}", history_table(&rows));
    Ok(())
}

fn history_table(rows: &[HistoryRow]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Open time (UTC)",
        "Open",
        "High",
        "Low",
        "Close",
        "HA Open",
        "HA High",
        "HA Low",
        "HA Close",
        "Signal",
    ]);

    for row in rows {
        let signal = match row.signal {
            TrendSignal::Buy => Cell::new("BUY").fg(Color::Green),
            TrendSignal::Sell => Cell::new("SELL").fg(Color::Red),
            TrendSignal::Hold => Cell::new("HOLD"),
        };
        table.add_row(vec![
            Cell::new(row.kline.open_time.format("%Y-%m-%d %H:%M")),
            Cell::new(row.kline.open),
            Cell::new(row.kline.high),
            Cell::new(row.kline.low),
            Cell::new(row.kline.close),
            Cell::new(row.candle.ha_open.round_dp(4)),
            Cell::new(row.candle.ha_high.round_dp(4)),
            Cell::new(row.candle.ha_low.round_dp(4)),
            Cell::new(row.candle.ha_close.round_dp(4)),
            signal,
        ]);
    }
    table
}
