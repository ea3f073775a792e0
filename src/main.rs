//! Leveraged futures trading bot
//!
//! Trades a single symbol on technical-indicator signals, sizing leverage
//! and exits from a dynamic confidence score and risk profile.

mod config;
mod control;
mod engine;
mod exchange;
mod indicators;
mod models;
mod notify;
mod state;
mod trading;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::{ConfigArgs, Credentials};
use crate::control::Supervisor;

/// Leveraged trading bot CLI.
#[derive(Parser)]
#[command(name = "levbot")]
#[command(about = "Single-symbol leveraged trading bot", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Evaluate the market once without trading
    Analyze {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Environment fallbacks must be in place before parsing
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config } => {
            let config = config.into_config()?;
            let interval = config.loop_interval;
            let mut supervisor = Supervisor::new(config, Credentials::from_env());

            supervisor.start().await?;

            let cfg = supervisor.config();
            println!("\n=== Leveraged Trading Bot ===");
            println!("Symbol:   {} ({})", cfg.symbol, cfg.timeframe);
            println!("Mode:     {}", cfg.exchange_mode);
            println!(
                "Trading:  {}",
                if cfg.trading_enabled { "ACTIVE" } else { "MONITOR ONLY" }
            );
            println!("Interval: {}s", interval.as_secs());
            println!("\nPress Ctrl+C to stop.\n");

            report_until_interrupted(&supervisor, interval).await;

            info!("Shutdown signal received");
            let final_status = supervisor.status().await;
            supervisor.stop().await?;

            println!("\n{}", final_status);
            if let Some(state) = &final_status.state {
                println!("\nClosed trades: {}", state.trades.len());
                for t in &state.trades {
                    println!(
                        "  {} {} {} @ {:.2} -> {:.2} ({}x) PnL: {:.4} [{}]",
                        t.time.format("%Y-%m-%d %H:%M"),
                        t.side.position_label(),
                        t.side,
                        t.entry_price,
                        t.exit_price,
                        t.leverage,
                        t.pnl,
                        t.exit_reason
                    );
                }
            }
        }

        Commands::Config { config } => {
            let config = config.into_config()?;
            println!("\n{}", config);

            let missing = Credentials::from_env().missing(&config);
            if !missing.is_empty() {
                println!("\nMissing credentials: {}", missing.join(", "));
            }
        }

        Commands::Analyze { config } => {
            let config = config.into_config()?;
            let supervisor = Supervisor::new(config, Credentials::from_env());
            let analysis = supervisor.analyze().await?;
            println!("\n{}", analysis);
        }
    }

    Ok(())
}

/// Print a status line every `interval` until Ctrl+C.
async fn report_until_interrupted(supervisor: &Supervisor, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // first tick fires immediately, before the engine has observed anything
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                println!("{}", supervisor.status().await);
            }
        }
    }
}
