//! AI-Oracle Trading Simulator
//!
//! Periodically asks an external reasoning service for trade decisions,
//! validates them against risk limits, and manages the resulting simulated
//! leveraged positions. No real orders are ever placed.

mod api;
mod bot;
mod db;
mod metrics;
mod models;
mod trading;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::OracleConfig;
use crate::bot::{Engine, EngineConfig};
use crate::db::Database;
use crate::metrics::PerformanceStats;
use crate::trading::TradingConfig;

/// Simulated leveraged trading driven by an AI decision oracle.
#[derive(Parser)]
#[command(name = "aitrader")]
#[command(about = "Simulated leveraged trading driven by an AI decision oracle", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./aitrader.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the simulation engine
    Run {
        /// Initial simulated balance in USD
        #[arg(short, long, default_value = "10000")]
        balance: f64,

        /// Cycle interval in seconds
        #[arg(short, long, default_value = "180")]
        interval: u64,

        /// Symbols to trade
        #[arg(
            short,
            long,
            value_delimiter = ',',
            default_value = "BTC,ETH,SOL,BNB,DOGE,XRP"
        )]
        symbols: Vec<String>,
    },

    /// Show engine status and portfolio summary
    Status,

    /// List closed trades
    Trades {
        /// Only show trades for this symbol
        #[arg(short, long)]
        symbol: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show the AI decision audit log
    Decisions {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show the equity history
    Equity {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show performance statistics over closed trades
    Stats,

    /// Show the active risk configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
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
        Commands::Run {
            balance,
            interval,
            symbols,
        } => {
            info!(balance, interval, "Starting simulation engine");

            let oracle_config = OracleConfig::from_env()?;
            let config = EngineConfig {
                initial_balance: Decimal::try_from(balance)?,
                cycle_interval_secs: interval,
                symbols: symbols.clone(),
                database_url: cli.database.clone(),
                trading: TradingConfig::default(),
            };

            let mut engine = Engine::new(config, oracle_config).await?;
            engine.initialize().await?;

            println!("\n=== AI-Oracle Trading Simulator ===");
            println!("Initial balance: ${balance}");
            println!("Cycle interval:  {interval}s");
            println!("Symbols:         {}", symbols.join(", "));
            println!("\nSimulation only - no real orders are placed.");
            println!("Press Ctrl+C to stop.\n");

            if let Err(e) = engine.run().await {
                tracing::error!(error = %e, "Engine stopped on fatal error");
            }

            let status = engine.status();
            if !status.running {
                println!("\nEngine stopped.");
            }
            if let Some(at) = status.last_cycle_at {
                println!("Last cycle at: {at}");
            }
            if let Some(summary) = status.last_decision_summary {
                println!("Last cycle:    {summary}");
            }
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;
            let state = match db.engine_state().await {
                Ok(state) => state,
                Err(_) => {
                    println!("No session found. Use 'aitrader run' to start the engine.");
                    return Ok(());
                }
            };

            let positions = db.open_positions().await?;
            let snapshot = db.latest_snapshot().await?;

            println!("\n=== Engine Status ===");
            println!("Running:     {}", if state.is_running { "Yes" } else { "No" });
            println!("Started:     {}", state.started_at);
            println!(
                "Last cycle:  {}",
                state.last_cycle_at.unwrap_or_else(|| "Never".to_string())
            );
            if let Some(summary) = state.last_summary {
                println!("Last result: {summary}");
            }

            if let Some(snap) = snapshot {
                println!("\n=== Portfolio ===");
                println!("Cash:           ${:.2}", snap.cash);
                println!("Unrealized P&L: ${:+.2}", snap.unrealized_pnl);
                println!("Realized P&L:   ${:+.2}", snap.realized_pnl);
                println!("Equity:         ${:.2}", snap.equity);
                println!("ROI:            {:+.2}%", snap.roi * 100.0);
            }

            if !positions.is_empty() {
                println!("\n=== Open Positions ===");
                for pos in &positions {
                    println!(
                        "  {} {} size={} entry={} {}x stop={}",
                        pos.symbol,
                        pos.side.as_str(),
                        pos.size,
                        pos.entry_price,
                        pos.leverage,
                        pos.stop_loss,
                    );
                }
            }
        }

        Commands::Trades { symbol, limit } => {
            let db = Database::new(&cli.database).await?;
            let trades = match symbol {
                Some(symbol) => db.trades_by_symbol(&symbol, limit).await?,
                None => db.all_trades(limit).await?,
            };

            if trades.is_empty() {
                println!("No closed trades.");
                return Ok(());
            }

            println!(
                "\n{:<6} {:<6} {:>12} {:>12} {:>6} {:>12} {:<14}",
                "SYMBOL", "SIDE", "ENTRY", "EXIT", "LEV", "PNL", "REASON"
            );
            println!("{}", "-".repeat(74));
            for trade in trades {
                println!(
                    "{:<6} {:<6} {:>12} {:>12} {:>5}x {:>12} {:<14}",
                    trade.symbol,
                    trade.side.as_str(),
                    trade.entry_price,
                    trade.exit_price,
                    trade.leverage,
                    trade.realized_pnl,
                    trade.close_reason.as_str()
                );
            }
        }

        Commands::Decisions { limit } => {
            let db = Database::new(&cli.database).await?;
            let decisions = db.recent_decisions(limit).await?;

            if decisions.is_empty() {
                println!("No decisions logged.");
                return Ok(());
            }

            for decision in decisions {
                println!(
                    "[{}] {} {} conf={:.2} lev={} -> {}{}",
                    decision.timestamp,
                    decision.symbol,
                    decision.action,
                    decision.confidence,
                    decision.leverage,
                    decision.verdict,
                    decision
                        .verdict_reason
                        .map(|r| format!(" ({r})"))
                        .unwrap_or_default()
                );
                if !decision.reasoning.is_empty() {
                    println!("    {}", decision.reasoning);
                }
                if let Some(condition) = decision.exit_condition {
                    println!("    exit when: {condition}");
                }
                if let Some(raw) = decision.raw_payload {
                    println!("    raw payload: {raw}");
                }
            }
        }

        Commands::Equity { limit } => {
            let db = Database::new(&cli.database).await?;
            let history = db.equity_history(limit).await?;

            if history.is_empty() {
                println!("No equity history.");
                return Ok(());
            }

            println!(
                "\n{:<26} {:>12} {:>12} {:>12} {:>8}",
                "TIMESTAMP", "EQUITY", "UNREALIZED", "REALIZED", "ROI"
            );
            println!("{}", "-".repeat(74));
            for point in history {
                println!(
                    "{:<26} {:>12.2} {:>12.2} {:>12.2} {:>7.2}%",
                    point.timestamp,
                    point.equity,
                    point.unrealized_pnl,
                    point.realized_pnl,
                    point.roi * 100.0
                );
            }
        }

        Commands::Stats => {
            let db = Database::new(&cli.database).await?;
            let trades = db.all_trades(1000).await?;
            let stats = PerformanceStats::from_trades(&trades);

            println!("\n=== Performance ===");
            println!("Total Trades:  {}", stats.total_trades);
            println!(
                "Win/Loss:      {} / {}",
                stats.winning_trades, stats.losing_trades
            );
            println!("Win Rate:      {:.1}%", stats.win_rate * 100.0);
            println!("Total P&L:     {:+}", stats.total_pnl);
            println!("Average P&L:   {:+}", stats.avg_pnl);
            println!("Best Trade:    {:+}", stats.best_trade);
            println!("Worst Trade:   {:+}", stats.worst_trade);
            println!("Profit Factor: {:.2}", stats.profit_factor);
            println!("Sharpe Ratio:  {:.2}", stats.sharpe_ratio);
        }

        Commands::Config => {
            let config = TradingConfig::default();

            println!("\n=== Risk Configuration ===");
            println!("Max Leverage:        {}x", config.max_leverage);
            println!(
                "Max Position Size:   {}% of equity",
                config.max_position_size * Decimal::from(100)
            );
            println!(
                "Default Stop Loss:   -{}%",
                config.default_stop_loss_pct * Decimal::from(100)
            );
        }
    }

    Ok(())
}
