//! Engine runner: the scheduler driving decision cycles.
//!
//! Handles:
//! - Fixed-interval cycles with no overlap (a cycle fully completes before
//!   the next tick is awaited)
//! - Snapshot fetch, oracle decisions, risk validation, position lifecycle
//! - Fatal-vs-recoverable failure routing (auth stops the engine, everything
//!   else skips the symbol for the cycle)
//! - Atomic cycle persistence with retry before the next cycle starts

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{DecisionRequest, MarketClient, MarketSnapshot, OracleClient, OracleConfig};
use crate::db::{CycleOutcome, Database, DecisionRecord};
use crate::models::{CloseReason, Decision, DecisionVerdict, Position, Trade};
use crate::trading::{
    ExitPlanMonitor, PortfolioLedger, PositionManager, RiskValidator, TradingConfig, Verdict,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Starting simulated balance
    pub initial_balance: Decimal,

    /// Seconds between decision cycles
    pub cycle_interval_secs: u64,

    /// Symbols considered each cycle
    pub symbols: Vec<String>,

    /// Database URL
    pub database_url: String,

    /// Risk limits
    pub trading: TradingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10_000),
            cycle_interval_secs: 180,
            symbols: ["BTC", "ETH", "SOL", "BNB", "DOGE", "XRP"]
                .into_iter()
                .map(String::from)
                .collect(),
            database_url: "sqlite:aitrader.db?mode=rwc".to_string(),
            trading: TradingConfig::default(),
        }
    }
}

/// Control-surface view of the engine.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_decision_summary: Option<String>,
}

/// The simulation engine: owns all portfolio state and drives cycles.
pub struct Engine {
    config: EngineConfig,
    db: Database,
    oracle: OracleClient,
    market: MarketClient,
    validator: RiskValidator,
    positions: PositionManager,
    ledger: PortfolioLedger,

    /// Cycle outcomes whose write failed; flushed before the next cycle
    pending: Vec<CycleOutcome>,

    running: Arc<AtomicBool>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_summary: Option<String>,
}

impl Engine {
    pub async fn new(config: EngineConfig, oracle_config: OracleConfig) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let oracle = OracleClient::new(oracle_config)?;
        let market = MarketClient::new()?;
        let validator = RiskValidator::new(config.trading.clone());
        let ledger = PortfolioLedger::new(config.initial_balance);

        Ok(Self {
            config,
            db,
            oracle,
            market,
            validator,
            positions: PositionManager::new(),
            ledger,
            pending: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            last_cycle_at: None,
            last_summary: None,
        })
    }

    /// Shared flag for external stop control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Control-surface status.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            last_cycle_at: self.last_cycle_at,
            last_decision_summary: self.last_summary.clone(),
        }
    }

    /// Request a stop; takes effect at the next cycle boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Restore persisted state: open positions and ledger totals.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing engine...");

        let initial = self.config.initial_balance;
        self.db
            .init_engine_state(initial.to_f64().unwrap_or(0.0))
            .await?;

        let positions = self.db.open_positions().await?;
        if !positions.is_empty() {
            info!(count = positions.len(), "Restoring open positions");
        }
        self.positions = PositionManager::restore(positions);

        match self.db.latest_snapshot().await? {
            Some(snapshot) => {
                info!(
                    equity = snapshot.equity,
                    realized = snapshot.realized_pnl,
                    "Resuming from previous session"
                );
                self.ledger = PortfolioLedger::restore(
                    initial,
                    Decimal::try_from(snapshot.cash).unwrap_or(initial),
                    Decimal::try_from(snapshot.realized_pnl).unwrap_or(Decimal::ZERO),
                    self.positions.total_margin(),
                );
            }
            None => {
                self.ledger = PortfolioLedger::new(initial);
            }
        }

        info!(
            balance = %initial,
            symbols = self.config.symbols.len(),
            positions = self.positions.len(),
            "Engine initialized"
        );

        Ok(())
    }

    /// Main run loop. Returns when stopped, or with an error on a fatal
    /// condition (oracle credentials).
    pub async fn run(&mut self) -> Result<()> {
        info!(
            interval = self.config.cycle_interval_secs,
            symbols = ?self.config.symbols,
            "Starting engine run loop"
        );

        self.running.store(true, Ordering::SeqCst);

        let mut ticker = interval(Duration::from_secs(self.config.cycle_interval_secs));
        // A cycle that overruns its interval delays the next tick instead of
        // bursting to catch up; cycles never overlap.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let running = self.running.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            running.store(false, Ordering::SeqCst);
        });

        let result = loop {
            ticker.tick().await;

            if !self.running.load(Ordering::SeqCst) {
                break Ok(());
            }

            if let Err(e) = self.cycle().await {
                error!(error = %e, "Fatal engine error, stopping");
                break Err(e);
            }
        };

        self.shutdown().await?;
        result
    }

    /// One decision cycle. `Err` means fatal; recoverable failures are
    /// handled inside and never abort the remaining symbols.
    async fn cycle(&mut self) -> Result<()> {
        let cycle_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        debug!(cycle_id = %cycle_id, "cycle start");

        // A failed write from the previous cycle must land before this one
        // produces more state.
        self.flush_pending().await;

        // 1. Market snapshots; a symbol without data is skipped this cycle.
        let snapshots = self.fetch_snapshots().await;
        let prices: HashMap<String, Decimal> = snapshots
            .iter()
            .map(|(symbol, snap)| (symbol.clone(), snap.price))
            .collect();

        let mut trades: Vec<Trade> = Vec::new();
        let mut closed: Vec<String> = Vec::new();
        let mut opened: Vec<Position> = Vec::new();
        let mut records: Vec<DecisionRecord> = Vec::new();
        let mut summaries: Vec<String> = Vec::new();

        // 2. Exit plans run before any new decision is considered.
        let triggers = ExitPlanMonitor::check(self.positions.iter(), &prices);
        for trigger in triggers {
            if let Some(trade) =
                self.positions
                    .close(&trigger.symbol, trigger.price, trigger.reason, now)
            {
                self.ledger.settle_close(trade.margin(), trade.realized_pnl);
                summaries.push(format!(
                    "{} closed ({})",
                    trade.symbol,
                    trade.close_reason.as_str()
                ));
                closed.push(trade.symbol.clone());
                trades.push(trade);
            }
        }

        // 3. One oracle decision per symbol with a fresh snapshot.
        let symbols = self.config.symbols.clone();
        for symbol in &symbols {
            let Some(snapshot) = snapshots.get(symbol) else {
                continue;
            };

            let unrealized = self.positions.total_unrealized(&prices);
            let equity = self.ledger.equity(unrealized);
            let initial = self.ledger.initial_balance();
            let roi = if initial.is_zero() {
                Decimal::ZERO
            } else {
                (equity - initial) / initial
            };

            let request = DecisionRequest {
                snapshot,
                open_position: self.positions.get(symbol),
                equity,
                available_cash: self.ledger.available_cash(),
                roi,
                initial_balance: initial,
            };

            let decision = match self.oracle.decide(&request).await {
                Ok(decision) => decision,
                Err(e) if e.is_fatal() => {
                    return Err(anyhow!(e)).context("decision oracle rejected credentials");
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "no decision this cycle");
                    let raw = e.raw_payload().map(String::from);
                    records.push(DecisionRecord {
                        decision: Decision::hold(symbol, format!("oracle unavailable: {e}")),
                        verdict: DecisionVerdict::Held,
                        raw_payload: raw,
                    });
                    summaries.push(format!("{symbol} skipped"));
                    continue;
                }
            };

            let verdict = self.apply_decision(
                &decision,
                snapshot.price,
                equity,
                now,
                &mut trades,
                &mut closed,
                &mut opened,
            );
            summaries.push(format!(
                "{} {} {}",
                symbol,
                decision.action.as_str(),
                verdict.as_str()
            ));
            records.push(DecisionRecord {
                decision,
                verdict,
                raw_payload: None,
            });
        }

        // 4. Mark to market and persist the whole cycle atomically.
        let unrealized = self.positions.total_unrealized(&prices);
        let snapshot = self.ledger.snapshot(unrealized, now);
        info!(
            equity = %snapshot.equity,
            roi = %snapshot.roi,
            positions = self.positions.len(),
            trades = trades.len(),
            "cycle complete"
        );

        let summary = if summaries.is_empty() {
            "no symbols processed".to_string()
        } else {
            summaries.join("; ")
        };

        self.last_cycle_at = Some(now);
        self.last_summary = Some(summary.clone());

        let outcome = CycleOutcome {
            cycle_id,
            timestamp: now,
            decisions: records,
            closed,
            opened,
            trades,
            snapshot,
            summary,
        };
        self.persist_or_queue(outcome).await;

        Ok(())
    }

    /// Validate a decision and apply the resulting command to the position
    /// manager and the ledger.
    #[allow(clippy::too_many_arguments)]
    fn apply_decision(
        &mut self,
        decision: &Decision,
        price: Decimal,
        equity: Decimal,
        now: DateTime<Utc>,
        trades: &mut Vec<Trade>,
        closed: &mut Vec<String>,
        opened: &mut Vec<Position>,
    ) -> DecisionVerdict {
        let verdict = self.validator.validate(
            decision,
            price,
            self.positions.get(&decision.symbol),
            equity,
            self.ledger.available_cash(),
        );

        match verdict {
            Verdict::Held => DecisionVerdict::Held,
            Verdict::Open(order) => {
                let margin = order.margin();
                match self.positions.open(order, now) {
                    Some(position) => {
                        self.ledger.reserve(margin);
                        opened.push(position.clone());
                        DecisionVerdict::Accepted
                    }
                    None => DecisionVerdict::Rejected {
                        reason: "position slot already occupied".to_string(),
                    },
                }
            }
            Verdict::Close { symbol } => {
                match self
                    .positions
                    .close(&symbol, price, CloseReason::Decision, now)
                {
                    Some(trade) => {
                        self.ledger.settle_close(trade.margin(), trade.realized_pnl);
                        closed.push(trade.symbol.clone());
                        trades.push(trade);
                        DecisionVerdict::Accepted
                    }
                    None => DecisionVerdict::Rejected {
                        reason: "no open position to close".to_string(),
                    },
                }
            }
            Verdict::Rejected(violation) => DecisionVerdict::Rejected {
                reason: violation.to_string(),
            },
        }
    }

    /// Fetch snapshots for all symbols concurrently; failures skip the
    /// symbol for this cycle.
    async fn fetch_snapshots(&self) -> HashMap<String, MarketSnapshot> {
        let fetches = self
            .config
            .symbols
            .iter()
            .map(|symbol| self.market.snapshot(symbol));

        let mut snapshots = HashMap::new();
        for result in join_all(fetches).await {
            match result {
                Ok(snapshot) => {
                    snapshots.insert(snapshot.symbol.clone(), snapshot);
                }
                Err(e) => warn!(error = %e, "skipping symbol this cycle"),
            }
        }
        snapshots
    }

    /// Persist a cycle with bounded retries; queue it on failure so it is
    /// retried before the next cycle starts.
    async fn persist_or_queue(&mut self, outcome: CycleOutcome) {
        match Self::persist_with_retry(&self.db, &outcome).await {
            Ok(()) => {}
            Err(e) => {
                error!(error = %e, cycle_id = %outcome.cycle_id, "cycle persistence failed, queueing");
                self.pending.push(outcome);
            }
        }
    }

    /// Retry any queued cycle writes; entries that still fail stay queued.
    async fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        info!(count = self.pending.len(), "retrying queued cycle writes");
        let mut still_pending = Vec::new();
        for outcome in self.pending.drain(..) {
            match Self::persist_with_retry(&self.db, &outcome).await {
                Ok(()) => info!(cycle_id = %outcome.cycle_id, "queued cycle persisted"),
                Err(e) => {
                    error!(error = %e, cycle_id = %outcome.cycle_id, "queued cycle still failing");
                    still_pending.push(outcome);
                }
            }
        }
        self.pending = still_pending;
    }

    async fn persist_with_retry(db: &Database, outcome: &CycleOutcome) -> Result<()> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        backoff::future::retry(policy, || async {
            db.persist_cycle(outcome)
                .await
                .map_err(backoff::Error::transient)
        })
        .await
    }

    /// Graceful shutdown: final flush and stop marker.
    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down engine...");
        self.running.store(false, Ordering::SeqCst);
        self.flush_pending().await;
        self.db.mark_stopped().await?;
        info!("Engine shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DecisionAction;
    use rust_decimal_macros::dec;

    async fn test_engine() -> Engine {
        let config = EngineConfig {
            initial_balance: dec!(10000),
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let oracle_config = OracleConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            model: "test".to_string(),
            timeout: Duration::from_secs(1),
        };
        Engine::new(config, oracle_config).await.unwrap()
    }

    fn make_decision(action: DecisionAction, confidence: f64) -> Decision {
        Decision {
            symbol: "BTC".to_string(),
            action,
            confidence,
            leverage: dec!(10),
            reasoning: "test".to_string(),
            exit_condition: None,
            exit_condition_price: None,
            stop_loss: None,
            take_profit: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_then_opposing_close_round_trips_the_ledger() {
        let mut engine = test_engine().await;
        let now = Utc::now();
        let (mut trades, mut closed, mut opened) = (Vec::new(), Vec::new(), Vec::new());

        let verdict = engine.apply_decision(
            &make_decision(DecisionAction::Buy, 0.9),
            dec!(100),
            dec!(10000),
            now,
            &mut trades,
            &mut closed,
            &mut opened,
        );
        assert!(matches!(verdict, DecisionVerdict::Accepted));
        assert_eq!(opened.len(), 1);
        // 20% of 10000 equity = 2000 notional at 10x reserves 200 margin.
        assert_eq!(engine.ledger.available_cash(), dec!(9800));
        assert_eq!(engine.ledger.cash(), dec!(10000));

        let verdict = engine.apply_decision(
            &make_decision(DecisionAction::Sell, 0.9),
            dec!(110),
            dec!(10000),
            now,
            &mut trades,
            &mut closed,
            &mut opened,
        );
        assert!(matches!(verdict, DecisionVerdict::Accepted));
        assert_eq!(trades.len(), 1);
        // 20 units * 10x * 10% move, normalized by entry price.
        assert_eq!(trades[0].realized_pnl, dec!(20));
        assert_eq!(engine.ledger.cash(), dec!(10020));
        assert_eq!(engine.ledger.available_cash(), dec!(10020));
        assert!(engine.positions.is_empty());
    }

    #[tokio::test]
    async fn rejected_decision_changes_nothing() {
        let mut engine = test_engine().await;
        let now = Utc::now();
        let (mut trades, mut closed, mut opened) = (Vec::new(), Vec::new(), Vec::new());

        let verdict = engine.apply_decision(
            &make_decision(DecisionAction::Buy, 1.2),
            dec!(100),
            dec!(10000),
            now,
            &mut trades,
            &mut closed,
            &mut opened,
        );

        match verdict {
            DecisionVerdict::Rejected { reason } => {
                assert!(reason.contains("confidence out of range"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(opened.is_empty());
        assert!(engine.positions.is_empty());
        assert_eq!(engine.ledger.available_cash(), dec!(10000));
    }
}
