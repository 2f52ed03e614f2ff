//! Database persistence for engine state, positions, trades, decisions, and
//! the equity history.
//!
//! Everything a cycle produces is written in a single transaction so readers
//! never observe a trade without its snapshot or a freed position slot
//! without its realized PnL.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    CloseReason, Decision, DecisionVerdict, PortfolioSnapshot, Position, Trade,
};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// A decision plus the risk validator's verdict, persisted for audit.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub decision: Decision,
    pub verdict: DecisionVerdict,
    /// Raw oracle payload kept when parsing failed
    pub raw_payload: Option<String>,
}

/// Everything one cycle produced; persisted atomically.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle_id: String,
    pub timestamp: DateTime<Utc>,
    pub decisions: Vec<DecisionRecord>,
    /// Symbols whose positions closed this cycle
    pub closed: Vec<String>,
    /// Positions opened this cycle
    pub opened: Vec<Position>,
    pub trades: Vec<Trade>,
    pub snapshot: PortfolioSnapshot,
    pub summary: String,
}

/// Engine state row (single row, id = 1).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EngineState {
    pub id: i64,
    pub initial_balance: f64,
    pub is_running: bool,
    pub last_cycle_at: Option<String>,
    pub last_summary: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Stored open position row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: f64,
    pub confidence: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub exit_condition: Option<String>,
    pub exit_condition_price: Option<f64>,
    pub opened_at: String,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub cycle_id: String,
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub leverage: f64,
    pub realized_pnl: f64,
    pub opened_at: String,
    pub closed_at: String,
    pub close_reason: String,
}

/// Stored decision-log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDecision {
    pub id: i64,
    pub cycle_id: String,
    pub timestamp: String,
    pub symbol: String,
    pub action: String,
    pub confidence: f64,
    pub leverage: f64,
    pub reasoning: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_condition: Option<String>,
    pub verdict: String,
    pub verdict_reason: Option<String>,
    pub raw_payload: Option<String>,
}

/// Equity history point.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EquityPoint {
    pub id: i64,
    pub cycle_id: String,
    pub timestamp: String,
    pub cash: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub equity: f64,
    pub roi: f64,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl StoredPosition {
    pub fn into_position(self) -> Result<Position> {
        let side = self
            .side
            .parse()
            .map_err(|e: String| anyhow!(e))
            .context("corrupt position row")?;

        Ok(Position {
            symbol: self.symbol,
            side,
            size: to_decimal(self.size),
            entry_price: to_decimal(self.entry_price),
            leverage: to_decimal(self.leverage),
            confidence: self.confidence,
            stop_loss: to_decimal(self.stop_loss),
            take_profit: self.take_profit.map(to_decimal),
            exit_condition: self.exit_condition,
            exit_condition_price: self.exit_condition_price.map(to_decimal),
            opened_at: parse_timestamp(&self.opened_at),
        })
    }
}

impl StoredTrade {
    pub fn into_trade(self) -> Result<Trade> {
        let side = self
            .side
            .parse()
            .map_err(|e: String| anyhow!(e))
            .context("corrupt trade row")?;
        let close_reason: CloseReason = self
            .close_reason
            .parse()
            .map_err(|e: String| anyhow!(e))
            .context("corrupt trade row")?;

        Ok(Trade {
            symbol: self.symbol,
            side,
            size: to_decimal(self.size),
            entry_price: to_decimal(self.entry_price),
            exit_price: to_decimal(self.exit_price),
            leverage: to_decimal(self.leverage),
            realized_pnl: to_decimal(self.realized_pnl),
            opened_at: parse_timestamp(&self.opened_at),
            closed_at: parse_timestamp(&self.closed_at),
            close_reason,
        })
    }
}

impl Database {
    /// Create a new database connection and run migrations.
    ///
    /// SQLite allows a single writer and the engine is the only writer;
    /// one pooled connection also keeps `sqlite::memory:` on one database.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                initial_balance REAL NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_cycle_at TEXT,
                last_summary TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Open positions only; a close deletes the row and the trade record
        // keeps the history. The primary key enforces one open position per
        // symbol at the storage layer too.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                size REAL NOT NULL,
                entry_price REAL NOT NULL,
                leverage REAL NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                stop_loss REAL NOT NULL,
                take_profit REAL,
                exit_condition TEXT,
                exit_condition_price REAL,
                opened_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                leverage REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT NOT NULL,
                close_reason TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                action TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                leverage REAL NOT NULL DEFAULT 1,
                reasoning TEXT NOT NULL DEFAULT '',
                stop_loss REAL,
                take_profit REAL,
                exit_condition TEXT,
                verdict TEXT NOT NULL,
                verdict_reason TEXT,
                raw_payload TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                cash REAL NOT NULL,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0,
                equity REAL NOT NULL,
                roi REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_time ON ai_decisions(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_time ON portfolio_snapshots(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Engine state ====================

    /// Initialize or resume the engine-state row.
    pub async fn init_engine_state(&self, initial_balance: f64) -> Result<EngineState> {
        sqlx::query(
            r#"
            INSERT INTO engine_state (id, initial_balance, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                is_running = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(initial_balance)
        .execute(&self.pool)
        .await?;

        self.engine_state().await
    }

    pub async fn engine_state(&self) -> Result<EngineState> {
        sqlx::query_as::<_, EngineState>("SELECT * FROM engine_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Engine state not initialized")
    }

    pub async fn mark_stopped(&self) -> Result<()> {
        sqlx::query(
            "UPDATE engine_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Cycle persistence ====================

    /// Persist everything one cycle produced in a single transaction.
    pub async fn persist_cycle(&self, outcome: &CycleOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin cycle transaction")?;
        let cycle_ts = outcome.timestamp.to_rfc3339();

        for trade in &outcome.trades {
            sqlx::query(
                r#"
                INSERT INTO trades (
                    cycle_id, symbol, side, size, entry_price, exit_price,
                    leverage, realized_pnl, opened_at, closed_at, close_reason
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&outcome.cycle_id)
            .bind(&trade.symbol)
            .bind(trade.side.as_str())
            .bind(to_f64(trade.size))
            .bind(to_f64(trade.entry_price))
            .bind(to_f64(trade.exit_price))
            .bind(to_f64(trade.leverage))
            .bind(to_f64(trade.realized_pnl))
            .bind(trade.opened_at.to_rfc3339())
            .bind(trade.closed_at.to_rfc3339())
            .bind(trade.close_reason.as_str())
            .execute(&mut *tx)
            .await?;
        }

        // Closes before opens: a symbol can close and reopen within one cycle.
        for symbol in &outcome.closed {
            sqlx::query("DELETE FROM positions WHERE symbol = ?")
                .bind(symbol)
                .execute(&mut *tx)
                .await?;
        }

        for position in &outcome.opened {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO positions (
                    symbol, side, size, entry_price, leverage, confidence,
                    stop_loss, take_profit, exit_condition, exit_condition_price, opened_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&position.symbol)
            .bind(position.side.as_str())
            .bind(to_f64(position.size))
            .bind(to_f64(position.entry_price))
            .bind(to_f64(position.leverage))
            .bind(position.confidence)
            .bind(to_f64(position.stop_loss))
            .bind(position.take_profit.map(to_f64))
            .bind(&position.exit_condition)
            .bind(position.exit_condition_price.map(to_f64))
            .bind(position.opened_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for record in &outcome.decisions {
            let decision = &record.decision;
            sqlx::query(
                r#"
                INSERT INTO ai_decisions (
                    cycle_id, timestamp, symbol, action, confidence, leverage,
                    reasoning, stop_loss, take_profit, exit_condition,
                    verdict, verdict_reason, raw_payload
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&outcome.cycle_id)
            .bind(decision.timestamp.to_rfc3339())
            .bind(&decision.symbol)
            .bind(decision.action.as_str())
            .bind(decision.confidence)
            .bind(to_f64(decision.leverage))
            .bind(&decision.reasoning)
            .bind(decision.stop_loss.map(to_f64))
            .bind(decision.take_profit.map(to_f64))
            .bind(&decision.exit_condition)
            .bind(record.verdict.as_str())
            .bind(record.verdict.reason())
            .bind(&record.raw_payload)
            .execute(&mut *tx)
            .await?;
        }

        let snapshot = &outcome.snapshot;
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (
                cycle_id, timestamp, cash, unrealized_pnl, realized_pnl, equity, roi
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.cycle_id)
        .bind(snapshot.timestamp.to_rfc3339())
        .bind(to_f64(snapshot.cash))
        .bind(to_f64(snapshot.unrealized_pnl))
        .bind(to_f64(snapshot.realized_pnl))
        .bind(to_f64(snapshot.equity))
        .bind(to_f64(snapshot.roi))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE engine_state SET
                last_cycle_at = ?,
                last_summary = ?,
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(&cycle_ts)
        .bind(&outcome.summary)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("commit cycle transaction")?;
        Ok(())
    }

    // ==================== Queries ====================

    /// All open positions, oldest first.
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            "SELECT * FROM positions ORDER BY opened_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        rows.into_iter().map(StoredPosition::into_position).collect()
    }

    /// Closed trades for one symbol, newest first.
    pub async fn trades_by_symbol(&self, symbol: &str, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades WHERE symbol = ? ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    /// All closed trades, newest first.
    pub async fn all_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(StoredTrade::into_trade).collect()
    }

    /// Equity history, newest first.
    pub async fn equity_history(&self, limit: i64) -> Result<Vec<EquityPoint>> {
        sqlx::query_as::<_, EquityPoint>(
            "SELECT * FROM portfolio_snapshots ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch equity history")
    }

    /// Equity as of a point in time: the last snapshot at or before it.
    pub async fn equity_at(&self, at: DateTime<Utc>) -> Result<Option<EquityPoint>> {
        sqlx::query_as::<_, EquityPoint>(
            "SELECT * FROM portfolio_snapshots WHERE timestamp <= ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(at.to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch equity at time")
    }

    /// The most recent snapshot, if any cycle has completed.
    pub async fn latest_snapshot(&self) -> Result<Option<EquityPoint>> {
        sqlx::query_as::<_, EquityPoint>(
            "SELECT * FROM portfolio_snapshots ORDER BY timestamp DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest snapshot")
    }

    /// Decision audit log, newest first.
    pub async fn recent_decisions(&self, limit: i64) -> Result<Vec<StoredDecision>> {
        sqlx::query_as::<_, StoredDecision>(
            "SELECT * FROM ai_decisions ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch decisions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionAction, PositionSide};
    use rust_decimal_macros::dec;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn make_outcome(cycle_id: &str) -> CycleOutcome {
        let now = Utc::now();
        let position = Position {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            size: dec!(0.02),
            entry_price: dec!(100000),
            leverage: dec!(10),
            confidence: 0.8,
            stop_loss: dec!(95000),
            take_profit: Some(dec!(110000)),
            exit_condition: Some("4-hour close below 97000".to_string()),
            exit_condition_price: Some(dec!(97000)),
            opened_at: now,
        };

        let decision = Decision {
            symbol: "BTC".to_string(),
            action: DecisionAction::Buy,
            confidence: 0.8,
            leverage: dec!(10),
            reasoning: "test".to_string(),
            exit_condition: None,
            exit_condition_price: None,
            stop_loss: None,
            take_profit: None,
            timestamp: now,
        };

        CycleOutcome {
            cycle_id: cycle_id.to_string(),
            timestamp: now,
            decisions: vec![DecisionRecord {
                decision,
                verdict: DecisionVerdict::Accepted,
                raw_payload: None,
            }],
            closed: vec![],
            opened: vec![position],
            trades: vec![],
            snapshot: PortfolioSnapshot::new(now, dec!(10000), dec!(0), dec!(0), dec!(10000)),
            summary: "BTC: BUY accepted".to_string(),
        }
    }

    #[tokio::test]
    async fn cycle_round_trips_through_storage() {
        let db = memory_db().await;
        db.init_engine_state(10000.0).await.unwrap();
        db.persist_cycle(&make_outcome("c1")).await.unwrap();

        let positions = db.open_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTC");
        assert_eq!(positions[0].side, PositionSide::Long);
        assert_eq!(positions[0].exit_condition_price, Some(dec!(97000)));

        let decisions = db.recent_decisions(10).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].verdict, "accepted");

        let history = db.equity_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].equity, 10000.0);
    }

    #[tokio::test]
    async fn close_frees_the_position_slot() {
        let db = memory_db().await;
        db.init_engine_state(10000.0).await.unwrap();
        db.persist_cycle(&make_outcome("c1")).await.unwrap();

        let now = Utc::now();
        let trade = Trade {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            size: dec!(0.02),
            entry_price: dec!(100000),
            exit_price: dec!(110000),
            leverage: dec!(10),
            realized_pnl: dec!(0.02),
            opened_at: now,
            closed_at: now,
            close_reason: CloseReason::TakeProfit,
        };

        let mut outcome = make_outcome("c2");
        outcome.opened.clear();
        outcome.decisions.clear();
        outcome.closed = vec!["BTC".to_string()];
        outcome.trades = vec![trade];
        db.persist_cycle(&outcome).await.unwrap();

        assert!(db.open_positions().await.unwrap().is_empty());

        let trades = db.trades_by_symbol("BTC", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].close_reason, CloseReason::TakeProfit);
        assert_eq!(trades[0].realized_pnl, dec!(0.02));
    }

    #[tokio::test]
    async fn rejected_decisions_are_audited() {
        let db = memory_db().await;
        db.init_engine_state(10000.0).await.unwrap();

        let mut outcome = make_outcome("c1");
        outcome.opened.clear();
        outcome.decisions[0].decision.confidence = 1.2;
        outcome.decisions[0].verdict = DecisionVerdict::Rejected {
            reason: "confidence out of range: 1.2".to_string(),
        };
        db.persist_cycle(&outcome).await.unwrap();

        let decisions = db.recent_decisions(10).await.unwrap();
        assert_eq!(decisions[0].verdict, "rejected");
        assert!(decisions[0]
            .verdict_reason
            .as_deref()
            .unwrap()
            .contains("confidence out of range"));
    }

    #[tokio::test]
    async fn equity_at_picks_the_last_snapshot_before_t() {
        let db = memory_db().await;
        db.init_engine_state(10000.0).await.unwrap();

        let mut early = make_outcome("c1");
        early.opened.clear();
        early.decisions.clear();
        early.timestamp = Utc::now() - chrono::Duration::hours(2);
        early.snapshot = PortfolioSnapshot::new(
            early.timestamp,
            dec!(10000),
            dec!(0),
            dec!(0),
            dec!(10000),
        );
        db.persist_cycle(&early).await.unwrap();

        let mut late = make_outcome("c2");
        late.opened.clear();
        late.decisions.clear();
        late.snapshot =
            PortfolioSnapshot::new(late.timestamp, dec!(10500), dec!(0), dec!(500), dec!(10000));
        db.persist_cycle(&late).await.unwrap();

        let mid = Utc::now() - chrono::Duration::hours(1);
        let point = db.equity_at(mid).await.unwrap().unwrap();
        assert_eq!(point.equity, 10000.0);

        let now_point = db.equity_at(Utc::now()).await.unwrap().unwrap();
        assert_eq!(now_point.equity, 10500.0);

        let before_everything = Utc::now() - chrono::Duration::hours(3);
        assert!(db.equity_at(before_everything).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn engine_state_tracks_running_flag() {
        let db = memory_db().await;
        let state = db.init_engine_state(5000.0).await.unwrap();
        assert!(state.is_running);
        assert_eq!(state.initial_balance, 5000.0);

        db.mark_stopped().await.unwrap();
        assert!(!db.engine_state().await.unwrap().is_running);
    }
}
