//! Portfolio snapshot: one immutable equity record per cycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time portfolio state, appended once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,

    /// Cash including margin reserved by open positions
    pub cash: Decimal,

    /// Sum of unrealized PnL over all open positions
    pub unrealized_pnl: Decimal,

    /// Cumulative realized PnL over all closed trades
    pub realized_pnl: Decimal,

    /// cash + unrealized_pnl
    pub equity: Decimal,

    /// (equity - initial_balance) / initial_balance
    pub roi: Decimal,
}

impl PortfolioSnapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        cash: Decimal,
        unrealized_pnl: Decimal,
        realized_pnl: Decimal,
        initial_balance: Decimal,
    ) -> Self {
        let equity = cash + unrealized_pnl;
        let roi = if initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            (equity - initial_balance) / initial_balance
        };

        Self {
            timestamp,
            cash,
            unrealized_pnl,
            realized_pnl,
            equity,
            roi,
        }
    }
}
