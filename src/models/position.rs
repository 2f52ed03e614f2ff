//! Position model: one simulated open leveraged exposure to a symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CloseReason, Trade};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// +1 for long, -1 for short; the sign applied to price moves in PnL math.
    pub fn sign(&self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::str::FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side: {other}")),
        }
    }
}

/// An open simulated position.
///
/// At most one open position exists per symbol; the position manager keys
/// its map by symbol and the risk validator rejects duplicate-side entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    pub side: PositionSide,

    /// Base-asset quantity
    pub size: Decimal,

    /// Snapshot price at open
    pub entry_price: Decimal,

    /// Leverage after clamping, always within the configured bounds
    pub leverage: Decimal,

    /// Oracle confidence at open
    pub confidence: f64,

    /// Mandatory loss backstop; synthesized by the risk validator when the
    /// oracle omitted one
    pub stop_loss: Decimal,

    pub take_profit: Option<Decimal>,

    /// Free-text invalidation condition, advisory unless a price level is
    /// attached or extractable
    pub exit_condition: Option<String>,

    /// Enforceable price level for the invalidation condition
    pub exit_condition_price: Option<Decimal>,

    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Leveraged entry-price-normalized PnL at the given mark price.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.sign() * self.size * self.leverage * (price - self.entry_price)
            / self.entry_price
    }

    /// Leveraged return fraction at the given mark price.
    pub fn return_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.side.sign() * self.leverage * (price - self.entry_price) / self.entry_price
    }

    /// Exposure at entry.
    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }

    /// Cash backing the position: notional divided by leverage.
    pub fn margin(&self) -> Decimal {
        if self.leverage.is_zero() {
            return self.notional();
        }
        self.notional() / self.leverage
    }

    /// Consume the position into its closed-trade record.
    pub fn into_trade(
        self,
        exit_price: Decimal,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Trade {
        let realized_pnl = self.unrealized_pnl(exit_price);
        Trade {
            symbol: self.symbol,
            side: self.side,
            size: self.size,
            entry_price: self.entry_price,
            exit_price,
            leverage: self.leverage,
            realized_pnl,
            opened_at: self.opened_at,
            closed_at,
            close_reason: reason,
        }
    }
}
