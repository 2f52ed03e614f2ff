//! Trade model: the immutable record of a closed position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PositionSide;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Price crossed the stop-loss level
    StopLoss,
    /// Price crossed the take-profit level
    TakeProfit,
    /// The free-text invalidation condition's price level was crossed
    ExitCondition,
    /// An accepted opposing decision closed the position
    Decision,
    /// Operator-initiated close
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::ExitCondition => "exit_condition",
            CloseReason::Decision => "decision",
            CloseReason::Manual => "manual",
        }
    }
}

impl std::str::FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_loss" => Ok(CloseReason::StopLoss),
            "take_profit" => Ok(CloseReason::TakeProfit),
            "exit_condition" => Ok(CloseReason::ExitCondition),
            "decision" => Ok(CloseReason::Decision),
            "manual" => Ok(CloseReason::Manual),
            other => Err(format!("unknown close reason: {other}")),
        }
    }
}

/// Record created when a position transitions OPEN -> CLOSED. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub leverage: Decimal,

    /// side_sign * size * leverage * (exit - entry) / entry
    pub realized_pnl: Decimal,

    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub close_reason: CloseReason,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    /// Margin the position reserved while open; released on close.
    pub fn margin(&self) -> Decimal {
        if self.leverage.is_zero() {
            return self.size * self.entry_price;
        }
        self.size * self.entry_price / self.leverage
    }
}
