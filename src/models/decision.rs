//! Decision model: one oracle-produced trading recommendation for a symbol.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action recommended by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Buy,
    Sell,
    Hold,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Buy => "BUY",
            DecisionAction::Sell => "SELL",
            DecisionAction::Hold => "HOLD",
        }
    }
}

/// One trading recommendation produced by the decision oracle.
///
/// Immutable once logged; the risk validator never mutates a decision, it
/// derives commands from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Symbol the decision applies to (e.g., "BTC")
    pub symbol: String,

    /// Recommended action
    pub action: DecisionAction,

    /// Oracle's confidence in the decision, expected in [0, 1]
    pub confidence: f64,

    /// Requested leverage multiplier
    pub leverage: Decimal,

    /// Oracle's stated rationale
    pub reasoning: String,

    /// Free-text invalidation condition (e.g., "4-hour close below 105000")
    pub exit_condition: Option<String>,

    /// Explicit numeric price level for the invalidation condition,
    /// when the oracle supplies one
    pub exit_condition_price: Option<Decimal>,

    /// Price at which to cut losses
    pub stop_loss: Option<Decimal>,

    /// Price at which to take profit
    pub take_profit: Option<Decimal>,

    /// When the decision was received
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    /// A synthetic HOLD used when the oracle could not produce a decision
    /// for the symbol this cycle (rate limit, timeout, malformed payload).
    pub fn hold(symbol: &str, reasoning: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: DecisionAction::Hold,
            confidence: 0.0,
            leverage: Decimal::ONE,
            reasoning: reasoning.into(),
            exit_condition: None,
            exit_condition_price: None,
            stop_loss: None,
            take_profit: None,
            timestamp: Utc::now(),
        }
    }
}

/// The risk validator's verdict on a decision, persisted with it for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionVerdict {
    /// Decision passed validation and produced a position command
    Accepted,
    /// HOLD (explicit or synthesized): nothing to validate
    Held,
    /// Decision violated a risk limit and was discarded
    Rejected { reason: String },
}

impl DecisionVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionVerdict::Accepted => "accepted",
            DecisionVerdict::Held => "held",
            DecisionVerdict::Rejected { .. } => "rejected",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            DecisionVerdict::Rejected { reason } => Some(reason),
            _ => None,
        }
    }
}
