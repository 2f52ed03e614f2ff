//! Data models for decisions, positions, trades, and portfolio snapshots.

mod decision;
mod position;
mod snapshot;
mod trade;

pub use decision::{Decision, DecisionAction, DecisionVerdict};
pub use position::{Position, PositionSide};
pub use snapshot::PortfolioSnapshot;
pub use trade::{CloseReason, Trade};
