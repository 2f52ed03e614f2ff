//! External collaborators: the decision oracle and the market data feed.

mod market;
mod oracle;
mod types;

pub use market::{MarketClient, MarketSnapshot, MarketUnavailable};
pub use oracle::{parse_decision, DecisionRequest, OracleClient, OracleConfig, OracleError};
