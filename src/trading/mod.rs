//! Trading core: risk validation, position lifecycle, exit plans, ledger.

mod config;
mod exit_monitor;
mod ledger;
mod position_manager;
mod risk;

pub use config::TradingConfig;
pub use exit_monitor::{parse_price_level, ExitPlanMonitor, ExitTrigger};
pub use ledger::PortfolioLedger;
pub use position_manager::PositionManager;
pub use risk::{OpenOrder, RiskValidator, RiskViolation, Verdict};
