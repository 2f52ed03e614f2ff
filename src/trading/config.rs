//! Trading configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk limits applied to every oracle decision before it may affect state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Upper leverage bound; accepted decisions are clamped into [1, max_leverage]
    pub max_leverage: Decimal,

    /// Fraction of current equity committed as notional per new position
    pub max_position_size: Decimal,

    /// Loss fraction for the synthesized stop-loss when the oracle omits one
    pub default_stop_loss_pct: Decimal,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_leverage: dec!(20),          // 20x cap
            max_position_size: dec!(0.2),    // 20% of equity per position
            default_stop_loss_pct: dec!(0.15), // -15% backstop
        }
    }
}
