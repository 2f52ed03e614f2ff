//! Exit plan monitoring.
//!
//! Every cycle, before any new decision is considered, each open position is
//! checked against its exit plan: take-profit, stop-loss, and the oracle's
//! invalidation condition. Triggered closes bypass the risk validator since
//! closing never increases risk.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::models::{CloseReason, Position, PositionSide};

/// A close command issued by the monitor for one open position.
#[derive(Debug, Clone)]
pub struct ExitTrigger {
    pub symbol: String,
    pub reason: CloseReason,
    pub price: Decimal,
}

/// Evaluates exit plans for open positions against fresh prices.
pub struct ExitPlanMonitor;

impl ExitPlanMonitor {
    /// Check every open position with a fresh price; returns at most one
    /// trigger per position (first matching rule wins).
    pub fn check<'a>(
        positions: impl Iterator<Item = &'a Position>,
        prices: &HashMap<String, Decimal>,
    ) -> Vec<ExitTrigger> {
        let mut triggers = Vec::new();

        for position in positions {
            let Some(&price) = prices.get(&position.symbol) else {
                // No fresh price this cycle; the plan is re-checked next cycle.
                debug!(symbol = %position.symbol, "no price for exit check, skipping");
                continue;
            };

            if let Some(reason) = Self::check_position(position, price) {
                info!(
                    symbol = %position.symbol,
                    price = %price,
                    reason = reason.as_str(),
                    "exit plan triggered"
                );
                triggers.push(ExitTrigger {
                    symbol: position.symbol.clone(),
                    reason,
                    price,
                });
            }
        }

        triggers
    }

    fn check_position(position: &Position, price: Decimal) -> Option<CloseReason> {
        let adverse = |level: Decimal| match position.side {
            PositionSide::Long => price <= level,
            PositionSide::Short => price >= level,
        };
        let favorable = |level: Decimal| match position.side {
            PositionSide::Long => price >= level,
            PositionSide::Short => price <= level,
        };

        if let Some(tp) = position.take_profit {
            if favorable(tp) {
                return Some(CloseReason::TakeProfit);
            }
        }

        if adverse(position.stop_loss) {
            return Some(CloseReason::StopLoss);
        }

        if let Some(level) = exit_condition_level(position) {
            if adverse(level) {
                return Some(CloseReason::ExitCondition);
            }
        }

        None
    }
}

/// The enforceable price level of a position's invalidation condition:
/// the oracle's explicit level when given, otherwise a best-effort parse of
/// the free text. Text without an extractable level stays advisory.
fn exit_condition_level(position: &Position) -> Option<Decimal> {
    position.exit_condition_price.or_else(|| {
        position
            .exit_condition
            .as_deref()
            .and_then(parse_price_level)
    })
}

/// Extract a price level from free text like "4-hour candle closes below
/// 105000". Takes the last standalone number, since conditions phrase the
/// level at the end; tokens like "4-hour" do not parse and are skipped.
pub fn parse_price_level(text: &str) -> Option<Decimal> {
    text.split_whitespace()
        .filter_map(|token| {
            let cleaned: String = token
                .trim_start_matches(['$', '('])
                .trim_end_matches([')', '.', ',', ';', ':', '!', '?'])
                .chars()
                .filter(|c| *c != ',')
                .collect();
            cleaned.parse::<Decimal>().ok()
        })
        .filter(|level| *level > Decimal::ZERO)
        .last()
}
