//! Position lifecycle management.
//!
//! A symbol moves through `none -> open -> closed`; closing frees the slot so
//! the symbol can be opened again later. The map is keyed by symbol, which
//! makes "at most one open position per symbol" structural.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::models::{CloseReason, Position, Trade};

use super::risk::OpenOrder;

/// Owns the open-position map and performs all lifecycle transitions.
#[derive(Debug, Default)]
pub struct PositionManager {
    positions: HashMap<String, Position>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted open positions on startup.
    pub fn restore(positions: Vec<Position>) -> Self {
        let positions = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        Self { positions }
    }

    /// Open a position from a validated order.
    ///
    /// Refuses if a position is already open for the symbol; the risk
    /// validator should have prevented this, so it is only logged.
    pub fn open(&mut self, order: OpenOrder, opened_at: DateTime<Utc>) -> Option<&Position> {
        if self.positions.contains_key(&order.symbol) {
            warn!(symbol = %order.symbol, "open refused: position already exists");
            return None;
        }

        let position = Position {
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.size,
            entry_price: order.entry_price,
            leverage: order.leverage,
            confidence: order.confidence,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            exit_condition: order.exit_condition,
            exit_condition_price: order.exit_condition_price,
            opened_at,
        };

        info!(
            symbol = %position.symbol,
            side = position.side.as_str(),
            size = %position.size,
            entry = %position.entry_price,
            leverage = %position.leverage,
            stop_loss = %position.stop_loss,
            exit_condition = position.exit_condition.as_deref().unwrap_or("none"),
            "position opened"
        );

        let symbol = position.symbol.clone();
        self.positions.insert(symbol.clone(), position);
        self.positions.get(&symbol)
    }

    /// Close the symbol's open position at the given price.
    ///
    /// Idempotent: closing a symbol with no open position is a logged no-op
    /// and produces no trade.
    pub fn close(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Option<Trade> {
        let Some(position) = self.positions.remove(symbol) else {
            warn!(symbol, "close requested for symbol with no open position");
            return None;
        };

        let trade = position.into_trade(exit_price, reason, closed_at);
        info!(
            symbol = %trade.symbol,
            side = trade.side.as_str(),
            exit = %trade.exit_price,
            pnl = %trade.realized_pnl,
            reason = trade.close_reason.as_str(),
            "position closed"
        );

        Some(trade)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Sum of unrealized PnL over all open positions at the given prices.
    /// Positions without a fresh price mark at zero for the cycle.
    pub fn total_unrealized(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .map(|p| {
                prices
                    .get(&p.symbol)
                    .map(|price| p.unrealized_pnl(*price))
                    .unwrap_or(Decimal::ZERO)
            })
            .sum()
    }

    /// Sum of margin reserved by all open positions.
    pub fn total_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.margin()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn make_order(symbol: &str, side: PositionSide) -> OpenOrder {
        OpenOrder {
            symbol: symbol.to_string(),
            side,
            size: dec!(1),
            entry_price: dec!(100),
            leverage: dec!(10),
            confidence: 0.8,
            stop_loss: dec!(85),
            take_profit: Some(dec!(120)),
            exit_condition: None,
            exit_condition_price: None,
        }
    }

    #[test]
    fn open_then_close_produces_trade() {
        let mut manager = PositionManager::new();
        manager.open(make_order("BTC", PositionSide::Long), Utc::now());
        assert_eq!(manager.len(), 1);

        let trade = manager
            .close("BTC", dec!(110), CloseReason::Decision, Utc::now())
            .unwrap();
        assert_eq!(trade.realized_pnl, dec!(1.0));
        assert!(manager.is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let mut manager = PositionManager::new();
        manager.open(make_order("BTC", PositionSide::Long), Utc::now());

        assert!(manager
            .close("BTC", dec!(110), CloseReason::Decision, Utc::now())
            .is_some());
        assert!(manager
            .close("BTC", dec!(110), CloseReason::Decision, Utc::now())
            .is_none());
    }

    #[test]
    fn closing_unknown_symbol_is_a_no_op() {
        let mut manager = PositionManager::new();
        assert!(manager
            .close("ETH", dec!(100), CloseReason::Manual, Utc::now())
            .is_none());
    }

    #[test]
    fn duplicate_open_is_refused() {
        let mut manager = PositionManager::new();
        assert!(manager
            .open(make_order("BTC", PositionSide::Long), Utc::now())
            .is_some());
        assert!(manager
            .open(make_order("BTC", PositionSide::Short), Utc::now())
            .is_none());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get("BTC").unwrap().side, PositionSide::Long);
    }

    #[test]
    fn symbol_can_reopen_after_close() {
        let mut manager = PositionManager::new();
        manager.open(make_order("BTC", PositionSide::Long), Utc::now());
        manager.close("BTC", dec!(105), CloseReason::TakeProfit, Utc::now());

        assert!(manager
            .open(make_order("BTC", PositionSide::Short), Utc::now())
            .is_some());
        assert_eq!(manager.get("BTC").unwrap().side, PositionSide::Short);
    }

    #[test]
    fn short_closed_higher_realizes_loss() {
        let mut manager = PositionManager::new();
        manager.open(make_order("ETH", PositionSide::Short), Utc::now());

        let trade = manager
            .close("ETH", dec!(110), CloseReason::StopLoss, Utc::now())
            .unwrap();
        assert!(trade.realized_pnl < Decimal::ZERO);
    }

    // Random open/close sequences never leave more than one open position
    // per symbol, and every close emits at most one trade.
    #[test]
    fn random_sequences_keep_one_position_per_symbol() {
        let symbols = ["BTC", "ETH", "SOL"];
        let mut manager = PositionManager::new();
        let mut trades = 0usize;
        let mut closes_with_position = 0usize;

        // Deterministic LCG so the sequence is reproducible.
        let mut state: u64 = 0x5EED;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };

        for _ in 0..500 {
            let symbol = symbols[next() % symbols.len()];
            match next() % 3 {
                0 => {
                    let side = if next() % 2 == 0 {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    };
                    manager.open(make_order(symbol, side), Utc::now());
                }
                1 => {
                    if manager.get(symbol).is_some() {
                        closes_with_position += 1;
                    }
                    if manager
                        .close(symbol, dec!(101), CloseReason::Decision, Utc::now())
                        .is_some()
                    {
                        trades += 1;
                    }
                }
                _ => {} // hold
            }

            assert!(manager.len() <= symbols.len());
            for symbol in &symbols {
                // HashMap keying makes >1 impossible; assert the slot is
                // either empty or holds the right symbol.
                if let Some(pos) = manager.get(symbol) {
                    assert_eq!(pos.symbol, *symbol);
                }
            }
        }

        assert_eq!(trades, closes_with_position);
    }
}
