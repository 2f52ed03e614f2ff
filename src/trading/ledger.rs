//! Portfolio ledger: cash, reserved margin, realized PnL, and derived equity.
//!
//! Cash is never debited when a position opens; the margin backing it is
//! tracked separately so `equity = cash + unrealized_pnl` holds at all times
//! while new positions can only draw on `cash - margin_reserved`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::PortfolioSnapshot;

/// Single-owner portfolio accounting state.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    initial_balance: Decimal,
    cash: Decimal,
    margin_reserved: Decimal,
    realized_pnl: Decimal,
}

impl PortfolioLedger {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            cash: initial_balance,
            margin_reserved: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Rebuild from persisted state: the last snapshot's cash and cumulative
    /// realized PnL, plus the margin implied by restored open positions.
    pub fn restore(
        initial_balance: Decimal,
        cash: Decimal,
        realized_pnl: Decimal,
        margin_reserved: Decimal,
    ) -> Self {
        Self {
            initial_balance,
            cash,
            margin_reserved,
            realized_pnl,
        }
    }

    /// Reserve margin for a newly opened position.
    pub fn reserve(&mut self, margin: Decimal) {
        self.margin_reserved += margin;
        debug!(margin = %margin, reserved = %self.margin_reserved, "margin reserved");
    }

    /// Settle a close: release the position's margin and credit its realized
    /// PnL to cash and the cumulative total.
    pub fn settle_close(&mut self, margin: Decimal, realized: Decimal) {
        self.margin_reserved -= margin;
        if self.margin_reserved < Decimal::ZERO {
            self.margin_reserved = Decimal::ZERO;
        }
        self.cash += realized;
        self.realized_pnl += realized;
        debug!(
            realized = %realized,
            cash = %self.cash,
            total_realized = %self.realized_pnl,
            "close settled"
        );
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Cash not backing any open position; the risk validator's budget.
    pub fn available_cash(&self) -> Decimal {
        self.cash - self.margin_reserved
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn equity(&self, unrealized_pnl: Decimal) -> Decimal {
        self.cash + unrealized_pnl
    }

    /// Produce the cycle's immutable snapshot.
    pub fn snapshot(&self, unrealized_pnl: Decimal, timestamp: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot::new(
            timestamp,
            self.cash,
            unrealized_pnl,
            self.realized_pnl,
            self.initial_balance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn idle_ledger_keeps_initial_equity() {
        let ledger = PortfolioLedger::new(dec!(10000));

        // Many hold-only cycles: nothing moves.
        for _ in 0..10 {
            let snap = ledger.snapshot(Decimal::ZERO, Utc::now());
            assert_eq!(snap.equity, dec!(10000));
            assert_eq!(snap.roi, Decimal::ZERO);
        }
    }

    #[test]
    fn reserve_reduces_available_but_not_cash() {
        let mut ledger = PortfolioLedger::new(dec!(10000));
        ledger.reserve(dec!(200));

        assert_eq!(ledger.cash(), dec!(10000));
        assert_eq!(ledger.available_cash(), dec!(9800));
        assert_eq!(ledger.equity(Decimal::ZERO), dec!(10000));
    }

    #[test]
    fn close_credits_realized_pnl() {
        let mut ledger = PortfolioLedger::new(dec!(10000));
        ledger.reserve(dec!(200));
        ledger.settle_close(dec!(200), dec!(1.0));

        assert_eq!(ledger.cash(), dec!(10001.0));
        assert_eq!(ledger.available_cash(), dec!(10001.0));
        assert_eq!(ledger.realized_pnl(), dec!(1.0));

        let snap = ledger.snapshot(Decimal::ZERO, Utc::now());
        assert_eq!(snap.equity, dec!(10001.0));
    }

    #[test]
    fn losses_reduce_cash() {
        let mut ledger = PortfolioLedger::new(dec!(10000));
        ledger.reserve(dec!(500));
        ledger.settle_close(dec!(500), dec!(-75));

        assert_eq!(ledger.cash(), dec!(9925));
        assert_eq!(ledger.realized_pnl(), dec!(-75));
    }

    #[test]
    fn equity_includes_unrealized() {
        let mut ledger = PortfolioLedger::new(dec!(10000));
        ledger.reserve(dec!(200));

        let snap = ledger.snapshot(dec!(50), Utc::now());
        assert_eq!(snap.equity, dec!(10050));
        assert_eq!(snap.unrealized_pnl, dec!(50));
    }
}
