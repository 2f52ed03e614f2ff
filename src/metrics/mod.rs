//! Performance statistics over closed trades.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::Trade;

/// Aggregate performance over a trade history.
#[derive(Debug, Clone, Default)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
}

impl PerformanceStats {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let mut stats = Self::default();
        if trades.is_empty() {
            return stats;
        }

        let pnls: Vec<Decimal> = trades.iter().map(|t| t.realized_pnl).collect();
        let (wins, losses): (Vec<_>, Vec<_>) = pnls.iter().partition(|&&p| p > Decimal::ZERO);

        stats.total_trades = trades.len();
        stats.winning_trades = wins.len();
        stats.losing_trades = losses.len();
        stats.win_rate = wins.len() as f64 / pnls.len() as f64;
        stats.total_pnl = pnls.iter().copied().sum();
        stats.avg_pnl = stats.total_pnl / Decimal::from(pnls.len() as u32);
        stats.best_trade = pnls.iter().copied().max().unwrap_or(Decimal::ZERO);
        stats.worst_trade = pnls.iter().copied().min().unwrap_or(Decimal::ZERO);

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().copied().map(|l: &Decimal| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            stats.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        }

        let returns: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
        if returns.len() > 1 {
            let mean = returns.clone().mean();
            let std_dev = returns.clone().std_dev();
            if std_dev > 0.0 {
                stats.sharpe_ratio = mean / std_dev;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloseReason, PositionSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_trade(pnl: Decimal) -> Trade {
        Trade {
            symbol: "BTC".to_string(),
            side: PositionSide::Long,
            size: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(110),
            leverage: dec!(5),
            realized_pnl: pnl,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            close_reason: CloseReason::Decision,
        }
    }

    #[test]
    fn empty_history_is_all_zeros() {
        let stats = PerformanceStats::from_trades(&[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
    }

    #[test]
    fn win_loss_split() {
        let trades = vec![
            make_trade(dec!(10)),
            make_trade(dec!(-5)),
            make_trade(dec!(20)),
            make_trade(dec!(-10)),
        ];
        let stats = PerformanceStats::from_trades(&trades);

        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 2);
        assert_eq!(stats.win_rate, 0.5);
        assert_eq!(stats.total_pnl, dec!(15));
        assert_eq!(stats.best_trade, dec!(20));
        assert_eq!(stats.worst_trade, dec!(-10));
        assert_eq!(stats.profit_factor, 2.0);
    }
}
