//! Risk validation: the gatekeeper between an oracle decision and any state
//! mutation.
//!
//! Every decision passes through here exactly once per cycle. The output is
//! either a position command (open or close) or a rejection that is logged
//! and has no side effect.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Decision, DecisionAction, Position, PositionSide};

use super::TradingConfig;

/// A risk limit violated by a decision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskViolation {
    #[error("confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),

    #[error("non-positive leverage: {0}")]
    NonPositiveLeverage(Decimal),

    #[error("position already open for {symbol} on the {side} side")]
    DuplicatePosition { symbol: String, side: &'static str },

    #[error("insufficient cash: margin {required} exceeds available {available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },

    #[error("non-positive snapshot price: {0}")]
    NonPositivePrice(Decimal),
}

/// A validated request to open a position, forwarded to the position manager.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub confidence: f64,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub exit_condition: Option<String>,
    pub exit_condition_price: Option<Decimal>,
}

impl OpenOrder {
    /// Cash the ledger must reserve for this order.
    pub fn margin(&self) -> Decimal {
        self.size * self.entry_price / self.leverage
    }
}

/// Outcome of validating one decision.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// HOLD: nothing changes
    Held,
    /// Open a new position
    Open(OpenOrder),
    /// Opposing decision on an open position: close it
    Close { symbol: String },
    /// Decision violated a limit; no state change
    Rejected(RiskViolation),
}

/// Applies static and portfolio-relative limits to decisions.
pub struct RiskValidator {
    config: TradingConfig,
}

impl RiskValidator {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Validate one decision against the current price, the symbol's open
    /// position (if any), and the portfolio's equity and available cash.
    pub fn validate(
        &self,
        decision: &Decision,
        price: Decimal,
        open_position: Option<&Position>,
        equity: Decimal,
        available_cash: Decimal,
    ) -> Verdict {
        if decision.action == DecisionAction::Hold {
            debug!(symbol = %decision.symbol, "decision held");
            return Verdict::Held;
        }

        if !(0.0..=1.0).contains(&decision.confidence) {
            warn!(
                symbol = %decision.symbol,
                confidence = decision.confidence,
                "rejecting decision: confidence out of range"
            );
            return Verdict::Rejected(RiskViolation::ConfidenceOutOfRange(decision.confidence));
        }

        if decision.leverage <= Decimal::ZERO {
            warn!(
                symbol = %decision.symbol,
                leverage = %decision.leverage,
                "rejecting decision: non-positive leverage"
            );
            return Verdict::Rejected(RiskViolation::NonPositiveLeverage(decision.leverage));
        }

        if price <= Decimal::ZERO {
            return Verdict::Rejected(RiskViolation::NonPositivePrice(price));
        }

        let intended_side = match decision.action {
            DecisionAction::Buy => PositionSide::Long,
            DecisionAction::Sell => PositionSide::Short,
            DecisionAction::Hold => unreachable!("hold handled above"),
        };

        if let Some(pos) = open_position {
            if pos.side == intended_side {
                warn!(
                    symbol = %decision.symbol,
                    side = pos.side.as_str(),
                    "rejecting decision: would duplicate open position"
                );
                return Verdict::Rejected(RiskViolation::DuplicatePosition {
                    symbol: decision.symbol.clone(),
                    side: pos.side.as_str(),
                });
            }

            // Opposing direction closes the existing position instead of
            // opening a hedge.
            debug!(symbol = %decision.symbol, "opposing decision closes open position");
            return Verdict::Close {
                symbol: decision.symbol.clone(),
            };
        }

        let leverage = decision
            .leverage
            .clamp(Decimal::ONE, self.config.max_leverage);

        let notional = self.config.max_position_size * equity;
        let margin = notional / leverage;

        // A depleted account cannot size a new position.
        if notional <= Decimal::ZERO || margin > available_cash {
            warn!(
                symbol = %decision.symbol,
                required = %margin,
                available = %available_cash,
                "rejecting decision: insufficient cash"
            );
            return Verdict::Rejected(RiskViolation::InsufficientCash {
                required: margin,
                available: available_cash,
            });
        }

        let size = notional / price;

        // The stop-loss is a mandatory backstop: synthesize one at the
        // configured loss fraction when the oracle omitted it.
        let stop_loss = decision.stop_loss.unwrap_or_else(|| {
            let f = self.config.default_stop_loss_pct;
            match intended_side {
                PositionSide::Long => price * (Decimal::ONE - f),
                PositionSide::Short => price * (Decimal::ONE + f),
            }
        });

        Verdict::Open(OpenOrder {
            symbol: decision.symbol.clone(),
            side: intended_side,
            size,
            entry_price: price,
            leverage,
            confidence: decision.confidence,
            stop_loss,
            take_profit: decision.take_profit,
            exit_condition: decision.exit_condition.clone(),
            exit_condition_price: decision.exit_condition_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_decision(action: DecisionAction, confidence: f64, leverage: Decimal) -> Decision {
        Decision {
            symbol: "BTC".to_string(),
            action,
            confidence,
            leverage,
            reasoning: "test".to_string(),
            exit_condition: None,
            exit_condition_price: None,
            stop_loss: None,
            take_profit: None,
            timestamp: Utc::now(),
        }
    }

    fn make_position(side: PositionSide) -> Position {
        Position {
            symbol: "BTC".to_string(),
            side,
            size: dec!(0.02),
            entry_price: dec!(100000),
            leverage: dec!(5),
            confidence: 0.7,
            stop_loss: dec!(90000),
            take_profit: None,
            exit_condition: None,
            exit_condition_price: None,
            opened_at: Utc::now(),
        }
    }

    fn validator() -> RiskValidator {
        RiskValidator::new(TradingConfig::default())
    }

    #[test]
    fn hold_is_a_no_op() {
        let decision = make_decision(DecisionAction::Hold, 0.9, dec!(5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        assert!(matches!(verdict, Verdict::Held));
    }

    #[test]
    fn confidence_above_one_is_rejected() {
        let decision = make_decision(DecisionAction::Buy, 1.2, dec!(5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Rejected(violation) => {
                assert!(violation.to_string().contains("confidence out of range"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn negative_confidence_is_rejected() {
        let decision = make_decision(DecisionAction::Buy, -0.1, dec!(5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        assert!(matches!(verdict, Verdict::Rejected(_)));
    }

    #[test]
    fn zero_leverage_is_rejected() {
        let decision = make_decision(DecisionAction::Buy, 0.9, Decimal::ZERO);
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        assert!(matches!(
            verdict,
            Verdict::Rejected(RiskViolation::NonPositiveLeverage(_))
        ));
    }

    #[test]
    fn leverage_is_clamped_to_configured_bounds() {
        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(50));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => assert_eq!(order.leverage, dec!(20)),
            other => panic!("expected open order, got {other:?}"),
        }

        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(0.5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => assert_eq!(order.leverage, Decimal::ONE),
            other => panic!("expected open order, got {other:?}"),
        }
    }

    #[test]
    fn buy_while_long_is_rejected_as_duplicate() {
        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(5));
        let position = make_position(PositionSide::Long);
        let verdict = validator().validate(
            &decision,
            dec!(100000),
            Some(&position),
            dec!(10000),
            dec!(10000),
        );
        assert!(matches!(
            verdict,
            Verdict::Rejected(RiskViolation::DuplicatePosition { .. })
        ));
    }

    #[test]
    fn sell_while_long_closes_the_position() {
        let decision = make_decision(DecisionAction::Sell, 0.9, dec!(5));
        let position = make_position(PositionSide::Long);
        let verdict = validator().validate(
            &decision,
            dec!(100000),
            Some(&position),
            dec!(10000),
            dec!(10000),
        );
        match verdict {
            Verdict::Close { symbol } => assert_eq!(symbol, "BTC"),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn margin_beyond_available_cash_is_rejected() {
        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(1));
        // Notional 20% of 10000 = 2000 at 1x means 2000 margin; only 100 free.
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(100));
        assert!(matches!(
            verdict,
            Verdict::Rejected(RiskViolation::InsufficientCash { .. })
        ));
    }

    #[test]
    fn missing_stop_loss_is_synthesized() {
        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => assert_eq!(order.stop_loss, dec!(85.00)),
            other => panic!("expected open order, got {other:?}"),
        }

        let decision = make_decision(DecisionAction::Sell, 0.9, dec!(5));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => {
                assert_eq!(order.side, PositionSide::Short);
                assert_eq!(order.stop_loss, dec!(115.00));
            }
            other => panic!("expected open order, got {other:?}"),
        }
    }

    #[test]
    fn oracle_stop_loss_is_kept() {
        let mut decision = make_decision(DecisionAction::Buy, 0.9, dec!(5));
        decision.stop_loss = Some(dec!(92));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => assert_eq!(order.stop_loss, dec!(92)),
            other => panic!("expected open order, got {other:?}"),
        }
    }

    #[test]
    fn sizing_uses_equity_fraction() {
        let decision = make_decision(DecisionAction::Buy, 0.9, dec!(10));
        let verdict = validator().validate(&decision, dec!(100), None, dec!(10000), dec!(10000));
        match verdict {
            Verdict::Open(order) => {
                // 20% of 10000 = 2000 notional -> 20 units at price 100
                assert_eq!(order.size, dec!(20));
                assert_eq!(order.margin(), dec!(200));
            }
            other => panic!("expected open order, got {other:?}"),
        }
    }
}
