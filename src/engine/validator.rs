use rust_decimal::Decimal;

use crate::config::Settings;
use crate::error::EngineError;
use crate::types::{Position, SignalProposal};

/// Structural and economic validation of a strategy proposal.
///
/// `price_open` is the resolved entry: the proposal's own level for a
/// scheduled signal, the current average price for an immediate one.
pub fn validate_proposal(
    proposal: &SignalProposal,
    price_open: Decimal,
    settings: &Settings,
) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::InvalidSignal(reason);

    if price_open <= Decimal::ZERO {
        return Err(invalid(format!("priceOpen {} must be > 0", price_open)));
    }
    if proposal.price_take_profit <= Decimal::ZERO {
        return Err(invalid(format!(
            "priceTakeProfit {} must be > 0",
            proposal.price_take_profit
        )));
    }
    if proposal.price_stop_loss <= Decimal::ZERO {
        return Err(invalid(format!(
            "priceStopLoss {} must be > 0",
            proposal.price_stop_loss
        )));
    }
    if proposal.minute_estimated_time <= 0 {
        return Err(invalid(format!(
            "minuteEstimatedTime {} must be > 0",
            proposal.minute_estimated_time
        )));
    }
    if proposal.minute_estimated_time > settings.max_signal_lifetime_minutes {
        return Err(invalid(format!(
            "minuteEstimatedTime {} exceeds limit {}",
            proposal.minute_estimated_time, settings.max_signal_lifetime_minutes
        )));
    }

    match proposal.position {
        Position::Long => {
            if !(proposal.price_take_profit > price_open
                && price_open > proposal.price_stop_loss)
            {
                return Err(invalid(format!(
                    "long requires TP {} > open {} > SL {}",
                    proposal.price_take_profit, price_open, proposal.price_stop_loss
                )));
            }
        }
        Position::Short => {
            if !(proposal.price_take_profit < price_open
                && price_open < proposal.price_stop_loss)
            {
                return Err(invalid(format!(
                    "short requires TP {} < open {} < SL {}",
                    proposal.price_take_profit, price_open, proposal.price_stop_loss
                )));
            }
        }
    }

    let hundred = Decimal::from(100);
    let tp_distance_pct = (proposal.price_take_profit - price_open).abs() / price_open * hundred;
    let sl_distance_pct = (proposal.price_stop_loss - price_open).abs() / price_open * hundred;

    let min_tp = settings.min_viable_takeprofit_percent();
    if tp_distance_pct < min_tp {
        return Err(invalid(format!(
            "TP distance {:.4}% below viable minimum {:.4}% (fees + slippage + margin)",
            tp_distance_pct, min_tp
        )));
    }
    if sl_distance_pct < settings.min_stoploss_distance_percent {
        return Err(invalid(format!(
            "SL distance {:.4}% below minimum {:.4}%",
            sl_distance_pct, settings.min_stoploss_distance_percent
        )));
    }
    if sl_distance_pct > settings.max_stoploss_distance_percent {
        return Err(invalid(format!(
            "SL distance {:.4}% above maximum {:.4}%",
            sl_distance_pct, settings.max_stoploss_distance_percent
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> Settings {
        Settings::default()
    }

    fn long_proposal() -> SignalProposal {
        SignalProposal::immediate(Position::Long, dec!(51000), dec!(49000), 120)
    }

    #[test]
    fn test_valid_long_passes() {
        assert!(validate_proposal(&long_proposal(), dec!(50000), &settings()).is_ok());
    }

    #[test]
    fn test_valid_short_passes() {
        let proposal = SignalProposal::scheduled(
            Position::Short,
            dec!(50500),
            dec!(49000),
            dec!(51500),
            120,
        );
        assert!(validate_proposal(&proposal, dec!(50500), &settings()).is_ok());
    }

    #[test]
    fn test_rejects_nonpositive_prices() {
        let mut proposal = long_proposal();
        proposal.price_stop_loss = dec!(0);
        assert!(validate_proposal(&proposal, dec!(50000), &settings()).is_err());

        assert!(validate_proposal(&long_proposal(), dec!(0), &settings()).is_err());
    }

    #[test]
    fn test_rejects_inverted_long_levels() {
        let mut proposal = long_proposal();
        proposal.price_take_profit = dec!(49500);
        let err = validate_proposal(&proposal, dec!(50000), &settings()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignal(_)));
    }

    #[test]
    fn test_rejects_thin_take_profit() {
        // 0.2% TP distance cannot cover 0.4% round-trip costs + margin
        let proposal =
            SignalProposal::immediate(Position::Long, dec!(50100), dec!(49000), 120);
        assert!(validate_proposal(&proposal, dec!(50000), &settings()).is_err());
    }

    #[test]
    fn test_rejects_stoploss_outside_bounds() {
        // Too tight: 0.02%
        let tight = SignalProposal::immediate(Position::Long, dec!(51000), dec!(49990), 120);
        assert!(validate_proposal(&tight, dec!(50000), &settings()).is_err());

        // Too wide: 20%
        let wide = SignalProposal::immediate(Position::Long, dec!(51000), dec!(40000), 120);
        assert!(validate_proposal(&wide, dec!(50000), &settings()).is_err());
    }

    #[test]
    fn test_lifetime_bounds_inclusive() {
        let settings = settings();
        let mut proposal = long_proposal();

        proposal.minute_estimated_time = settings.max_signal_lifetime_minutes;
        assert!(validate_proposal(&proposal, dec!(50000), &settings).is_ok());

        proposal.minute_estimated_time = settings.max_signal_lifetime_minutes + 1;
        assert!(validate_proposal(&proposal, dec!(50000), &settings).is_err());

        proposal.minute_estimated_time = 0;
        assert!(validate_proposal(&proposal, dec!(50000), &settings).is_err());
    }
}
