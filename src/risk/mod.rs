use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::engine::portfolio::OpenPosition;
use crate::error::EngineError;
use crate::types::ActiveSignal;

/// A proposed (already validated) signal under risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskCandidate<'a> {
    pub signal: &'a ActiveSignal,
    pub current_price: Decimal,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRejection {
    pub validator: String,
    pub reason: String,
}

impl fmt::Display for RiskRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.validator, self.reason)
    }
}

/// A pure admission check. Validators never mutate the candidate; they only
/// admit or reject against the portfolio snapshot.
pub trait RiskValidator: Send + Sync {
    fn name(&self) -> &str;

    fn check(
        &self,
        candidate: &RiskCandidate<'_>,
        open_positions: &[OpenPosition],
    ) -> Result<(), RiskRejection>;

    fn reject(&self, reason: String) -> RiskRejection {
        RiskRejection {
            validator: self.name().to_string(),
            reason,
        }
    }
}

/// Ordered validator chain; the first rejection short-circuits.
#[derive(Clone, Default)]
pub struct RiskGate {
    validators: Vec<Arc<dyn RiskValidator>>,
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate")
            .field(
                "validators",
                &self.validators.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl RiskGate {
    pub fn new(validators: Vec<Arc<dyn RiskValidator>>) -> Self {
        Self { validators }
    }

    pub fn evaluate(
        &self,
        candidate: &RiskCandidate<'_>,
        open_positions: &[OpenPosition],
    ) -> Result<(), RiskRejection> {
        for validator in &self.validators {
            if let Err(rejection) = validator.check(candidate, open_positions) {
                debug!(
                    symbol = candidate.signal.symbol,
                    validator = rejection.validator,
                    reason = rejection.reason,
                    "risk gate rejected signal"
                );
                return Err(rejection);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Caps the total number of active positions across all strategies.
pub struct MaxActivePositions {
    limit: usize,
}

impl MaxActivePositions {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl RiskValidator for MaxActivePositions {
    fn name(&self) -> &str {
        "max-active-positions"
    }

    fn check(
        &self,
        _candidate: &RiskCandidate<'_>,
        open_positions: &[OpenPosition],
    ) -> Result<(), RiskRejection> {
        if open_positions.len() >= self.limit {
            return Err(self.reject(format!(
                "{} active positions, limit {}",
                open_positions.len(),
                self.limit
            )));
        }
        Ok(())
    }
}

/// Rejects a second position on the same symbol, regardless of strategy.
pub struct SinglePositionPerSymbol;

impl RiskValidator for SinglePositionPerSymbol {
    fn name(&self) -> &str {
        "single-position-per-symbol"
    }

    fn check(
        &self,
        candidate: &RiskCandidate<'_>,
        open_positions: &[OpenPosition],
    ) -> Result<(), RiskRejection> {
        if let Some(existing) = open_positions
            .iter()
            .find(|p| p.symbol == candidate.signal.symbol)
        {
            return Err(self.reject(format!(
                "position {} already open on {}",
                existing.id, existing.symbol
            )));
        }
        Ok(())
    }
}

/// Rejects opening against an existing position on the same symbol
/// (simultaneous long and short across strategies).
pub struct NoOppositeExposure;

impl RiskValidator for NoOppositeExposure {
    fn name(&self) -> &str {
        "no-opposite-exposure"
    }

    fn check(
        &self,
        candidate: &RiskCandidate<'_>,
        open_positions: &[OpenPosition],
    ) -> Result<(), RiskRejection> {
        let opposite = candidate.signal.position.opposite();
        if open_positions
            .iter()
            .any(|p| p.symbol == candidate.signal.symbol && p.position == opposite)
        {
            return Err(self.reject(format!(
                "{} exposure already open on {}",
                opposite, candidate.signal.symbol
            )));
        }
        Ok(())
    }
}

/// Named validator registry. Strategies reference validators by name via
/// `risk_list`; resolution happens once at engine creation.
#[derive(Clone, Default)]
pub struct RiskRegistry {
    validators: HashMap<String, Arc<dyn RiskValidator>>,
}

impl RiskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in validators.
    pub fn with_builtins(max_active_positions: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MaxActivePositions::new(max_active_positions)));
        registry.register(Arc::new(SinglePositionPerSymbol));
        registry.register(Arc::new(NoOppositeExposure));
        registry
    }

    pub fn register(&mut self, validator: Arc<dyn RiskValidator>) {
        self.validators
            .insert(validator.name().to_string(), validator);
    }

    /// Resolve a list of names into an ordered gate. Unknown names fail
    /// registration, not the first tick.
    pub fn resolve(&self, names: &[String]) -> Result<RiskGate, EngineError> {
        let mut validators = Vec::with_capacity(names.len());
        for name in names {
            let validator = self
                .validators
                .get(name)
                .ok_or_else(|| EngineError::UnknownName {
                    kind: "risk validator",
                    name: name.clone(),
                })?;
            validators.push(Arc::clone(validator));
        }
        Ok(RiskGate::new(validators))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn signal(symbol: &str, position: Position) -> ActiveSignal {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ActiveSignal {
            id: "s1".to_string(),
            symbol: symbol.to_string(),
            strategy_name: "trend".to_string(),
            exchange_name: "binance".to_string(),
            frame_name: "live".to_string(),
            position,
            price_open: dec!(50000),
            price_take_profit: dec!(51000),
            price_stop_loss: dec!(49000),
            original_price_stop_loss: dec!(49000),
            original_price_take_profit: dec!(51000),
            minute_estimated_time: 120,
            scheduled_at: t,
            pending_at: t,
            note: String::new(),
            partial_closed_pct: Decimal::ZERO,
        }
    }

    fn open_position(id: &str, symbol: &str, position: Position) -> OpenPosition {
        OpenPosition {
            id: id.to_string(),
            symbol: symbol.to_string(),
            strategy_name: "other".to_string(),
            exchange_name: "binance".to_string(),
            position,
            price_open: dec!(50000),
            opened_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn candidate(signal: &ActiveSignal) -> RiskCandidate<'_> {
        RiskCandidate {
            signal,
            current_price: dec!(50000),
            when: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_max_active_positions_rejects_at_limit() {
        let validator = MaxActivePositions::new(1);
        let proposal = signal("BTCUSDT", Position::Long);
        let open = vec![open_position("a", "ETHUSDT", Position::Long)];

        let rejection = validator.check(&candidate(&proposal), &open).unwrap_err();
        assert_eq!(rejection.validator, "max-active-positions");
        assert!(validator.check(&candidate(&proposal), &[]).is_ok());
    }

    #[test]
    fn test_single_position_per_symbol() {
        let validator = SinglePositionPerSymbol;
        let proposal = signal("BTCUSDT", Position::Long);
        let open = vec![open_position("a", "BTCUSDT", Position::Long)];

        assert!(validator.check(&candidate(&proposal), &open).is_err());
        let other = vec![open_position("a", "ETHUSDT", Position::Long)];
        assert!(validator.check(&candidate(&proposal), &other).is_ok());
    }

    #[test]
    fn test_no_opposite_exposure() {
        let validator = NoOppositeExposure;
        let proposal = signal("BTCUSDT", Position::Long);
        let open = vec![open_position("a", "BTCUSDT", Position::Short)];

        assert!(validator.check(&candidate(&proposal), &open).is_err());
        let same_side = vec![open_position("a", "BTCUSDT", Position::Long)];
        assert!(validator.check(&candidate(&proposal), &same_side).is_ok());
    }

    #[test]
    fn test_gate_short_circuits_in_order() {
        let gate = RiskGate::new(vec![
            Arc::new(MaxActivePositions::new(0)),
            Arc::new(SinglePositionPerSymbol),
        ]);
        let proposal = signal("BTCUSDT", Position::Long);
        let open = vec![open_position("a", "BTCUSDT", Position::Long)];

        // Both would reject; the first registered wins
        let rejection = gate.evaluate(&candidate(&proposal), &open).unwrap_err();
        assert_eq!(rejection.validator, "max-active-positions");
    }

    #[test]
    fn test_registry_resolution() {
        let registry = RiskRegistry::with_builtins(3);
        let gate = registry
            .resolve(&["max-active-positions".to_string()])
            .unwrap();
        assert!(!gate.is_empty());

        let err = registry.resolve(&["missing".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownName { .. }));
    }
}
