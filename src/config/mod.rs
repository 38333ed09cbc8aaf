use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Process-wide engine settings.
///
/// Percent fields are plain percent points (0.1 means 0.1%), matching the
/// exchange fee schedules they mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Live tick cadence. Slightly over a minute so a 1m candle source has
    /// closed a fresh candle by the time the next tick fires.
    pub tick_ttl_ms: u64,
    /// How long a scheduled signal may wait for its entry touch.
    pub schedule_await_minutes: i64,
    pub max_signal_lifetime_minutes: i64,
    pub percent_slippage: Decimal,
    pub percent_fee: Decimal,
    /// Profit margin required beyond round-trip costs for the TP distance.
    pub min_takeprofit_distance_percent: Decimal,
    pub min_stoploss_distance_percent: Decimal,
    pub max_stoploss_distance_percent: Decimal,
    /// Extra margin beyond round-trip costs before stop-loss migrates to
    /// entry.
    pub breakeven_threshold: Decimal,
    /// VWAP window, in 1-minute candles.
    pub avg_price_candles_count: usize,
    /// Chunk size for candle pagination.
    pub max_candles_per_request: usize,
    pub get_candles_retry_count: u32,
    pub get_candles_retry_delay_ms: u64,
    /// Percent milestones from entry that fire one-shot partial events.
    pub partial_profit_levels: Vec<Decimal>,
    pub partial_loss_levels: Vec<Decimal>,
    /// Forward-fetch padding for the backtest fast-forward window.
    pub buffer_minutes: i64,
    /// Root directory of the default file persistence adapter.
    pub persist_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        let levels: Vec<Decimal> = (1..=10).map(|i| Decimal::from(i * 10)).collect();
        Self {
            tick_ttl_ms: 60_001,
            schedule_await_minutes: 120,
            max_signal_lifetime_minutes: 10_080,
            percent_slippage: dec!(0.1),
            percent_fee: dec!(0.1),
            min_takeprofit_distance_percent: dec!(0.1),
            min_stoploss_distance_percent: dec!(0.1),
            max_stoploss_distance_percent: dec!(10),
            breakeven_threshold: dec!(0.1),
            avg_price_candles_count: 5,
            max_candles_per_request: 1000,
            get_candles_retry_count: 3,
            get_candles_retry_delay_ms: 1_000,
            partial_profit_levels: levels.clone(),
            partial_loss_levels: levels,
            buffer_minutes: 60,
            persist_dir: "state".to_string(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `ENGINE_`-prefixed environment variables,
    /// e.g. `ENGINE_TICK_TTL_MS=1000`.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?)
            .add_source(config::Environment::with_prefix("ENGINE"))
            .build()?;
        cfg.try_deserialize()
    }

    /// Round-trip trading cost in percent: slippage and fee paid on both
    /// entry and exit.
    pub fn round_trip_cost_percent(&self) -> Decimal {
        (self.percent_slippage + self.percent_fee) * Decimal::from(2)
    }

    /// Minimum TP distance (percent from entry) for a proposal to be viable.
    pub fn min_viable_takeprofit_percent(&self) -> Decimal {
        self.round_trip_cost_percent() + self.min_takeprofit_distance_percent
    }

    /// Profit percent past which the stop-loss migrates to entry.
    pub fn breakeven_trigger_percent(&self) -> Decimal {
        self.round_trip_cost_percent() + self.breakeven_threshold
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.tick_ttl_ms == 0 {
            errors.push("tick_ttl_ms must be > 0".to_string());
        }
        if self.schedule_await_minutes <= 0 {
            errors.push("schedule_await_minutes must be > 0".to_string());
        }
        if self.max_signal_lifetime_minutes <= 0 {
            errors.push("max_signal_lifetime_minutes must be > 0".to_string());
        }
        if self.percent_slippage < Decimal::ZERO || self.percent_fee < Decimal::ZERO {
            errors.push("percent_slippage and percent_fee must be >= 0".to_string());
        }
        if self.min_stoploss_distance_percent <= Decimal::ZERO {
            errors.push("min_stoploss_distance_percent must be > 0".to_string());
        }
        if self.max_stoploss_distance_percent <= self.min_stoploss_distance_percent {
            errors.push(
                "max_stoploss_distance_percent must exceed min_stoploss_distance_percent"
                    .to_string(),
            );
        }
        if self.avg_price_candles_count == 0 {
            errors.push("avg_price_candles_count must be > 0".to_string());
        }
        if self.max_candles_per_request == 0 {
            errors.push("max_candles_per_request must be > 0".to_string());
        }
        if self
            .partial_profit_levels
            .windows(2)
            .any(|w| w[0] >= w[1])
        {
            errors.push("partial_profit_levels must be strictly increasing".to_string());
        }
        if self.partial_loss_levels.windows(2).any(|w| w[0] >= w[1]) {
            errors.push("partial_loss_levels must be strictly increasing".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_sl_bounds() {
        let settings = Settings {
            min_stoploss_distance_percent: dec!(5),
            max_stoploss_distance_percent: dec!(2),
            ..Settings::default()
        };
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_stoploss_distance_percent")));
    }

    #[test]
    fn test_cost_helpers() {
        let settings = Settings::default();
        // 0.1 slippage + 0.1 fee, both sides
        assert_eq!(settings.round_trip_cost_percent(), dec!(0.4));
        assert_eq!(settings.min_viable_takeprofit_percent(), dec!(0.5));
        assert_eq!(settings.breakeven_trigger_percent(), dec!(0.5));
    }

    #[test]
    fn test_partial_levels_default_shape() {
        let settings = Settings::default();
        assert_eq!(settings.partial_profit_levels.len(), 10);
        assert_eq!(settings.partial_profit_levels[0], Decimal::from(10));
        assert_eq!(settings.partial_profit_levels[9], Decimal::from(100));
    }
}
