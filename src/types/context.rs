use chrono::{DateTime, Utc};

/// Immutable per-call context handed to provider callbacks.
///
/// Strategy authors read `when` from here instead of the wall clock so the
/// same code runs unchanged under backtest and live drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct TickContext {
    pub symbol: String,
    pub when: DateTime<Utc>,
    pub backtest: bool,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
}

impl TickContext {
    pub fn at(&self, when: DateTime<Utc>) -> Self {
        Self {
            when,
            ..self.clone()
        }
    }
}
