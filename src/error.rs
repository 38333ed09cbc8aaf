use thiserror::Error;

/// Error taxonomy for the engine core.
///
/// Validation errors recover locally (the tick reports idle), recoverable
/// errors are logged and retried on the next tick, fatal errors terminate
/// the owning driver. Persistence stays authoritative across all of them.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A strategy proposal failed structural or economic validation.
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// A name did not resolve at registration or dispatch time.
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// Transient failure (candle fetch, persistence write, user callback).
    /// The next tick retries.
    #[error("{context}: {source}")]
    Recoverable {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Candle provider returned a sequence violating its contract.
    #[error("candle contract breach for {symbol}: expected {expected} candles from {since}, got {got}")]
    CandleContract {
        symbol: String,
        since: String,
        expected: usize,
        got: usize,
    },

    /// A backtest component asked for candles beyond the frame cursor.
    #[error("look-ahead fetch in backtest: requested {requested} but frame cursor is {cursor}")]
    LookAhead { requested: String, cursor: String },

    /// Engine invariant violation; the driver must terminate.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn recoverable(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        EngineError::Recoverable {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Fatal errors terminate the driver; everything else is retried or
    /// reported and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Fatal(_) | EngineError::LookAhead { .. } | EngineError::CandleContract { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::Fatal("x".into()).is_fatal());
        assert!(EngineError::LookAhead {
            requested: "a".into(),
            cursor: "b".into()
        }
        .is_fatal());
        assert!(!EngineError::InvalidSignal("x".into()).is_fatal());
        assert!(!EngineError::recoverable("fetch", anyhow::anyhow!("timeout")).is_fatal());
    }
}
