use chrono::{DateTime, Utc};

/// Injected time source. Live drivers use the wall clock; tests substitute
/// a stepped clock. Backtest drivers never consult it, they run on frame
/// timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
