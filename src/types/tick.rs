use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{ActiveSignal, CancelledSignal, ClosedSignal, ScheduledSignal};

/// Outcome of a single engine tick.
///
/// Tagged variants instead of a bag of optionals: a consumer matching on
/// this cannot observe an inconsistent combination of fields.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// Nothing to do: throttled, stopped, waiting, or proposal rejected.
    Idle,
    /// A scheduled signal exists and is still waiting for its entry touch.
    Scheduled(ScheduledSignal),
    /// A signal opened on this tick (immediate open or scheduled activation).
    Opened(ActiveSignal),
    /// An active signal is running; carries the mark-to-market state.
    Active(ActiveTick),
    /// The active signal closed on this tick.
    Closed(ClosedSignal),
    /// The scheduled signal was cancelled on this tick.
    Cancelled(CancelledSignal),
}

impl TickResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickResult::Closed(_) | TickResult::Cancelled(_))
    }

    pub fn as_closed(&self) -> Option<&ClosedSignal> {
        match self {
            TickResult::Closed(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cancelled(&self) -> Option<&CancelledSignal> {
        match self {
            TickResult::Cancelled(c) => Some(c),
            _ => None,
        }
    }
}

/// Mark-to-market snapshot of a running signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTick {
    #[serde(flatten)]
    pub signal: ActiveSignal,
    pub current_price: Decimal,
    /// Raw percent move from entry, favorable-positive, before fees.
    pub unrealized_pct: Decimal,
    pub when: DateTime<Utc>,
}
