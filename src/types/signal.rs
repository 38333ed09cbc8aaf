use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Long,
    Short,
}

impl Position {
    pub fn opposite(&self) -> Self {
        match self {
            Position::Long => Position::Short,
            Position::Short => Position::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Long => "long",
            Position::Short => "short",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a strategy proposes on an idle tick. `None` from the strategy means wait.
///
/// A proposal without `price_open` opens immediately at the current average
/// price; with `price_open` it becomes a scheduled (limit-style) signal that
/// activates when price touches the level.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalProposal {
    pub position: Position,
    pub price_open: Option<Decimal>,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    pub note: String,
    pub id: Option<String>,
}

impl SignalProposal {
    pub fn immediate(
        position: Position,
        price_take_profit: Decimal,
        price_stop_loss: Decimal,
        minute_estimated_time: i64,
    ) -> Self {
        Self {
            position,
            price_open: None,
            price_take_profit,
            price_stop_loss,
            minute_estimated_time,
            note: String::new(),
            id: None,
        }
    }

    pub fn scheduled(
        position: Position,
        price_open: Decimal,
        price_take_profit: Decimal,
        price_stop_loss: Decimal,
        minute_estimated_time: i64,
    ) -> Self {
        Self {
            position,
            price_open: Some(price_open),
            price_take_profit,
            price_stop_loss,
            minute_estimated_time,
            note: String::new(),
            id: None,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn is_scheduled(&self) -> bool {
        self.price_open.is_some()
    }
}

/// An opened (or pending-activation) signal. Field names are the wire
/// compatibility contract; do not rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSignal {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    pub position: Position,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub original_price_stop_loss: Decimal,
    pub original_price_take_profit: Decimal,
    pub minute_estimated_time: i64,
    pub scheduled_at: DateTime<Utc>,
    pub pending_at: DateTime<Utc>,
    pub note: String,
    pub partial_closed_pct: Decimal,
}

impl ActiveSignal {
    pub fn is_long(&self) -> bool {
        self.position == Position::Long
    }

    /// Instant after which the signal is closed with `time_expired`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.pending_at + Duration::minutes(self.minute_estimated_time)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::minutes(self.minute_estimated_time)
    }

    /// Take-profit touch at a single price point.
    pub fn tp_touched(&self, price: Decimal) -> bool {
        match self.position {
            Position::Long => price >= self.price_take_profit,
            Position::Short => price <= self.price_take_profit,
        }
    }

    /// Stop-loss touch at a single price point.
    pub fn sl_touched(&self, price: Decimal) -> bool {
        match self.position {
            Position::Long => price <= self.price_stop_loss,
            Position::Short => price >= self.price_stop_loss,
        }
    }

    /// Unrealized raw move from entry, in percent (positive = favorable).
    pub fn unrealized_pct(&self, price: Decimal) -> Decimal {
        if self.price_open.is_zero() {
            return Decimal::ZERO;
        }
        let raw = (price - self.price_open) / self.price_open * Decimal::from(100);
        match self.position {
            Position::Long => raw,
            Position::Short => -raw,
        }
    }

    /// Ownership marker check used when restoring persisted records.
    pub fn owned_by(&self, exchange_name: &str, strategy_name: &str, symbol: &str) -> bool {
        self.exchange_name == exchange_name
            && self.strategy_name == strategy_name
            && self.symbol == symbol
    }
}

/// A signal waiting for its entry price to be touched.
///
/// Serialized flat: the `_isScheduled` marker and optional `cancelId` ride
/// alongside the signal fields in the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSignal {
    #[serde(flatten)]
    pub signal: ActiveSignal,
    #[serde(rename = "_isScheduled")]
    pub is_scheduled: bool,
    #[serde(rename = "cancelId", skip_serializing_if = "Option::is_none", default)]
    pub cancel_id: Option<String>,
}

impl ScheduledSignal {
    pub fn new(signal: ActiveSignal, cancel_id: Option<String>) -> Self {
        Self {
            signal,
            is_scheduled: true,
            cancel_id,
        }
    }

    /// Entry touch at a single price point. A long limit fills when price
    /// trades down to it, a short limit when price trades up to it.
    pub fn entry_touched(&self, price: Decimal) -> bool {
        match self.signal.position {
            Position::Long => price <= self.signal.price_open,
            Position::Short => price >= self.signal.price_open,
        }
    }

    /// Stop-loss breach while still waiting for entry.
    pub fn sl_before_entry(&self, price: Decimal) -> bool {
        self.signal.sl_touched(price)
    }

    /// Deadline for activation; past it the signal cancels with
    /// `schedule_timeout`.
    pub fn activation_deadline(&self, await_minutes: i64) -> DateTime<Utc> {
        self.signal.scheduled_at + Duration::minutes(await_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TimeExpired => "time_expired",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ScheduleTimeout,
    UserCancel,
    SlBeforeEntry,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::ScheduleTimeout => "schedule_timeout",
            CancelReason::UserCancel => "user_cancel",
            CancelReason::SlBeforeEntry => "sl_before_entry",
        };
        write!(f, "{}", s)
    }
}

/// Terminal result of an active signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedSignal {
    #[serde(flatten)]
    pub signal: ActiveSignal,
    pub price_close: Decimal,
    /// Entry price after slippage and fee adjustment (the effective fill).
    pub price_open_effective: Decimal,
    pub closed_at: DateTime<Utc>,
    pub close_reason: CloseReason,
    /// Realized percent including fees, slippage and partial closures.
    pub pnl_pct: Decimal,
}

/// Terminal result of a scheduled signal that never activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledSignal {
    #[serde(flatten)]
    pub signal: ScheduledSignal,
    pub cancelled_at: DateTime<Utc>,
    pub cancel_reason: CancelReason,
}
