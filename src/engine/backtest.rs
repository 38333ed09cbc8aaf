//! Pure per-candle evaluation used by the fast-forward path.
//!
//! The rules here must be deterministic: given the same candle and signal
//! state they always produce the same verdict, independent of evaluation
//! time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{ActiveSignal, Candle, CloseReason, Interval, Position, ScheduledSignal};

/// Terminal verdict for an active signal against one candle.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleClose {
    pub reason: CloseReason,
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// TP/SL touch evaluation with the intra-candle tie-break.
///
/// When a candle touches both levels the stop-loss wins (pessimistic
/// assumption: the adverse move happened first). Exception: a candle that
/// already opens beyond the take-profit closes there at the open price
/// (favorable gap).
///
/// Time expiry is handled separately by the caller; this function only
/// resolves touches.
pub fn evaluate_touch(signal: &ActiveSignal, candle: &Candle) -> Option<CandleClose> {
    let at = candle.open_time;

    // Favorable gap: opened already past TP
    if signal.tp_touched(candle.open) {
        return Some(CandleClose {
            reason: CloseReason::TakeProfit,
            price: candle.open,
            at,
        });
    }

    let (sl_hit, tp_hit) = match signal.position {
        Position::Long => (
            candle.low <= signal.price_stop_loss,
            candle.high >= signal.price_take_profit,
        ),
        Position::Short => (
            candle.high >= signal.price_stop_loss,
            candle.low <= signal.price_take_profit,
        ),
    };

    if sl_hit {
        // Pessimistic: stop-loss first even when TP was also in range
        return Some(CandleClose {
            reason: CloseReason::StopLoss,
            price: signal.price_stop_loss,
            at,
        });
    }
    if tp_hit {
        return Some(CandleClose {
            reason: CloseReason::TakeProfit,
            price: signal.price_take_profit,
            at,
        });
    }
    None
}

/// Time expiry at the candle's close boundary, checked only when no touch
/// fired inside the candle.
pub fn evaluate_expiry(
    signal: &ActiveSignal,
    candle: &Candle,
    interval: Interval,
) -> Option<CandleClose> {
    let boundary = candle.close_time(interval);
    if boundary >= signal.expires_at() {
        return Some(CandleClose {
            reason: CloseReason::TimeExpired,
            price: candle.close,
            at: boundary,
        });
    }
    None
}

/// Verdict for a still-scheduled signal against one candle.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleVerdict {
    /// No touch, deadline not reached.
    Waiting,
    /// Candle lies past the activation deadline.
    Timeout { at: DateTime<Utc> },
    /// Candle gapped straight through the stop-loss without a plausible
    /// fill at the entry level.
    SlBeforeEntry { at: DateTime<Utc> },
    /// Entry level traded; the signal activates at this candle.
    Activated { at: DateTime<Utc> },
}

/// Scheduled-signal evaluation order: candles strictly past the deadline
/// time out; a candle opening beyond the stop-loss cancels (no fill is
/// assumed on a gap through the entry); otherwise an entry touch activates.
/// The candle opening exactly at the deadline still gets its activation
/// chance.
pub fn evaluate_scheduled(
    scheduled: &ScheduledSignal,
    candle: &Candle,
    await_minutes: i64,
) -> ScheduleVerdict {
    let deadline = scheduled.activation_deadline(await_minutes);
    if candle.open_time > deadline {
        return ScheduleVerdict::Timeout {
            at: candle.open_time,
        };
    }

    let adverse_gap = match scheduled.signal.position {
        Position::Long => candle.open <= scheduled.signal.price_stop_loss,
        Position::Short => candle.open >= scheduled.signal.price_stop_loss,
    };
    if adverse_gap {
        return ScheduleVerdict::SlBeforeEntry {
            at: candle.open_time,
        };
    }

    let touched = match scheduled.signal.position {
        Position::Long => candle.low <= scheduled.signal.price_open,
        Position::Short => candle.high >= scheduled.signal.price_open,
    };
    if touched {
        return ScheduleVerdict::Activated {
            at: candle.open_time,
        };
    }

    ScheduleVerdict::Waiting
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn long_signal() -> ActiveSignal {
        ActiveSignal {
            id: "s".to_string(),
            symbol: "BTCUSDT".to_string(),
            strategy_name: "trend".to_string(),
            exchange_name: "binance".to_string(),
            frame_name: "bt".to_string(),
            position: Position::Long,
            price_open: dec!(50000),
            price_take_profit: dec!(51000),
            price_stop_loss: dec!(49000),
            original_price_stop_loss: dec!(49000),
            original_price_take_profit: dec!(51000),
            minute_estimated_time: 60,
            scheduled_at: t0(),
            pending_at: t0(),
            note: String::new(),
            partial_closed_pct: Decimal::ZERO,
        }
    }

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: t0() + chrono::Duration::minutes(5),
            open,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_tp_touch_closes_at_level() {
        let signal = long_signal();
        let verdict =
            evaluate_touch(&signal, &candle(dec!(50100), dec!(51050), dec!(50100), dec!(50900)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::TakeProfit);
        assert_eq!(verdict.price, dec!(51000));
    }

    #[test]
    fn test_sl_touch_closes_at_level() {
        let signal = long_signal();
        let verdict =
            evaluate_touch(&signal, &candle(dec!(49500), dec!(49600), dec!(48900), dec!(49100)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::StopLoss);
        assert_eq!(verdict.price, dec!(49000));
    }

    #[test]
    fn test_both_touched_resolves_stop_loss() {
        let signal = long_signal();
        // Wide candle through both levels
        let verdict =
            evaluate_touch(&signal, &candle(dec!(50000), dec!(51500), dec!(48500), dec!(50000)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::StopLoss);
    }

    #[test]
    fn test_favorable_gap_closes_at_open() {
        let signal = long_signal();
        // Opens above TP, even dips below SL later in range: gap wins
        let verdict =
            evaluate_touch(&signal, &candle(dec!(51200), dec!(51500), dec!(48500), dec!(49000)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::TakeProfit);
        assert_eq!(verdict.price, dec!(51200));
    }

    #[test]
    fn test_short_tie_break_symmetric() {
        let mut signal = long_signal();
        signal.position = Position::Short;
        signal.price_take_profit = dec!(49000);
        signal.price_stop_loss = dec!(51000);

        let verdict =
            evaluate_touch(&signal, &candle(dec!(50000), dec!(51500), dec!(48500), dec!(50000)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::StopLoss);
        assert_eq!(verdict.price, dec!(51000));

        // Favorable gap for a short: opens below TP
        let verdict =
            evaluate_touch(&signal, &candle(dec!(48800), dec!(49500), dec!(48700), dec!(49000)))
                .unwrap();
        assert_eq!(verdict.reason, CloseReason::TakeProfit);
        assert_eq!(verdict.price, dec!(48800));
    }

    #[test]
    fn test_no_touch_no_verdict() {
        let signal = long_signal();
        assert!(evaluate_touch(
            &signal,
            &candle(dec!(50000), dec!(50500), dec!(49500), dec!(50200))
        )
        .is_none());
    }

    #[test]
    fn test_expiry_at_close_boundary() {
        let signal = long_signal(); // 60 minute lifetime from t0
        let mut c = candle(dec!(50000), dec!(50100), dec!(49900), dec!(50050));

        // Candle closing exactly at expiry
        c.open_time = t0() + chrono::Duration::minutes(59);
        let verdict = evaluate_expiry(&signal, &c, Interval::M1).unwrap();
        assert_eq!(verdict.reason, CloseReason::TimeExpired);
        assert_eq!(verdict.price, dec!(50050));
        assert_eq!(verdict.at, t0() + chrono::Duration::minutes(60));

        // One candle earlier: still alive
        c.open_time = t0() + chrono::Duration::minutes(58);
        assert!(evaluate_expiry(&signal, &c, Interval::M1).is_none());
    }

    fn scheduled_long() -> ScheduledSignal {
        let mut signal = long_signal();
        signal.price_open = dec!(49800);
        signal.price_take_profit = dec!(51000);
        signal.price_stop_loss = dec!(49000);
        ScheduledSignal::new(signal, None)
    }

    #[test]
    fn test_schedule_activates_on_touch() {
        let scheduled = scheduled_long();
        let c = candle(dec!(50000), dec!(50100), dec!(49750), dec!(49900));
        assert!(matches!(
            evaluate_scheduled(&scheduled, &c, 120),
            ScheduleVerdict::Activated { .. }
        ));
    }

    #[test]
    fn test_schedule_waits_without_touch() {
        let scheduled = scheduled_long();
        let c = candle(dec!(50000), dec!(50100), dec!(49900), dec!(50000));
        assert_eq!(evaluate_scheduled(&scheduled, &c, 120), ScheduleVerdict::Waiting);
    }

    #[test]
    fn test_schedule_timeout_past_deadline() {
        let scheduled = scheduled_long();
        let mut c = candle(dec!(50000), dec!(50100), dec!(49750), dec!(49900));
        c.open_time = t0() + chrono::Duration::minutes(121);
        assert!(matches!(
            evaluate_scheduled(&scheduled, &c, 120),
            ScheduleVerdict::Timeout { .. }
        ));
    }

    #[test]
    fn test_schedule_deadline_candle_still_activates() {
        let scheduled = scheduled_long();
        let mut c = candle(dec!(50000), dec!(50100), dec!(49750), dec!(49900));
        c.open_time = t0() + chrono::Duration::minutes(120);
        assert!(matches!(
            evaluate_scheduled(&scheduled, &c, 120),
            ScheduleVerdict::Activated { .. }
        ));
    }

    #[test]
    fn test_schedule_gap_through_stop_cancels() {
        let scheduled = scheduled_long();
        // Opens below the stop-loss: no plausible fill at 49800
        let c = candle(dec!(48900), dec!(49200), dec!(48800), dec!(49100));
        assert!(matches!(
            evaluate_scheduled(&scheduled, &c, 120),
            ScheduleVerdict::SlBeforeEntry { .. }
        ));
    }
}
