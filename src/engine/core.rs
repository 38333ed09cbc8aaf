use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::EngineResult;
use crate::events::{
    BreakevenEvent, ErrorEvent, Event, EventBus, PartialEvent, PingEvent, RiskRejectionEvent,
    SignalEvent, SignalTransition,
};
use crate::persistence::SignalStore;
use crate::risk::{RiskCandidate, RiskGate};
use crate::strategies::Strategy;
use crate::types::{
    ActiveSignal, ActiveTick, CancelReason, CancelledSignal, Candle, CloseReason, ClosedSignal,
    Interval, Position, ScheduledSignal, SignalProposal, TickContext, TickResult,
};

use super::backtest::{evaluate_expiry, evaluate_scheduled, evaluate_touch, ScheduleVerdict};
use super::milestones::{BreakevenTracker, PartialTracker};
use super::pnl::{PartialLedger, PnlCalculator};
use super::portfolio::{OpenPosition, Portfolio};
use super::validator::validate_proposal;

/// Shared collaborators injected into every engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub strategy: Arc<dyn Strategy>,
    pub store: Arc<dyn SignalStore>,
    pub portfolio: Arc<Portfolio>,
    pub risk: RiskGate,
    pub bus: EventBus,
    pub settings: Arc<Settings>,
}

/// Signal lifecycle owner for one (symbol, strategy) pair.
///
/// Single-writer: only one `tick` or `backtest` call may be in flight.
/// The driver layer enforces this by holding the engine behind a mutex.
pub struct StrategyEngine {
    symbol: String,
    strategy_name: String,
    exchange_name: String,
    frame_name: String,
    backtest: bool,

    strategy: Arc<dyn Strategy>,
    store: Arc<dyn SignalStore>,
    portfolio: Arc<Portfolio>,
    risk: RiskGate,
    bus: EventBus,
    settings: Arc<Settings>,
    pnl: PnlCalculator,

    stopped: bool,
    restored: bool,
    last_signal_time: Option<DateTime<Utc>>,
    active: Option<ActiveSignal>,
    scheduled: Option<ScheduledSignal>,
    partials: PartialTracker,
    ledger: PartialLedger,
    breakeven: BreakevenTracker,
}

impl StrategyEngine {
    pub fn new(
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        exchange_name: impl Into<String>,
        frame_name: impl Into<String>,
        backtest: bool,
        deps: EngineDeps,
    ) -> Self {
        let pnl = PnlCalculator::new(&deps.settings);
        let partials = PartialTracker::new(
            deps.settings.partial_profit_levels.clone(),
            deps.settings.partial_loss_levels.clone(),
        );
        Self {
            symbol: symbol.into(),
            strategy_name: strategy_name.into(),
            exchange_name: exchange_name.into(),
            frame_name: frame_name.into(),
            backtest,
            strategy: deps.strategy,
            store: deps.store,
            portfolio: deps.portfolio,
            risk: deps.risk,
            bus: deps.bus,
            settings: deps.settings,
            pnl,
            stopped: false,
            restored: false,
            last_signal_time: None,
            active: None,
            scheduled: None,
            partials,
            ledger: PartialLedger::new(),
            breakeven: BreakevenTracker::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn is_backtest(&self) -> bool {
        self.backtest
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// No active and no scheduled signal.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.scheduled.is_none()
    }

    pub fn active_signal(&self) -> Option<&ActiveSignal> {
        self.active.as_ref()
    }

    pub fn scheduled_signal(&self) -> Option<&ScheduledSignal> {
        self.scheduled.as_ref()
    }

    pub fn interval(&self) -> Interval {
        self.strategy.interval()
    }

    fn context(&self, when: DateTime<Utc>) -> TickContext {
        TickContext {
            symbol: self.symbol.clone(),
            when,
            backtest: self.backtest,
            strategy_name: self.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
            frame_name: self.frame_name.clone(),
        }
    }

    /// Load persisted state (live mode). Records owned by a different
    /// (exchange, strategy, symbol) tuple are stale and dropped.
    pub async fn restore(&mut self) -> EngineResult<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        if self.backtest {
            return Ok(());
        }

        match self.store.read_pending(&self.symbol, &self.strategy_name).await {
            Ok(Some(signal)) => {
                if signal.owned_by(&self.exchange_name, &self.strategy_name, &self.symbol) {
                    info!(
                        symbol = self.symbol,
                        strategy = self.strategy_name,
                        id = signal.id,
                        pending_at = %signal.pending_at,
                        "restored active signal"
                    );
                    self.ledger = PartialLedger::from_closed_pct(signal.partial_closed_pct);
                    self.breakeven =
                        BreakevenTracker::restored(signal.price_stop_loss == signal.price_open);
                    self.portfolio.admit(OpenPosition::from(&signal));
                    self.active = Some(signal);
                } else {
                    warn!(
                        symbol = self.symbol,
                        strategy = self.strategy_name,
                        "discarding pending record with foreign ownership marker"
                    );
                    if let Err(err) =
                        self.store.clear_pending(&self.symbol, &self.strategy_name).await
                    {
                        warn!(error = %err, "failed to clear stale pending record");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "failed to read pending record");
            }
        }

        match self
            .store
            .read_scheduled(&self.symbol, &self.strategy_name)
            .await
        {
            Ok(Some(scheduled)) => {
                if scheduled
                    .signal
                    .owned_by(&self.exchange_name, &self.strategy_name, &self.symbol)
                {
                    info!(
                        symbol = self.symbol,
                        strategy = self.strategy_name,
                        id = scheduled.signal.id,
                        "restored scheduled signal"
                    );
                    self.scheduled = Some(scheduled);
                } else {
                    warn!(
                        symbol = self.symbol,
                        strategy = self.strategy_name,
                        "discarding scheduled record with foreign ownership marker"
                    );
                    if let Err(err) = self
                        .store
                        .clear_scheduled(&self.symbol, &self.strategy_name)
                        .await
                    {
                        warn!(error = %err, "failed to clear stale scheduled record");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "failed to read scheduled record");
            }
        }

        Ok(())
    }

    /// One lifecycle step at `now` against the current average price.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        current_price: Decimal,
    ) -> EngineResult<TickResult> {
        self.restore().await?;
        let ctx = self.context(now);

        let result = if self.stopped && self.is_idle() {
            TickResult::Idle
        } else if self.active.is_some() {
            self.tick_active(&ctx, now, current_price).await?
        } else if self.scheduled.is_some() {
            self.tick_scheduled(&ctx, now, current_price).await?
        } else if self.stopped {
            TickResult::Idle
        } else {
            self.tick_idle(&ctx, now, current_price).await?
        };

        self.strategy.on_tick(&ctx, &result).await;
        Ok(result)
    }

    async fn tick_active(
        &mut self,
        ctx: &TickContext,
        now: DateTime<Utc>,
        current_price: Decimal,
    ) -> EngineResult<TickResult> {
        let mut signal = self.active.clone().expect("active signal present");
        let unrealized = signal.unrealized_pct(current_price);

        if self
            .breakeven
            .should_trigger(unrealized, self.settings.breakeven_trigger_percent())
        {
            self.apply_breakeven(ctx, &mut signal, current_price, now).await;
        }

        self.emit_profit_milestones(ctx, &signal, unrealized, current_price, now)
            .await;
        self.emit_loss_milestones(ctx, &signal, unrealized, current_price, now)
            .await;

        // Pessimistic order: stop-loss before take-profit, expiry last
        let close = if signal.sl_touched(current_price) {
            Some((CloseReason::StopLoss, signal.price_stop_loss))
        } else if signal.tp_touched(current_price) {
            Some((CloseReason::TakeProfit, signal.price_take_profit))
        } else if now >= signal.expires_at() {
            Some((CloseReason::TimeExpired, current_price))
        } else {
            None
        };

        if let Some((reason, price_close)) = close {
            let closed = self.close_active(ctx, signal, price_close, now, reason).await;
            return Ok(TickResult::Closed(closed));
        }

        self.bus.publish(Event::PingActive(PingEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            signal_id: signal.id.clone(),
            when: now,
        }));
        self.strategy.on_ping(ctx).await;

        let state = ActiveTick {
            signal,
            current_price,
            unrealized_pct: unrealized,
            when: now,
        };
        self.strategy.on_active(ctx, &state).await;
        Ok(TickResult::Active(state))
    }

    async fn tick_scheduled(
        &mut self,
        ctx: &TickContext,
        now: DateTime<Utc>,
        current_price: Decimal,
    ) -> EngineResult<TickResult> {
        let scheduled = self.scheduled.clone().expect("scheduled signal present");

        // The tick at exactly the deadline still gets its activation chance
        if now > scheduled.activation_deadline(self.settings.schedule_await_minutes) {
            let cancelled = self
                .cancel_scheduled(ctx, scheduled, now, CancelReason::ScheduleTimeout)
                .await;
            return Ok(TickResult::Cancelled(cancelled));
        }

        if scheduled.sl_before_entry(current_price) {
            let cancelled = self
                .cancel_scheduled(ctx, scheduled, now, CancelReason::SlBeforeEntry)
                .await;
            return Ok(TickResult::Cancelled(cancelled));
        }

        if scheduled.entry_touched(current_price) {
            let mut signal = scheduled.signal.clone();
            // Activation keeps scheduled_at; only pending_at moves
            signal.pending_at = now;

            let candidate = RiskCandidate {
                signal: &signal,
                current_price,
                when: now,
            };
            if let Err(rejection) = self.risk.evaluate(&candidate, &self.portfolio.snapshot()) {
                self.emit_risk_rejection(now, &rejection.validator, &rejection.reason);
                // Stays scheduled; the gate may admit on a later tick
                return Ok(TickResult::Scheduled(scheduled));
            }

            self.open_signal(ctx, signal.clone(), true).await;
            return Ok(TickResult::Opened(signal));
        }

        self.bus.publish(Event::PingScheduled(PingEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            signal_id: scheduled.signal.id.clone(),
            when: now,
        }));
        self.strategy.on_ping(ctx).await;
        Ok(TickResult::Scheduled(scheduled))
    }

    async fn tick_idle(
        &mut self,
        ctx: &TickContext,
        now: DateTime<Utc>,
        current_price: Decimal,
    ) -> EngineResult<TickResult> {
        let interval = Duration::milliseconds(self.strategy.interval().as_millis());
        if let Some(last) = self.last_signal_time {
            if now - last < interval {
                return Ok(TickResult::Idle);
            }
        }
        self.last_signal_time = Some(now);

        let proposal = match self.strategy.get_signal(ctx).await {
            Ok(Some(proposal)) => proposal,
            Ok(None) => {
                self.strategy.on_idle(ctx).await;
                return Ok(TickResult::Idle);
            }
            Err(err) => {
                warn!(
                    symbol = self.symbol,
                    strategy = self.strategy_name,
                    error = %err,
                    "get_signal failed"
                );
                self.emit_error(now, format!("get_signal failed: {}", err));
                return Ok(TickResult::Idle);
            }
        };

        let price_open = proposal.price_open.unwrap_or(current_price);
        if let Err(err) = validate_proposal(&proposal, price_open, &self.settings) {
            warn!(
                symbol = self.symbol,
                strategy = self.strategy_name,
                error = %err,
                "rejected invalid proposal"
            );
            self.bus.publish(Event::ValidationError(ErrorEvent {
                symbol: self.symbol.clone(),
                strategy_name: self.strategy_name.clone(),
                message: err.to_string(),
                when: now,
            }));
            return Ok(TickResult::Idle);
        }

        let signal = self.build_signal(&proposal, price_open, now);
        let candidate = RiskCandidate {
            signal: &signal,
            current_price,
            when: now,
        };
        if let Err(rejection) = self.risk.evaluate(&candidate, &self.portfolio.snapshot()) {
            self.emit_risk_rejection(now, &rejection.validator, &rejection.reason);
            return Ok(TickResult::Idle);
        }

        if proposal.is_scheduled() {
            let scheduled = ScheduledSignal::new(signal, proposal.id.clone());
            self.scheduled = Some(scheduled.clone());
            if let Err(err) = self.store.write_scheduled(&scheduled).await {
                warn!(error = %err, "failed to persist scheduled signal");
                self.emit_error(now, format!("persist scheduled failed: {}", err));
            }
            self.emit_signal(SignalTransition::Scheduled(scheduled.clone()));
            info!(
                symbol = self.symbol,
                strategy = self.strategy_name,
                position = %scheduled.signal.position,
                price_open = %scheduled.signal.price_open,
                "signal scheduled"
            );
            self.strategy.on_schedule(ctx, &scheduled).await;
            return Ok(TickResult::Scheduled(scheduled));
        }

        self.open_signal(ctx, signal.clone(), false).await;
        Ok(TickResult::Opened(signal))
    }

    /// Fast-forward evaluation over an ordered 1-minute candle sequence.
    ///
    /// Stops at the first terminal transition and returns it; `None` means
    /// the window was exhausted with the signal still alive.
    pub async fn backtest(&mut self, candles: &[Candle]) -> EngineResult<Option<TickResult>> {
        for candle in candles {
            let when = candle.open_time;
            let ctx = self.context(when);

            if let Some(scheduled) = self.scheduled.clone() {
                match evaluate_scheduled(&scheduled, candle, self.settings.schedule_await_minutes)
                {
                    ScheduleVerdict::Timeout { at } => {
                        let cancelled = self
                            .cancel_scheduled(&ctx, scheduled, at, CancelReason::ScheduleTimeout)
                            .await;
                        return Ok(Some(TickResult::Cancelled(cancelled)));
                    }
                    ScheduleVerdict::SlBeforeEntry { at } => {
                        let cancelled = self
                            .cancel_scheduled(&ctx, scheduled, at, CancelReason::SlBeforeEntry)
                            .await;
                        return Ok(Some(TickResult::Cancelled(cancelled)));
                    }
                    ScheduleVerdict::Activated { at } => {
                        let mut signal = scheduled.signal.clone();
                        signal.pending_at = at;

                        let candidate = RiskCandidate {
                            signal: &signal,
                            current_price: signal.price_open,
                            when: at,
                        };
                        if let Err(rejection) =
                            self.risk.evaluate(&candidate, &self.portfolio.snapshot())
                        {
                            self.emit_risk_rejection(at, &rejection.validator, &rejection.reason);
                            continue;
                        }
                        self.open_signal(&ctx, signal, true).await;
                        // Fall through: the activation candle can already close
                    }
                    ScheduleVerdict::Waiting => continue,
                }
            }

            let Some(active) = self.active.clone() else {
                continue;
            };

            if let Some(verdict) = evaluate_touch(&active, candle) {
                let closed = self
                    .close_active(&ctx, active, verdict.price, verdict.at, verdict.reason)
                    .await;
                return Ok(Some(TickResult::Closed(closed)));
            }

            // Milestones ride the candle extremes: profit on the favorable
            // side, loss on the adverse side
            let (favorable, adverse) = match active.position {
                Position::Long => (candle.high, candle.low),
                Position::Short => (candle.low, candle.high),
            };
            let best = active.unrealized_pct(favorable);
            let worst = active.unrealized_pct(adverse);

            if self
                .breakeven
                .should_trigger(best, self.settings.breakeven_trigger_percent())
            {
                let mut signal = active.clone();
                self.apply_breakeven(&ctx, &mut signal, favorable, when).await;
            }

            let signal = self.active.clone().expect("active signal present");
            self.emit_profit_milestones(&ctx, &signal, best, favorable, when)
                .await;
            self.emit_loss_milestones(&ctx, &signal, worst, adverse, when).await;

            if let Some(verdict) = evaluate_expiry(&signal, candle, Interval::M1) {
                let closed = self
                    .close_active(&ctx, signal, verdict.price, verdict.at, verdict.reason)
                    .await;
                return Ok(Some(TickResult::Closed(closed)));
            }
        }

        Ok(None)
    }

    /// Sticky cooperative stop. Idempotent.
    pub fn stop(&mut self) {
        if !self.stopped {
            info!(
                symbol = self.symbol,
                strategy = self.strategy_name,
                "engine stop requested"
            );
            self.stopped = true;
        }
    }

    /// Cancel the scheduled signal (never the active one). With a
    /// `cancel_id`, only a matching scheduled signal is cancelled.
    pub async fn cancel(
        &mut self,
        cancel_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<CancelledSignal>> {
        let Some(scheduled) = self.scheduled.clone() else {
            return Ok(None);
        };
        if let Some(id) = cancel_id {
            if scheduled.cancel_id.as_deref() != Some(id) {
                debug!(
                    symbol = self.symbol,
                    cancel_id = id,
                    "cancel id does not match scheduled signal"
                );
                return Ok(None);
            }
        }
        let ctx = self.context(now);
        let cancelled = self
            .cancel_scheduled(&ctx, scheduled, now, CancelReason::UserCancel)
            .await;
        Ok(Some(cancelled))
    }

    /// Realize `pct` percent of the original size at the current price.
    pub async fn partial_profit(
        &mut self,
        pct: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSignal>> {
        self.partial_close(pct, current_price, now, true).await
    }

    /// Cut `pct` percent of the original size at the current price.
    pub async fn partial_loss(
        &mut self,
        pct: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSignal>> {
        self.partial_close(pct, current_price, now, false).await
    }

    async fn partial_close(
        &mut self,
        pct: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
        profit: bool,
    ) -> EngineResult<Option<ActiveSignal>> {
        let Some(mut signal) = self.active.clone() else {
            return Ok(None);
        };

        let realized = self
            .pnl
            .pnl_percent(signal.position, signal.price_open, current_price);
        let fraction = self.ledger.record(pct, realized);
        if fraction.is_zero() {
            return Ok(Some(signal));
        }

        signal.partial_closed_pct = self.ledger.closed_pct();
        self.active = Some(signal.clone());

        let ctx = self.context(now);
        self.persist_pending(&ctx, &signal).await;

        let event = PartialEvent {
            signal: signal.clone(),
            level: pct,
            current_price,
            when: now,
        };
        if profit {
            self.bus.publish(Event::PartialProfit(event));
            self.strategy.on_partial_profit(&ctx, &signal, pct).await;
        } else {
            self.bus.publish(Event::PartialLoss(event));
            self.strategy.on_partial_loss(&ctx, &signal, pct).await;
        }
        Ok(Some(signal))
    }

    /// Shift the stop-loss by `pct_shift` percent of the original level,
    /// always computed from `original_price_stop_loss` (non-compounding).
    /// Positive shifts tighten toward the market.
    pub async fn trailing_stop(
        &mut self,
        pct_shift: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSignal>> {
        let Some(mut signal) = self.active.clone() else {
            return Ok(None);
        };

        let factor = pct_shift / Decimal::from(100);
        let new_sl = match signal.position {
            Position::Long => signal.original_price_stop_loss * (Decimal::ONE + factor),
            Position::Short => signal.original_price_stop_loss * (Decimal::ONE - factor),
        };

        let valid = match signal.position {
            Position::Long => new_sl < current_price,
            Position::Short => new_sl > current_price,
        };
        if !valid {
            return Err(crate::error::EngineError::InvalidSignal(format!(
                "trailing stop {} would cross current price {}",
                new_sl, current_price
            )));
        }

        signal.price_stop_loss = new_sl;
        self.active = Some(signal.clone());
        let ctx = self.context(now);
        self.persist_pending(&ctx, &signal).await;
        debug!(
            symbol = self.symbol,
            new_stop = %new_sl,
            "trailing stop applied"
        );
        Ok(Some(signal))
    }

    /// Shift the take-profit by `pct_shift` percent of the original level,
    /// always from `original_price_take_profit`. Positive shifts tighten
    /// toward the market.
    pub async fn trailing_take(
        &mut self,
        pct_shift: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSignal>> {
        let Some(mut signal) = self.active.clone() else {
            return Ok(None);
        };

        let factor = pct_shift / Decimal::from(100);
        let new_tp = match signal.position {
            Position::Long => signal.original_price_take_profit * (Decimal::ONE - factor),
            Position::Short => signal.original_price_take_profit * (Decimal::ONE + factor),
        };

        let valid = match signal.position {
            Position::Long => new_tp > current_price,
            Position::Short => new_tp < current_price,
        };
        if !valid {
            return Err(crate::error::EngineError::InvalidSignal(format!(
                "trailing take-profit {} would cross current price {}",
                new_tp, current_price
            )));
        }

        signal.price_take_profit = new_tp;
        self.active = Some(signal.clone());
        let ctx = self.context(now);
        self.persist_pending(&ctx, &signal).await;
        debug!(
            symbol = self.symbol,
            new_take = %new_tp,
            "trailing take-profit applied"
        );
        Ok(Some(signal))
    }

    /// Manually migrate the stop-loss to entry.
    pub async fn breakeven(
        &mut self,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<ActiveSignal>> {
        let Some(mut signal) = self.active.clone() else {
            return Ok(None);
        };
        if self.breakeven.fired() {
            return Ok(Some(signal));
        }
        self.breakeven = BreakevenTracker::restored(true);
        let ctx = self.context(now);
        self.apply_breakeven(&ctx, &mut signal, current_price, now).await;
        Ok(Some(signal))
    }

    fn build_signal(
        &self,
        proposal: &SignalProposal,
        price_open: Decimal,
        now: DateTime<Utc>,
    ) -> ActiveSignal {
        ActiveSignal {
            id: proposal
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
            frame_name: self.frame_name.clone(),
            position: proposal.position,
            price_open,
            price_take_profit: proposal.price_take_profit,
            price_stop_loss: proposal.price_stop_loss,
            original_price_stop_loss: proposal.price_stop_loss,
            original_price_take_profit: proposal.price_take_profit,
            minute_estimated_time: proposal.minute_estimated_time,
            scheduled_at: now,
            pending_at: now,
            note: proposal.note.clone(),
            partial_closed_pct: Decimal::ZERO,
        }
    }

    fn reset_trackers(&mut self, signal: &ActiveSignal) {
        self.partials = PartialTracker::new(
            self.settings.partial_profit_levels.clone(),
            self.settings.partial_loss_levels.clone(),
        );
        self.ledger = PartialLedger::from_closed_pct(signal.partial_closed_pct);
        self.breakeven = BreakevenTracker::new();
    }

    async fn open_signal(&mut self, ctx: &TickContext, signal: ActiveSignal, from_scheduled: bool) {
        self.portfolio.admit(OpenPosition::from(&signal));
        self.scheduled = None;
        self.reset_trackers(&signal);
        self.active = Some(signal.clone());

        if from_scheduled {
            if let Err(err) = self
                .store
                .clear_scheduled(&self.symbol, &self.strategy_name)
                .await
            {
                warn!(error = %err, "failed to clear scheduled record after activation");
            }
        }
        self.persist_pending(ctx, &signal).await;

        self.emit_signal(SignalTransition::Opened(signal.clone()));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            position = %signal.position,
            price_open = %signal.price_open,
            tp = %signal.price_take_profit,
            sl = %signal.price_stop_loss,
            "signal opened"
        );
        self.strategy.on_open(ctx, &signal).await;
    }

    async fn close_active(
        &mut self,
        ctx: &TickContext,
        signal: ActiveSignal,
        price_close: Decimal,
        closed_at: DateTime<Utc>,
        reason: CloseReason,
    ) -> ClosedSignal {
        let final_pnl = self
            .pnl
            .pnl_percent(signal.position, signal.price_open, price_close);
        let pnl_pct = self.ledger.blended_pnl_pct(final_pnl);

        let closed = ClosedSignal {
            price_open_effective: self.pnl.effective_open(signal.position, signal.price_open),
            signal: signal.clone(),
            price_close,
            closed_at,
            close_reason: reason,
            pnl_pct,
        };

        self.portfolio.retire(&signal.id);
        self.active = None;
        if let Err(err) = self.store.clear_pending(&self.symbol, &self.strategy_name).await {
            warn!(error = %err, "failed to clear pending record on close");
            self.emit_error(closed_at, format!("clear pending failed: {}", err));
        }

        self.emit_signal(SignalTransition::Closed(closed.clone()));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            reason = %reason,
            price_close = %price_close,
            pnl_pct = %pnl_pct,
            "signal closed"
        );
        self.strategy.on_close(ctx, &closed).await;
        closed
    }

    async fn cancel_scheduled(
        &mut self,
        ctx: &TickContext,
        scheduled: ScheduledSignal,
        at: DateTime<Utc>,
        reason: CancelReason,
    ) -> CancelledSignal {
        self.scheduled = None;
        if let Err(err) = self
            .store
            .clear_scheduled(&self.symbol, &self.strategy_name)
            .await
        {
            warn!(error = %err, "failed to clear scheduled record on cancel");
            self.emit_error(at, format!("clear scheduled failed: {}", err));
        }

        let cancelled = CancelledSignal {
            signal: scheduled,
            cancelled_at: at,
            cancel_reason: reason,
        };
        self.emit_signal(SignalTransition::Cancelled(cancelled.clone()));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            reason = %reason,
            "scheduled signal cancelled"
        );
        self.strategy.on_cancel(ctx, &cancelled).await;
        cancelled
    }

    async fn apply_breakeven(
        &mut self,
        ctx: &TickContext,
        signal: &mut ActiveSignal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) {
        signal.price_stop_loss = signal.price_open;
        self.active = Some(signal.clone());
        self.persist_pending(ctx, signal).await;

        self.bus.publish(Event::Breakeven(BreakevenEvent {
            signal: signal.clone(),
            current_price,
            when: now,
        }));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            stop = %signal.price_stop_loss,
            "stop-loss moved to entry"
        );
        self.strategy.on_breakeven(ctx, signal).await;
    }

    async fn emit_profit_milestones(
        &mut self,
        ctx: &TickContext,
        signal: &ActiveSignal,
        unrealized_pct: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) {
        for level in self.partials.crossed_profit(unrealized_pct) {
            self.bus.publish(Event::PartialProfit(PartialEvent {
                signal: signal.clone(),
                level,
                current_price,
                when: now,
            }));
            self.strategy.on_partial_profit(ctx, signal, level).await;
        }
    }

    async fn emit_loss_milestones(
        &mut self,
        ctx: &TickContext,
        signal: &ActiveSignal,
        unrealized_pct: Decimal,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) {
        for level in self.partials.crossed_loss(unrealized_pct) {
            self.bus.publish(Event::PartialLoss(PartialEvent {
                signal: signal.clone(),
                level,
                current_price,
                when: now,
            }));
            self.strategy.on_partial_loss(ctx, signal, level).await;
        }
    }

    async fn persist_pending(&self, ctx: &TickContext, signal: &ActiveSignal) {
        match self.store.write_pending(signal).await {
            Ok(()) => self.strategy.on_write(ctx, signal).await,
            Err(err) => {
                warn!(
                    symbol = self.symbol,
                    strategy = self.strategy_name,
                    error = %err,
                    "failed to persist pending signal"
                );
                self.emit_error(ctx.when, format!("persist pending failed: {}", err));
            }
        }
    }

    fn emit_signal(&self, transition: SignalTransition) {
        let event = SignalEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            exchange_name: self.exchange_name.clone(),
            backtest: self.backtest,
            transition,
        };
        self.bus.publish(Event::Signal(event.clone()));
        if self.backtest {
            self.bus.publish(Event::SignalBacktest(event));
        } else {
            self.bus.publish(Event::SignalLive(event));
        }
    }

    fn emit_error(&self, when: DateTime<Utc>, message: String) {
        self.bus.publish(Event::Error(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            message,
            when,
        }));
    }

    fn emit_risk_rejection(&self, when: DateTime<Utc>, validator: &str, reason: &str) {
        self.bus.publish(Event::RiskRejection(RiskRejectionEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            validator: validator.to_string(),
            reason: reason.to_string(),
            when,
        }));
    }
}
