use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    ActiveSignal, ActiveTick, CancelledSignal, ClosedSignal, Interval, ScheduledSignal,
    SignalProposal, TickContext, TickResult,
};

/// A user-supplied trading strategy.
///
/// `get_signal` is the only required decision point; the lifecycle hooks
/// default to no-ops so simple strategies stay a single method. Hooks run
/// inside the engine tick, after state mutation and event publication for
/// the transition they describe.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Throttling interval: `get_signal` is consulted at most once per
    /// interval per engine.
    fn interval(&self) -> Interval;

    /// Propose a signal, or `None` to keep waiting. Errors are recoverable:
    /// the engine logs, reports on the error topic and treats the tick as
    /// idle.
    async fn get_signal(&self, ctx: &TickContext) -> anyhow::Result<Option<SignalProposal>>;

    /// Names of risk validators this strategy runs under. The union is
    /// evaluated in registration order; all must admit.
    fn risk_list(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_open(&self, _ctx: &TickContext, _signal: &ActiveSignal) {}

    async fn on_active(&self, _ctx: &TickContext, _state: &ActiveTick) {}

    async fn on_idle(&self, _ctx: &TickContext) {}

    async fn on_close(&self, _ctx: &TickContext, _closed: &ClosedSignal) {}

    async fn on_schedule(&self, _ctx: &TickContext, _scheduled: &ScheduledSignal) {}

    async fn on_cancel(&self, _ctx: &TickContext, _cancelled: &CancelledSignal) {}

    /// Called after every successful persistence write.
    async fn on_write(&self, _ctx: &TickContext, _signal: &ActiveSignal) {}

    /// Called at the end of every tick with the tick's result.
    async fn on_tick(&self, _ctx: &TickContext, _result: &TickResult) {}

    async fn on_partial_profit(&self, _ctx: &TickContext, _signal: &ActiveSignal, _level: Decimal) {
    }

    async fn on_partial_loss(&self, _ctx: &TickContext, _signal: &ActiveSignal, _level: Decimal) {}

    async fn on_breakeven(&self, _ctx: &TickContext, _signal: &ActiveSignal) {}

    /// Heartbeat while a signal is waiting or running.
    async fn on_ping(&self, _ctx: &TickContext) {}
}
