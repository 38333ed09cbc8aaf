use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::engine::StrategyEngine;
use crate::error::EngineResult;
use crate::events::{
    DoneEvent, ErrorEvent, Event, EventBus, PerformanceEvent, ProgressEvent,
};
use crate::exchange::{CandleFeed, FrameCursor};
use crate::types::{Interval, TickResult};

/// Finite historical replayer for one engine.
///
/// Lazily pulls through the frame timestamps; on a fresh open (or fresh
/// schedule) it fetches the forward candle window and hands it to the
/// engine's fast-forward, then skips the frame index past the close.
/// Consumers iterate `next_outcome()` and may break early.
pub struct BacktestDriver {
    engine: Arc<Mutex<StrategyEngine>>,
    feed: CandleFeed,
    cursor: FrameCursor,
    bus: EventBus,
    settings: Arc<Settings>,
    symbol: String,
    strategy_name: String,
    timestamps: Vec<DateTime<Utc>>,
    index: usize,
    closed_count: usize,
    started: Option<Instant>,
    done: bool,
}

impl BacktestDriver {
    pub(crate) fn new(
        engine: Arc<Mutex<StrategyEngine>>,
        feed: CandleFeed,
        cursor: FrameCursor,
        bus: EventBus,
        settings: Arc<Settings>,
        symbol: String,
        strategy_name: String,
        timestamps: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            engine,
            feed,
            cursor,
            bus,
            settings,
            symbol,
            strategy_name,
            timestamps,
            index: 0,
            closed_count: 0,
            started: None,
            done: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn total_frames(&self) -> usize {
        self.timestamps.len()
    }

    pub fn processed_frames(&self) -> usize {
        self.index.min(self.timestamps.len())
    }

    /// Frame-time position of the replay (the look-ahead cursor).
    pub fn frame_position(&self) -> DateTime<Utc> {
        self.cursor.get()
    }

    /// Next terminal outcome (closed or cancelled signal), or `None` when
    /// the frame is exhausted or the engine stopped idle.
    pub async fn next_outcome(&mut self) -> Option<EngineResult<TickResult>> {
        if self.done {
            return None;
        }
        if self.started.is_none() {
            self.started = Some(Instant::now());
            info!(
                symbol = self.symbol,
                strategy = self.strategy_name,
                frames = self.timestamps.len(),
                "backtest started"
            );
        }

        while self.index < self.timestamps.len() {
            let when = self.timestamps[self.index];
            self.cursor.advance(when);

            {
                let engine = self.engine.lock().await;
                if engine.is_stopped() && engine.is_idle() {
                    break;
                }
            }

            let price = match self.feed.average_price(&self.symbol, when).await {
                Ok(price) => price,
                Err(err) if err.is_fatal() => {
                    self.emit_exit(when, err.to_string());
                    self.done = true;
                    return Some(Err(err));
                }
                Err(err) => {
                    warn!(error = %err, "skipping frame after transient price failure");
                    self.emit_error(when, err.to_string());
                    self.step();
                    continue;
                }
            };

            let result = {
                let mut engine = self.engine.lock().await;
                match engine.tick(when, price).await {
                    Ok(result) => result,
                    Err(err) if err.is_fatal() => {
                        self.emit_exit(when, err.to_string());
                        self.done = true;
                        return Some(Err(err));
                    }
                    Err(err) => {
                        drop(engine);
                        warn!(error = %err, "tick failed, continuing");
                        self.emit_error(when, err.to_string());
                        self.step();
                        continue;
                    }
                }
            };

            match result {
                TickResult::Opened(ref signal) => {
                    let lifetime = signal.minute_estimated_time;
                    match self.fast_forward(when, lifetime).await {
                        Ok(Some(outcome)) => return Some(Ok(outcome)),
                        Ok(None) => self.step(),
                        Err(err) => {
                            if err.is_fatal() {
                                self.emit_exit(when, err.to_string());
                            }
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                TickResult::Scheduled(ref scheduled)
                    if scheduled.signal.scheduled_at == when =>
                {
                    // Fresh schedule: fast-forward through the await window too
                    let lifetime = scheduled.signal.minute_estimated_time;
                    match self.fast_forward(when, lifetime).await {
                        Ok(Some(outcome)) => return Some(Ok(outcome)),
                        Ok(None) => self.step(),
                        Err(err) => {
                            if err.is_fatal() {
                                self.emit_exit(when, err.to_string());
                            }
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                TickResult::Closed(_) | TickResult::Cancelled(_) => {
                    if matches!(result, TickResult::Closed(_)) {
                        self.closed_count += 1;
                    }
                    self.step();
                    return Some(Ok(result));
                }
                _ => self.step(),
            }
        }

        self.finish();
        None
    }

    /// Drain the whole frame, collecting every terminal outcome.
    pub async fn run_to_end(&mut self) -> EngineResult<Vec<TickResult>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            outcomes.push(outcome?);
        }
        Ok(outcomes)
    }

    /// Adapt the driver into a lazy stream of terminal outcomes.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = EngineResult<TickResult>> {
        futures_util::stream::unfold(self, |mut driver| async move {
            driver.next_outcome().await.map(|outcome| (outcome, driver))
        })
    }

    /// Fetch the forward window and let the engine fast-forward through it.
    /// Returns the terminal outcome if one fired inside the window.
    async fn fast_forward(
        &mut self,
        when: DateTime<Utc>,
        lifetime_minutes: i64,
    ) -> Result<Option<TickResult>, crate::error::EngineError> {
        let minutes = self.settings.buffer_minutes
            + self.settings.schedule_await_minutes
            + lifetime_minutes
            + 1;
        let since = Interval::M1.align(when);

        let candles = match self
            .feed
            .fetch_forward(&self.symbol, Interval::M1, since, minutes as usize)
            .await
        {
            Ok(candles) => candles,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                // Fall back to plain frame ticking
                warn!(error = %err, "forward window fetch failed, ticking through");
                self.emit_error(when, err.to_string());
                return Ok(None);
            }
        };

        let outcome = {
            let mut engine = self.engine.lock().await;
            engine.backtest(&candles).await?
        };

        let Some(outcome) = outcome else {
            debug!("fast-forward window exhausted without terminal event");
            return Ok(None);
        };

        let resume_after = match &outcome {
            TickResult::Closed(closed) => {
                self.closed_count += 1;
                closed.closed_at
            }
            TickResult::Cancelled(cancelled) => cancelled.cancelled_at,
            other => {
                return Err(crate::error::EngineError::Fatal(format!(
                    "fast-forward returned non-terminal result {:?}",
                    std::mem::discriminant(other)
                )))
            }
        };

        self.skip_past(resume_after);
        Ok(Some(outcome))
    }

    /// Advance the frame index past `ts` and emit progress.
    fn skip_past(&mut self, ts: DateTime<Utc>) {
        self.index = self.timestamps.partition_point(|t| *t <= ts);
        self.cursor.advance(ts);
        self.emit_progress();
    }

    fn step(&mut self) {
        self.index += 1;
        self.emit_progress();
    }

    fn emit_progress(&self) {
        self.bus.publish(Event::ProgressBacktest(ProgressEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            processed_frames: self.processed_frames(),
            total_frames: self.timestamps.len(),
        }));
    }

    fn emit_error(&self, when: DateTime<Utc>, message: String) {
        self.bus.publish(Event::Error(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            message,
            when,
        }));
    }

    fn emit_exit(&self, when: DateTime<Utc>, message: String) {
        self.bus.publish(Event::Exit(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            message,
            when,
        }));
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let elapsed_ms = self
            .started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.bus.publish(Event::Performance(PerformanceEvent {
            label: format!("backtest {}/{}", self.symbol, self.strategy_name),
            elapsed_ms,
            ticks: self.processed_frames(),
        }));
        self.bus.publish(Event::DoneBacktest(DoneEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            signals_closed: self.closed_count,
            // Frame time, not wall time: replays of the same frame must
            // emit identical events
            when: self.cursor.get(),
        }));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            closed = self.closed_count,
            elapsed_ms,
            "backtest finished"
        );
    }
}
