use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::engine::StrategyEngine;
use crate::error::EngineResult;
use crate::events::{DoneEvent, ErrorEvent, Event, EventBus};
use crate::exchange::CandleFeed;
use crate::types::{Clock, TickResult};

/// Real-time driver for one engine: tick, sleep `tick_ttl_ms`, repeat.
///
/// Yields only opened/closed/cancelled transitions; idle, scheduled and
/// active heartbeats stay on the event bus. Transient failures log and
/// retry on the next cadence; fatal errors emit `exit` and end the stream.
pub struct LiveDriver {
    engine: Arc<Mutex<StrategyEngine>>,
    feed: CandleFeed,
    bus: EventBus,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    symbol: String,
    strategy_name: String,
    ticked_once: bool,
    closed_count: usize,
    done: bool,
}

impl LiveDriver {
    pub(crate) fn new(
        engine: Arc<Mutex<StrategyEngine>>,
        feed: CandleFeed,
        bus: EventBus,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
        symbol: String,
        strategy_name: String,
    ) -> Self {
        Self {
            engine,
            feed,
            bus,
            settings,
            clock,
            symbol,
            strategy_name,
            ticked_once: false,
            closed_count: 0,
            done: false,
        }
    }

    /// Request a cooperative stop. The driver keeps ticking while a
    /// position is held and ends once the engine is idle.
    pub async fn stop(&self) {
        self.engine.lock().await.stop();
    }

    /// Next lifecycle transition. `None` once the driver has shut down.
    pub async fn next_signal(&mut self) -> Option<EngineResult<TickResult>> {
        if self.done {
            return None;
        }

        loop {
            if self.ticked_once {
                tokio::time::sleep(Duration::from_millis(self.settings.tick_ttl_ms)).await;
            } else {
                // Restore persisted state before the first tick
                let mut engine = self.engine.lock().await;
                if let Err(err) = engine.restore().await {
                    warn!(error = %err, "restore failed, starting clean");
                }
                drop(engine);
                info!(
                    symbol = self.symbol,
                    strategy = self.strategy_name,
                    "live driver started"
                );
                self.ticked_once = true;
            }

            let now = self.clock.now();
            let price = match self.feed.average_price(&self.symbol, now).await {
                Ok(price) => price,
                Err(err) if err.is_fatal() => {
                    self.emit_exit(err.to_string());
                    self.done = true;
                    return Some(Err(err));
                }
                Err(err) => {
                    warn!(error = %err, "price fetch failed, retrying next tick");
                    self.emit_error(err.to_string());
                    continue;
                }
            };

            let result = {
                let mut engine = self.engine.lock().await;
                match engine.tick(now, price).await {
                    Ok(result) => result,
                    Err(err) if err.is_fatal() => {
                        self.emit_exit(err.to_string());
                        self.done = true;
                        return Some(Err(err));
                    }
                    Err(err) => {
                        warn!(error = %err, "tick failed, retrying next tick");
                        self.emit_error(err.to_string());
                        continue;
                    }
                }
            };

            // Cooperative shutdown: once stopped, drain the open position
            // and end when idle
            {
                let engine = self.engine.lock().await;
                let should_stop = engine.is_stopped() && engine.is_idle();
                drop(engine);
                if should_stop {
                    if let TickResult::Closed(_) | TickResult::Cancelled(_) = result {
                        // Deliver the final transition before ending
                        if matches!(result, TickResult::Closed(_)) {
                            self.closed_count += 1;
                        }
                        self.finish();
                        return Some(Ok(result));
                    }
                    self.finish();
                    return None;
                }
            }

            match result {
                TickResult::Opened(_) => return Some(Ok(result)),
                TickResult::Closed(_) => {
                    self.closed_count += 1;
                    return Some(Ok(result));
                }
                TickResult::Cancelled(_) => return Some(Ok(result)),
                // idle / scheduled / active stay bus-only
                _ => continue,
            }
        }
    }

    /// Adapt the driver into a lazy (infinite until stopped) stream of
    /// lifecycle transitions.
    pub fn into_stream(self) -> impl futures_util::Stream<Item = EngineResult<TickResult>> {
        futures_util::stream::unfold(self, |mut driver| async move {
            driver.next_signal().await.map(|outcome| (outcome, driver))
        })
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.bus.publish(Event::DoneLive(DoneEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            signals_closed: self.closed_count,
            when: self.clock.now(),
        }));
        info!(
            symbol = self.symbol,
            strategy = self.strategy_name,
            closed = self.closed_count,
            "live driver stopped"
        );
    }

    fn emit_error(&self, message: String) {
        self.bus.publish(Event::Error(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            message,
            when: self.clock.now(),
        }));
    }

    fn emit_exit(&self, message: String) {
        self.bus.publish(Event::Exit(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy_name.clone(),
            message,
            when: self.clock.now(),
        }));
    }
}
