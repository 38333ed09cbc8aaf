use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::EngineResult;
use crate::events::{Event, EventBus, ProgressEvent, WalkerDoneEvent};
use crate::types::{ClosedSignal, TickResult};

use super::backtest::BacktestDriver;

/// Outcome of one strategy's full backtest inside a walker run.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub strategy_name: String,
    pub closed: Vec<ClosedSignal>,
    pub cancelled_count: usize,
    /// Sum of realized percents across closed signals.
    pub total_pnl_pct: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct WalkerReport {
    pub runs: Vec<StrategyRun>,
    pub best_strategy: Option<String>,
    pub best_metric: Option<Decimal>,
}

/// Runs a list of strategies' backtests sequentially over the same frame
/// and tracks the best total-PnL metric.
pub struct WalkerDriver {
    symbol: String,
    drivers: Vec<BacktestDriver>,
    bus: EventBus,
}

impl WalkerDriver {
    pub(crate) fn new(symbol: String, drivers: Vec<BacktestDriver>, bus: EventBus) -> Self {
        Self {
            symbol,
            drivers,
            bus,
        }
    }

    pub async fn run(mut self) -> EngineResult<WalkerReport> {
        let total = self.drivers.len();
        let mut report = WalkerReport::default();
        let mut last_frame_at: Option<DateTime<Utc>> = None;

        let drivers = std::mem::take(&mut self.drivers);
        for (i, mut driver) in drivers.into_iter().enumerate() {
            let strategy_name = driver.strategy_name().to_string();
            info!(
                symbol = self.symbol,
                strategy = strategy_name,
                "walker running strategy {}/{}",
                i + 1,
                total
            );

            let outcomes = driver.run_to_end().await?;
            last_frame_at = Some(driver.frame_position());
            let mut run = StrategyRun {
                strategy_name: strategy_name.clone(),
                closed: Vec::new(),
                cancelled_count: 0,
                total_pnl_pct: Decimal::ZERO,
            };
            for outcome in outcomes {
                match outcome {
                    TickResult::Closed(closed) => {
                        run.total_pnl_pct += closed.pnl_pct;
                        run.closed.push(closed);
                    }
                    TickResult::Cancelled(_) => run.cancelled_count += 1,
                    _ => {}
                }
            }

            let is_better = report
                .best_metric
                .map(|best| run.total_pnl_pct > best)
                .unwrap_or(true);
            if is_better {
                report.best_metric = Some(run.total_pnl_pct);
                report.best_strategy = Some(run.strategy_name.clone());
            }
            report.runs.push(run);

            self.bus.publish(Event::ProgressWalker(ProgressEvent {
                symbol: self.symbol.clone(),
                strategy_name,
                processed_frames: i + 1,
                total_frames: total,
            }));
        }

        self.bus.publish(Event::DoneWalker(WalkerDoneEvent {
            symbol: self.symbol.clone(),
            strategies: total,
            best_strategy: report.best_strategy.clone(),
            best_metric: report.best_metric,
            // Frame time from the last replay; wall clock only when the
            // walker ran over no strategies at all
            when: last_frame_at.unwrap_or_else(Utc::now),
        }));
        info!(
            symbol = self.symbol,
            best = report.best_strategy.as_deref().unwrap_or("-"),
            "walker finished"
        );
        Ok(report)
    }
}
