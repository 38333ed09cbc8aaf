//! Trading-strategy execution engine.
//!
//! Drives user-supplied strategies through the signal lifecycle
//! (idle → scheduled → opened → active → closed/cancelled) against either
//! historical candles (backtest, with fast-forward) or live market data
//! (infinite loop with crash-safe persistence). Strategies, exchanges and
//! frames plug in through injected provider traits.

pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod persistence;
pub mod risk;
pub mod runtime;
pub mod strategies;
pub mod types;

pub use config::Settings;
pub use engine::{EngineDeps, StrategyEngine};
pub use error::{EngineError, EngineResult};
pub use events::{Event, EventBus, Topic};
pub use runtime::Runtime;
pub use types::{
    ActiveSignal, CancelReason, Candle, CloseReason, Interval, Position, ScheduledSignal,
    SignalProposal, TickContext, TickResult,
};
