use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Settings;
use crate::drivers::{BacktestDriver, FrameProvider, LiveDriver, WalkerDriver};
use crate::engine::{EngineDeps, Portfolio, StrategyEngine};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::exchange::{CandleFeed, Exchange, FrameCursor};
use crate::persistence::{FileSignalStore, NullSignalStore, SignalStore};
use crate::risk::{RiskRegistry, RiskValidator};
use crate::strategies::Strategy;
use crate::types::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EngineKey {
    symbol: String,
    strategy: String,
    backtest: bool,
}

/// Composition root: named provider registries, shared collaborators, and
/// memoized engines.
///
/// Engines are cached by (symbol, strategy, backtest-flag) so live and
/// backtest runs never share state; the same split applies to portfolios.
pub struct Runtime {
    settings: Arc<Settings>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SignalStore>,
    strategies: HashMap<String, Arc<dyn Strategy>>,
    exchanges: HashMap<String, Arc<dyn Exchange>>,
    frames: HashMap<String, Arc<dyn FrameProvider>>,
    risk: RiskRegistry,
    portfolios: std::sync::Mutex<HashMap<bool, Arc<Portfolio>>>,
    engines: Mutex<HashMap<EngineKey, Arc<Mutex<StrategyEngine>>>>,
}

impl Runtime {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        settings
            .validate()
            .map_err(|errors| anyhow::anyhow!("invalid settings: {}", errors.join(", ")))?;
        let store = Arc::new(FileSignalStore::new(settings.persist_dir.clone()));
        Ok(Self {
            settings: Arc::new(settings),
            bus: EventBus::new(),
            clock: Arc::new(SystemClock),
            store,
            strategies: HashMap::new(),
            exchanges: HashMap::new(),
            frames: HashMap::new(),
            risk: RiskRegistry::with_builtins(8),
            portfolios: std::sync::Mutex::new(HashMap::new()),
            engines: Mutex::new(HashMap::new()),
        })
    }

    /// Swap the persistence adapter (default: file store under
    /// `settings.persist_dir`).
    pub fn with_store(mut self, store: Arc<dyn SignalStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings)
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Register a strategy. Its `risk_list` must resolve now, not on the
    /// first tick.
    pub fn register_strategy(&mut self, strategy: Arc<dyn Strategy>) -> EngineResult<()> {
        let name = strategy.name().to_string();
        if self.strategies.contains_key(&name) {
            return Err(EngineError::Fatal(format!(
                "strategy '{}' already registered",
                name
            )));
        }
        self.risk.resolve(&strategy.risk_list())?;
        info!(strategy = name, interval = %strategy.interval(), "strategy registered");
        self.strategies.insert(name, strategy);
        Ok(())
    }

    pub fn register_exchange(&mut self, name: impl Into<String>, exchange: Arc<dyn Exchange>) {
        let name = name.into();
        info!(exchange = name, "exchange registered");
        self.exchanges.insert(name, exchange);
    }

    pub fn register_frame(&mut self, frame: Arc<dyn FrameProvider>) {
        info!(frame = frame.name(), "frame registered");
        self.frames.insert(frame.name().to_string(), frame);
    }

    pub fn register_risk_validator(&mut self, validator: Arc<dyn RiskValidator>) {
        info!(validator = validator.name(), "risk validator registered");
        self.risk.register(validator);
    }

    /// Engine handle for direct control calls (cancel, partials, trailing).
    pub async fn engine(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
        backtest: bool,
    ) -> EngineResult<Arc<Mutex<StrategyEngine>>> {
        let key = EngineKey {
            symbol: symbol.to_string(),
            strategy: strategy_name.to_string(),
            backtest,
        };
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(&key) {
            return Ok(Arc::clone(engine));
        }

        let strategy = self
            .strategies
            .get(strategy_name)
            .ok_or_else(|| EngineError::UnknownName {
                kind: "strategy",
                name: strategy_name.to_string(),
            })?;
        if !self.exchanges.contains_key(exchange_name) {
            return Err(EngineError::UnknownName {
                kind: "exchange",
                name: exchange_name.to_string(),
            });
        }
        let risk = self.risk.resolve(&strategy.risk_list())?;
        let store: Arc<dyn SignalStore> = if backtest {
            Arc::new(NullSignalStore)
        } else {
            Arc::clone(&self.store)
        };

        let deps = EngineDeps {
            strategy: Arc::clone(strategy),
            store,
            portfolio: self.portfolio(backtest),
            risk,
            bus: self.bus.clone(),
            settings: Arc::clone(&self.settings),
        };
        let engine = Arc::new(Mutex::new(StrategyEngine::new(
            symbol,
            strategy_name,
            exchange_name,
            frame_name,
            backtest,
            deps,
        )));
        engines.insert(key, Arc::clone(&engine));
        Ok(engine)
    }

    pub async fn backtest_driver(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> EngineResult<BacktestDriver> {
        let exchange = self.exchange(exchange_name)?;
        let frame = self
            .frames
            .get(frame_name)
            .ok_or_else(|| EngineError::UnknownName {
                kind: "frame",
                name: frame_name.to_string(),
            })?;

        let timestamps = frame
            .get_timeframe(symbol)
            .await
            .map_err(|err| EngineError::recoverable("frame timestamps", err))?;
        let first = *timestamps
            .first()
            .ok_or_else(|| EngineError::Fatal(format!("frame '{}' is empty", frame_name)))?;

        let cursor = FrameCursor::new(first);
        let feed = CandleFeed::backtest(exchange, Arc::clone(&self.settings), cursor.clone());
        let engine = self
            .engine(symbol, strategy_name, exchange_name, frame_name, true)
            .await?;

        Ok(BacktestDriver::new(
            engine,
            feed,
            cursor,
            self.bus.clone(),
            Arc::clone(&self.settings),
            symbol.to_string(),
            strategy_name.to_string(),
            timestamps,
        ))
    }

    pub async fn live_driver(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> EngineResult<LiveDriver> {
        let exchange = self.exchange(exchange_name)?;
        let feed = CandleFeed::live(exchange, Arc::clone(&self.settings));
        let engine = self
            .engine(symbol, strategy_name, exchange_name, "live", false)
            .await?;

        Ok(LiveDriver::new(
            engine,
            feed,
            self.bus.clone(),
            Arc::clone(&self.settings),
            Arc::clone(&self.clock),
            symbol.to_string(),
            strategy_name.to_string(),
        ))
    }

    /// Sequential multi-strategy backtest over one frame.
    pub async fn walker_driver(
        &self,
        symbol: &str,
        strategy_names: &[String],
        exchange_name: &str,
        frame_name: &str,
    ) -> EngineResult<WalkerDriver> {
        let mut drivers = Vec::with_capacity(strategy_names.len());
        for strategy_name in strategy_names {
            drivers.push(
                self.backtest_driver(symbol, strategy_name, exchange_name, frame_name)
                    .await?,
            );
        }
        Ok(WalkerDriver::new(
            symbol.to_string(),
            drivers,
            self.bus.clone(),
        ))
    }

    fn exchange(&self, name: &str) -> EngineResult<Arc<dyn Exchange>> {
        self.exchanges
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownName {
                kind: "exchange",
                name: name.to_string(),
            })
    }

    fn portfolio(&self, backtest: bool) -> Arc<Portfolio> {
        let mut portfolios = self.portfolios.lock().unwrap();
        Arc::clone(
            portfolios
                .entry(backtest)
                .or_insert_with(|| Arc::new(Portfolio::new())),
        )
    }
}
