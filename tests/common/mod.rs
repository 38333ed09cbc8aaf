#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tradeloop::exchange::Exchange;
use tradeloop::strategies::Strategy;
use tradeloop::types::{Candle, Clock, Interval, SignalProposal, TickContext};
use tradeloop::Settings;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

pub fn fast_settings() -> Settings {
    Settings {
        tick_ttl_ms: 1,
        get_candles_retry_delay_ms: 1,
        get_candles_retry_count: 1,
        persist_dir: std::env::temp_dir()
            .join(format!("tradeloop-test-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned(),
        ..Settings::default()
    }
}

pub fn flat_candle(open_time: DateTime<Utc>, price: Decimal) -> Candle {
    Candle {
        open_time,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: dec!(1),
    }
}

pub fn candle(
    open_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
) -> Candle {
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume: dec!(1),
    }
}

/// Strategy that replays a prepared list of per-call answers.
pub struct ScriptedStrategy {
    name: String,
    interval: Interval,
    risk: Vec<String>,
    script: Mutex<VecDeque<Option<SignalProposal>>>,
}

impl ScriptedStrategy {
    pub fn new(name: &str, script: Vec<Option<SignalProposal>>) -> Self {
        Self {
            name: name.to_string(),
            interval: Interval::M1,
            risk: Vec::new(),
            script: Mutex::new(script.into()),
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_risk(mut self, risk: Vec<String>) -> Self {
        self.risk = risk;
        self
    }

    /// Convenience: `skip` waits, then one proposal, then waits forever.
    pub fn once_after(name: &str, skip: usize, proposal: SignalProposal) -> Self {
        let mut script: Vec<Option<SignalProposal>> = vec![None; skip];
        script.push(Some(proposal));
        Self::new(name, script)
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn risk_list(&self) -> Vec<String> {
        self.risk.clone()
    }

    async fn get_signal(&self, _ctx: &TickContext) -> anyhow::Result<Option<SignalProposal>> {
        Ok(self.script.lock().unwrap().pop_front().flatten())
    }
}

/// Exchange that serves flat candles at a shared mutable price for any
/// requested window.
pub struct FlatExchange {
    price: Arc<Mutex<Decimal>>,
}

impl FlatExchange {
    pub fn new(price: Decimal) -> (Self, Arc<Mutex<Decimal>>) {
        let shared = Arc::new(Mutex::new(price));
        (
            Self {
                price: Arc::clone(&shared),
            },
            shared,
        )
    }
}

#[async_trait]
impl Exchange for FlatExchange {
    async fn get_candles(
        &self,
        _symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let price = *self.price.lock().unwrap();
        Ok((0..limit)
            .map(|i| {
                flat_candle(
                    since + Duration::milliseconds(interval.as_millis() * i as i64),
                    price,
                )
            })
            .collect())
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        price.round_dp(2).to_string()
    }

    fn format_quantity(&self, _symbol: &str, quantity: Decimal) -> String {
        quantity.round_dp(5).to_string()
    }
}

/// Exchange backed by a pre-built 1-minute candle series.
pub struct SeriesExchange {
    candles: Vec<Candle>,
}

impl SeriesExchange {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        Self { candles }
    }

    /// Flat series over [start - lead, start + length) with overrides.
    pub fn flat_with_overrides(
        start: DateTime<Utc>,
        lead_minutes: i64,
        length_minutes: i64,
        price: Decimal,
        overrides: Vec<Candle>,
    ) -> Self {
        let mut candles: Vec<Candle> = (-lead_minutes..length_minutes)
            .map(|i| flat_candle(start + minutes(i), price))
            .collect();
        for replacement in overrides {
            if let Some(slot) = candles
                .iter_mut()
                .find(|c| c.open_time == replacement.open_time)
            {
                *slot = replacement;
            }
        }
        Self::new(candles)
    }
}

#[async_trait]
impl Exchange for SeriesExchange {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        if interval != Interval::M1 {
            anyhow::bail!("series exchange only serves 1m candles");
        }
        let start = self.candles.partition_point(|c| c.open_time < since);
        let slice = self
            .candles
            .get(start..start + limit)
            .ok_or_else(|| anyhow::anyhow!("not enough candles for {} from {}", symbol, since))?;
        if slice.first().map(|c| c.open_time) != Some(since) {
            anyhow::bail!("series has a gap at {}", since);
        }
        Ok(slice.to_vec())
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        price.to_string()
    }

    fn format_quantity(&self, _symbol: &str, quantity: Decimal) -> String {
        quantity.to_string()
    }
}

/// Deterministic clock stepping forward on every read.
pub struct StepClock {
    now: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl StepClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            now: Mutex::new(start),
            step,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        let current = *now;
        *now += self.step;
        current
    }
}
