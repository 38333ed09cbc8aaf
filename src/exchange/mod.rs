use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::types::{vwap, Candle, Interval};

/// An exchange adapter supplying candle history and symbol formatting.
///
/// Contract: `get_candles` returns exactly `limit` candles and the first
/// candle's `open_time` equals the interval-aligned `since`. Fetches must
/// be side-effect-free with respect to the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    fn format_price(&self, symbol: &str, price: Decimal) -> String;

    fn format_quantity(&self, symbol: &str, quantity: Decimal) -> String;
}

/// Shared frame position used to police look-ahead in backtest mode.
///
/// The backtest driver advances it as the frame progresses; any guarded
/// fetch reaching past it is a fatal error.
#[derive(Clone)]
pub struct FrameCursor(Arc<AtomicI64>);

impl FrameCursor {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(AtomicI64::new(start.timestamp_millis())))
    }

    pub fn advance(&self, to: DateTime<Utc>) {
        self.0.fetch_max(to.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn get(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0.load(Ordering::SeqCst)).unwrap()
    }
}

/// Candle access layer over an [`Exchange`]: chunked pagination, retries
/// with delay on transient failures, VWAP averaging, and the backtest
/// look-ahead guard.
#[derive(Clone)]
pub struct CandleFeed {
    exchange: Arc<dyn Exchange>,
    settings: Arc<Settings>,
    cursor: Option<FrameCursor>,
}

impl CandleFeed {
    pub fn live(exchange: Arc<dyn Exchange>, settings: Arc<Settings>) -> Self {
        Self {
            exchange,
            settings,
            cursor: None,
        }
    }

    pub fn backtest(exchange: Arc<dyn Exchange>, settings: Arc<Settings>, cursor: FrameCursor) -> Self {
        Self {
            exchange,
            settings,
            cursor: Some(cursor),
        }
    }

    /// Guarded fetch. In backtest mode, reaching past the frame cursor is
    /// fatal (look-ahead protection).
    pub async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let since = interval.align(since);
        if let Some(cursor) = &self.cursor {
            let end = since + chrono::Duration::milliseconds(interval.as_millis() * limit as i64);
            let frame_at = cursor.get();
            if end > frame_at {
                return Err(EngineError::LookAhead {
                    requested: end.to_rfc3339(),
                    cursor: frame_at.to_rfc3339(),
                });
            }
        }
        self.fetch_paginated(symbol, interval, since, limit).await
    }

    /// Unguarded fetch used by the backtest driver's own fast-forward
    /// window. Not for strategy-visible reads.
    pub(crate) async fn fetch_forward(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let since = interval.align(since);
        self.fetch_paginated(symbol, interval, since, limit).await
    }

    /// Current price: VWAP of the last `avg_price_candles_count` 1-minute
    /// candles ending at `when`.
    pub async fn average_price(&self, symbol: &str, when: DateTime<Utc>) -> EngineResult<Decimal> {
        let count = self.settings.avg_price_candles_count;
        let since = Interval::M1.align(when) - chrono::Duration::minutes(count as i64);
        let candles = self.fetch(symbol, Interval::M1, since, count).await?;
        vwap(&candles).ok_or_else(|| {
            EngineError::Fatal(format!("empty VWAP window for {} at {}", symbol, when))
        })
    }

    async fn fetch_paginated(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let mut out: Vec<Candle> = Vec::with_capacity(limit);
        let mut chunk_since = since;

        while out.len() < limit {
            let want = (limit - out.len()).min(self.settings.max_candles_per_request);
            let batch = self.fetch_chunk(symbol, interval, chunk_since, want).await?;

            if batch.len() != want {
                return Err(EngineError::CandleContract {
                    symbol: symbol.to_string(),
                    since: chunk_since.to_rfc3339(),
                    expected: want,
                    got: batch.len(),
                });
            }
            if batch[0].open_time != chunk_since {
                return Err(EngineError::Fatal(format!(
                    "candle contract breach for {}: first open_time {} != requested {}",
                    symbol,
                    batch[0].open_time.to_rfc3339(),
                    chunk_since.to_rfc3339()
                )));
            }

            chunk_since += chrono::Duration::milliseconds(interval.as_millis() * want as i64);
            out.extend(batch);
        }

        debug!(symbol, %interval, count = out.len(), "fetched candles");
        Ok(out)
    }

    async fn fetch_chunk(
        &self,
        symbol: &str,
        interval: Interval,
        since: DateTime<Utc>,
        want: usize,
    ) -> EngineResult<Vec<Candle>> {
        let mut attempt = 0u32;
        loop {
            match self
                .exchange
                .get_candles(symbol, interval, since, want)
                .await
            {
                Ok(batch) => return Ok(batch),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.settings.get_candles_retry_count {
                        return Err(EngineError::recoverable(
                            format!("candle fetch for {} exhausted retries", symbol),
                            err,
                        ));
                    }
                    warn!(
                        symbol,
                        attempt,
                        error = %err,
                        "candle fetch failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        self.settings.get_candles_retry_delay_ms,
                    ))
                    .await;
                }
            }
        }
    }
}
