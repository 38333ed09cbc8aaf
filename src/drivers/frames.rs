use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::Interval;

/// Supplies the ordered tick timestamps a backtest runs over.
#[async_trait]
pub trait FrameProvider: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Interval;

    /// Ordered, deduplicated timestamps aligned to the frame interval.
    async fn get_timeframe(&self, symbol: &str) -> anyhow::Result<Vec<DateTime<Utc>>>;
}

/// Frame over a fixed [start, end) range at a fixed cadence.
pub struct FixedFrame {
    name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
}

impl FixedFrame {
    pub fn new(
        name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            interval,
        }
    }
}

#[async_trait]
impl FrameProvider for FixedFrame {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    async fn get_timeframe(&self, _symbol: &str) -> anyhow::Result<Vec<DateTime<Utc>>> {
        if self.end <= self.start {
            anyhow::bail!(
                "frame '{}' has empty range {}..{}",
                self.name,
                self.start,
                self.end
            );
        }

        let step = self.interval.as_duration();
        let mut timestamps = Vec::new();
        let mut ts = self.interval.align(self.start);
        if ts < self.start {
            ts += step;
        }
        while ts < self.end {
            timestamps.push(ts);
            ts += step;
        }
        Ok(timestamps)
    }
}
