use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{ActiveSignal, ScheduledSignal};

/// Durable per-(symbol, strategy) store for the active ("pending") record
/// and the scheduled record.
///
/// Implementations must be atomic per record: after a crash a reader sees
/// either the previous value or the new value, never a torn write.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn read_pending(&self, symbol: &str, strategy: &str)
        -> anyhow::Result<Option<ActiveSignal>>;

    async fn write_pending(&self, signal: &ActiveSignal) -> anyhow::Result<()>;

    async fn clear_pending(&self, symbol: &str, strategy: &str) -> anyhow::Result<()>;

    async fn read_scheduled(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> anyhow::Result<Option<ScheduledSignal>>;

    async fn write_scheduled(&self, signal: &ScheduledSignal) -> anyhow::Result<()>;

    async fn clear_scheduled(&self, symbol: &str, strategy: &str) -> anyhow::Result<()>;
}

/// Default adapter: one JSON document per record under
/// `{root}/signal/{symbol}_{strategy}.json` and
/// `{root}/schedule/{symbol}_{strategy}.json`.
///
/// Writes stage to a temp name in the same directory and rename over the
/// target, so a crash mid-write leaves the previous record intact.
pub struct FileSignalStore {
    root: PathBuf,
}

impl FileSignalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pending_path(&self, symbol: &str, strategy: &str) -> PathBuf {
        self.root
            .join("signal")
            .join(format!("{}_{}.json", symbol, strategy))
    }

    fn scheduled_path(&self, symbol: &str, strategy: &str) -> PathBuf {
        self.root
            .join("schedule")
            .join(format!("{}_{}.json", symbol, strategy))
    }

    async fn write_atomic(path: &Path, json: String) -> anyhow::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("record path has no parent: {}", path.display()))?;
        fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
            Uuid::new_v4()
        ));
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "wrote signal record");
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                // Corrupt record: drop it rather than wedging the engine.
                warn!(path = %path.display(), error = %err, "discarding unreadable signal record");
                Ok(None)
            }
        }
    }

    async fn remove(path: &Path) -> anyhow::Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SignalStore for FileSignalStore {
    async fn read_pending(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> anyhow::Result<Option<ActiveSignal>> {
        Self::read_json(&self.pending_path(symbol, strategy)).await
    }

    async fn write_pending(&self, signal: &ActiveSignal) -> anyhow::Result<()> {
        let path = self.pending_path(&signal.symbol, &signal.strategy_name);
        Self::write_atomic(&path, serde_json::to_string_pretty(signal)?).await
    }

    async fn clear_pending(&self, symbol: &str, strategy: &str) -> anyhow::Result<()> {
        Self::remove(&self.pending_path(symbol, strategy)).await
    }

    async fn read_scheduled(
        &self,
        symbol: &str,
        strategy: &str,
    ) -> anyhow::Result<Option<ScheduledSignal>> {
        Self::read_json(&self.scheduled_path(symbol, strategy)).await
    }

    async fn write_scheduled(&self, signal: &ScheduledSignal) -> anyhow::Result<()> {
        let path = self.scheduled_path(&signal.signal.symbol, &signal.signal.strategy_name);
        Self::write_atomic(&path, serde_json::to_string_pretty(signal)?).await
    }

    async fn clear_scheduled(&self, symbol: &str, strategy: &str) -> anyhow::Result<()> {
        Self::remove(&self.scheduled_path(symbol, strategy)).await
    }
}

/// No-op store used in backtest mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSignalStore;

#[async_trait]
impl SignalStore for NullSignalStore {
    async fn read_pending(&self, _: &str, _: &str) -> anyhow::Result<Option<ActiveSignal>> {
        Ok(None)
    }

    async fn write_pending(&self, _: &ActiveSignal) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_pending(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn read_scheduled(&self, _: &str, _: &str) -> anyhow::Result<Option<ScheduledSignal>> {
        Ok(None)
    }

    async fn write_scheduled(&self, _: &ScheduledSignal) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_scheduled(&self, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample_signal() -> ActiveSignal {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        ActiveSignal {
            id: Uuid::new_v4().to_string(),
            symbol: "BTCUSDT".to_string(),
            strategy_name: "trend".to_string(),
            exchange_name: "binance".to_string(),
            frame_name: "live".to_string(),
            position: Position::Long,
            price_open: dec!(50000),
            price_take_profit: dec!(51000),
            price_stop_loss: dec!(49000),
            original_price_stop_loss: dec!(49000),
            original_price_take_profit: dec!(51000),
            minute_estimated_time: 120,
            scheduled_at: t,
            pending_at: t,
            note: String::new(),
            partial_closed_pct: Decimal::ZERO,
        }
    }

    fn temp_store() -> FileSignalStore {
        let root = std::env::temp_dir().join(format!("tradeloop-store-{}", Uuid::new_v4()));
        FileSignalStore::new(root)
    }

    #[tokio::test]
    async fn test_pending_roundtrip_preserves_pending_at() {
        let store = temp_store();
        let signal = sample_signal();

        store.write_pending(&signal).await.unwrap();
        let restored = store
            .read_pending("BTCUSDT", "trend")
            .await
            .unwrap()
            .expect("record present");

        assert_eq!(restored, signal);
        assert_eq!(restored.pending_at, signal.pending_at);
    }

    #[tokio::test]
    async fn test_missing_record_reads_none() {
        let store = temp_store();
        assert!(store.read_pending("BTCUSDT", "trend").await.unwrap().is_none());
        assert!(store
            .read_scheduled("BTCUSDT", "trend")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = temp_store();
        let signal = sample_signal();
        store.write_pending(&signal).await.unwrap();

        store.clear_pending("BTCUSDT", "trend").await.unwrap();
        store.clear_pending("BTCUSDT", "trend").await.unwrap();
        assert!(store.read_pending("BTCUSDT", "trend").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_discarded() {
        let store = temp_store();
        let path = store.pending_path("BTCUSDT", "trend");
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(&path, b"{not json").await.unwrap();

        assert!(store.read_pending("BTCUSDT", "trend").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduled_roundtrip_keeps_marker() {
        let store = temp_store();
        let scheduled = ScheduledSignal::new(sample_signal(), Some("c9".to_string()));

        store.write_scheduled(&scheduled).await.unwrap();
        let restored = store
            .read_scheduled("BTCUSDT", "trend")
            .await
            .unwrap()
            .expect("record present");

        assert!(restored.is_scheduled);
        assert_eq!(restored.cancel_id.as_deref(), Some("c9"));
        assert_eq!(restored, scheduled);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_record() {
        let store = temp_store();
        let mut signal = sample_signal();
        store.write_pending(&signal).await.unwrap();

        signal.price_stop_loss = signal.price_open;
        store.write_pending(&signal).await.unwrap();

        let restored = store.read_pending("BTCUSDT", "trend").await.unwrap().unwrap();
        assert_eq!(restored.price_stop_loss, dec!(50000));
    }
}
