mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{fast_settings, minutes, t0, FlatExchange, ScriptedStrategy, StepClock};
use tradeloop::persistence::{FileSignalStore, SignalStore};
use tradeloop::types::{ActiveSignal, CloseReason, Position, TickResult};
use tradeloop::Runtime;

fn restored_signal(exchange_name: &str, pending_hours_ago: i64) -> ActiveSignal {
    let pending_at = t0() - Duration::hours(pending_hours_ago);
    ActiveSignal {
        id: "carried-over".to_string(),
        symbol: "BTCUSDT".to_string(),
        strategy_name: "scripted".to_string(),
        exchange_name: exchange_name.to_string(),
        frame_name: "live".to_string(),
        position: Position::Long,
        price_open: dec!(50000),
        price_take_profit: dec!(60000),
        price_stop_loss: dec!(40000),
        original_price_stop_loss: dec!(40000),
        original_price_take_profit: dec!(60000),
        minute_estimated_time: 1440,
        scheduled_at: pending_at,
        pending_at,
        note: String::new(),
        partial_closed_pct: Decimal::ZERO,
    }
}

async fn runtime_with_store(store: Arc<FileSignalStore>) -> Runtime {
    let mut runtime = Runtime::new(fast_settings())
        .unwrap()
        .with_store(store)
        .with_clock(Arc::new(StepClock::new(t0(), Duration::minutes(1))));

    let (exchange, _) = FlatExchange::new(dec!(50000));
    runtime.register_exchange("flat", Arc::new(exchange));
    runtime
        .register_strategy(Arc::new(ScriptedStrategy::new("scripted", vec![])))
        .unwrap();
    runtime
}

#[tokio::test]
async fn scenario_c_restart_preserves_signal_lifetime() {
    let root = std::env::temp_dir().join(format!("tradeloop-live-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(FileSignalStore::new(root));

    // A 24h signal opened 12h before the crash
    let signal = restored_signal("flat", 12);
    store.write_pending(&signal).await.unwrap();

    let runtime = runtime_with_store(Arc::clone(&store)).await;
    let mut driver = runtime.live_driver("BTCUSDT", "scripted", "flat").await.unwrap();

    // The driver restores, then ticks until the restored lifetime runs out:
    // 12 hours remain, not the full 24
    let outcome = driver.next_signal().await.expect("a transition").unwrap();
    let TickResult::Closed(closed) = outcome else {
        panic!("expected closed, got {:?}", outcome);
    };

    assert_eq!(closed.close_reason, CloseReason::TimeExpired);
    assert_eq!(closed.signal.pending_at, t0() - Duration::hours(12));
    let remaining = closed.closed_at - t0();
    assert!(
        (remaining - Duration::hours(12)).num_minutes().abs() <= 2,
        "remaining was {:?}",
        remaining
    );
    // Flat tape: the close realizes only the round-trip costs
    assert!(closed.pnl_pct < Decimal::ZERO);

    // Record is gone after the close
    assert!(store.read_pending("BTCUSDT", "scripted").await.unwrap().is_none());

    // Cooperative shutdown on an idle engine ends the stream
    driver.stop().await;
    assert!(driver.next_signal().await.is_none());
}

#[tokio::test]
async fn foreign_ownership_record_is_discarded_on_restore() {
    let root = std::env::temp_dir().join(format!("tradeloop-live-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(FileSignalStore::new(root));

    // Same slot on disk, but the record belongs to another exchange
    let signal = restored_signal("kraken", 1);
    store.write_pending(&signal).await.unwrap();

    let runtime = runtime_with_store(Arc::clone(&store)).await;
    let engine = runtime
        .engine("BTCUSDT", "scripted", "flat", "live", false)
        .await
        .unwrap();

    engine.lock().await.restore().await.unwrap();
    assert!(engine.lock().await.active_signal().is_none());
    assert!(store.read_pending("BTCUSDT", "scripted").await.unwrap().is_none());
}

#[tokio::test]
async fn live_driver_yields_open_then_close() {
    let root = std::env::temp_dir().join(format!("tradeloop-live-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(FileSignalStore::new(root));

    let mut runtime = Runtime::new(fast_settings())
        .unwrap()
        .with_store(Arc::clone(&store) as Arc<dyn SignalStore>)
        .with_clock(Arc::new(StepClock::new(t0(), Duration::minutes(1))));

    let (exchange, price) = FlatExchange::new(dec!(50000));
    runtime.register_exchange("flat", Arc::new(exchange));
    runtime
        .register_strategy(Arc::new(ScriptedStrategy::new(
            "opener",
            vec![Some(tradeloop::SignalProposal::immediate(
                Position::Long,
                dec!(51000),
                dec!(49000),
                120,
            ))],
        )))
        .unwrap();

    let mut driver = runtime.live_driver("BTCUSDT", "opener", "flat").await.unwrap();

    let outcome = driver.next_signal().await.expect("opened").unwrap();
    let TickResult::Opened(signal) = outcome else {
        panic!("expected opened, got {:?}", outcome);
    };
    assert_eq!(signal.price_open, dec!(50000));

    // The open persisted before the yield: a crash here would restore it
    let persisted = store
        .read_pending("BTCUSDT", "opener")
        .await
        .unwrap()
        .expect("pending record");
    assert_eq!(persisted.pending_at, signal.pending_at);

    // Tape jumps through the take-profit
    *price.lock().unwrap() = dec!(51500);
    let outcome = driver.next_signal().await.expect("closed").unwrap();
    let TickResult::Closed(closed) = outcome else {
        panic!("expected closed, got {:?}", outcome);
    };
    assert_eq!(closed.close_reason, CloseReason::TakeProfit);
    assert_eq!(closed.price_close, dec!(51000));

    driver.stop().await;
    assert!(driver.next_signal().await.is_none());
}

#[tokio::test]
async fn stop_while_position_open_drains_before_ending() {
    let root = std::env::temp_dir().join(format!("tradeloop-live-{}", uuid::Uuid::new_v4()));
    let store = Arc::new(FileSignalStore::new(root));

    // Restored position with one hour of lifetime left
    let mut signal = restored_signal("flat", 0);
    signal.minute_estimated_time = 60;
    store.write_pending(&signal).await.unwrap();

    let runtime = runtime_with_store(Arc::clone(&store)).await;
    let mut driver = runtime.live_driver("BTCUSDT", "scripted", "flat").await.unwrap();

    // Stop immediately: the driver must keep ticking until expiry
    driver.stop().await;
    let outcome = driver.next_signal().await.expect("drained close").unwrap();
    let TickResult::Closed(closed) = outcome else {
        panic!("expected closed, got {:?}", outcome);
    };
    assert_eq!(closed.close_reason, CloseReason::TimeExpired);
    assert!((closed.closed_at - t0() - minutes(60)).num_minutes().abs() <= 2);

    assert!(driver.next_signal().await.is_none());
}
