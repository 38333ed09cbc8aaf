use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{ActiveSignal, CancelledSignal, ClosedSignal, ScheduledSignal};

/// Bus topics. Every event maps to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Signal,
    SignalLive,
    SignalBacktest,
    DoneLive,
    DoneBacktest,
    DoneWalker,
    ProgressBacktest,
    ProgressWalker,
    PartialProfit,
    PartialLoss,
    Breakeven,
    RiskRejection,
    PingScheduled,
    PingActive,
    Performance,
    Error,
    Exit,
    ValidationError,
}

/// Lifecycle transition payload published on the `signal` topic and its
/// mode-specific mirror (`signal-live` / `signal-backtest`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalTransition {
    Opened(ActiveSignal),
    Scheduled(ScheduledSignal),
    Closed(ClosedSignal),
    Cancelled(CancelledSignal),
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub backtest: bool,
    pub transition: SignalTransition,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub processed_frames: usize,
    pub total_frames: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartialEvent {
    pub signal: ActiveSignal,
    /// Milestone percent from entry.
    pub level: Decimal,
    pub current_price: Decimal,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakevenEvent {
    pub signal: ActiveSignal,
    pub current_price: Decimal,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskRejectionEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub validator: String,
    pub reason: String,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub signal_id: String,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceEvent {
    pub label: String,
    pub elapsed_ms: u64,
    pub ticks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub message: String,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoneEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub signals_closed: usize,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkerDoneEvent {
    pub symbol: String,
    pub strategies: usize,
    pub best_strategy: Option<String>,
    pub best_metric: Option<Decimal>,
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    Signal(SignalEvent),
    SignalLive(SignalEvent),
    SignalBacktest(SignalEvent),
    DoneLive(DoneEvent),
    DoneBacktest(DoneEvent),
    DoneWalker(WalkerDoneEvent),
    ProgressBacktest(ProgressEvent),
    ProgressWalker(ProgressEvent),
    PartialProfit(PartialEvent),
    PartialLoss(PartialEvent),
    Breakeven(BreakevenEvent),
    RiskRejection(RiskRejectionEvent),
    PingScheduled(PingEvent),
    PingActive(PingEvent),
    Performance(PerformanceEvent),
    Error(ErrorEvent),
    Exit(ErrorEvent),
    ValidationError(ErrorEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Signal(_) => Topic::Signal,
            Event::SignalLive(_) => Topic::SignalLive,
            Event::SignalBacktest(_) => Topic::SignalBacktest,
            Event::DoneLive(_) => Topic::DoneLive,
            Event::DoneBacktest(_) => Topic::DoneBacktest,
            Event::DoneWalker(_) => Topic::DoneWalker,
            Event::ProgressBacktest(_) => Topic::ProgressBacktest,
            Event::ProgressWalker(_) => Topic::ProgressWalker,
            Event::PartialProfit(_) => Topic::PartialProfit,
            Event::PartialLoss(_) => Topic::PartialLoss,
            Event::Breakeven(_) => Topic::Breakeven,
            Event::RiskRejection(_) => Topic::RiskRejection,
            Event::PingScheduled(_) => Topic::PingScheduled,
            Event::PingActive(_) => Topic::PingActive,
            Event::Performance(_) => Topic::Performance,
            Event::Error(_) => Topic::Error,
            Event::Exit(_) => Topic::Exit,
            Event::ValidationError(_) => Topic::ValidationError,
        }
    }
}

struct SubscriberEntry {
    id: u64,
    topics: Option<HashSet<Topic>>,
    tx: mpsc::UnboundedSender<Event>,
}

struct Inner {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

/// In-process publish/subscribe bus.
///
/// Each subscriber owns a FIFO queue: events arrive in publication order,
/// and a callback subscriber's handler finishes before its next delivery.
/// No ordering is defined across subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Publish to every subscriber whose topic filter matches. Never blocks;
    /// queues are unbounded and disconnected subscribers are pruned.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|entry| {
            let wants = entry
                .topics
                .as_ref()
                .map(|set| set.contains(&topic))
                .unwrap_or(true);
            if !wants {
                return true;
            }
            entry.tx.send(event.clone()).is_ok()
        });
        debug!(?topic, "published event");
    }

    /// Subscribe to a set of topics; an empty set means all topics.
    pub fn subscribe<I>(&self, topics: I) -> Subscription
    where
        I: IntoIterator<Item = Topic>,
    {
        let set: HashSet<Topic> = topics.into_iter().collect();
        let filter = if set.is_empty() { None } else { Some(set) };
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().unwrap().push(SubscriberEntry {
            id,
            topics: filter,
            tx,
        });
        Subscription {
            id,
            rx,
            bus: Arc::clone(&self.inner),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(std::iter::empty())
    }

    /// Spawn a task draining events into an async handler. Deliveries to
    /// this subscriber are serialized: the handler completes before the
    /// next event is handed over.
    pub fn subscribe_with<F, Fut>(&self, topics: Vec<Topic>, mut handler: F) -> SubscriptionTask
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(topics);
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event).await;
            }
        });
        SubscriptionTask { handle }
    }

    fn unsubscribe(inner: &Inner, id: u64) {
        inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|entry| entry.id != id);
    }
}

/// A pull-based subscription. Dropping it detaches from the bus.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Event>,
    bus: Arc<Inner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        EventBus::unsubscribe(&self.bus, self.id);
    }
}

/// Handle to a callback subscriber task.
pub struct SubscriptionTask {
    handle: JoinHandle<()>,
}

impl SubscriptionTask {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for SubscriptionTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
