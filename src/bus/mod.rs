//! Typed topic-indexed pub/sub event bus with a bounded queue and a worker
//! pool (spec.md §4.2).
//!
//! Grounded on the teacher's actor wiring (`StrategyCoordinator::run` selects
//! over `tokio::sync::mpsc` channels in a loop) generalized from fixed
//! point-to-point channels to a registry of per-[`Topic`] subscriber lists,
//! per the REDESIGN FLAG in spec.md §9 ("statically-dispatched typed
//! topics... Tagged-union event envelopes for ergonomics").

pub mod stats;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::model::event::{Event, EventEnvelope, Topic};
use stats::{BusStats, BusStatsSnapshot};

/// A registered handler. May be synchronous (return a ready future) or
/// suspend; the bus awaits it either way.
pub type Handler = Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    by_topic: HashMap<Topic, Vec<Subscription>>,
}

/// Configuration for [`EventBus::start`] (spec.md §5 "bounded capacity,
/// default 10 000").
#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            worker_count: 1,
        }
    }
}

impl EventBusConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MM_BUS_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.queue_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("MM_BUS_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.worker_count = n;
            }
        }
        cfg
    }
}

struct Inner {
    registry: RwLock<Registry>,
    stats: BusStats,
    next_sub_id: AtomicU64,
}

/// The bus itself. Cheaply `Clone`-able; clones share the same registry,
/// queue sender, and statistics (mirrors the teacher's `Arc`-wrapped shared
/// actor state).
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
    sender: mpsc::Sender<EventEnvelope>,
    receiver: Arc<Mutex<mpsc::Receiver<EventEnvelope>>>,
    workers: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                stats: BusStats::default(),
                next_sub_id: AtomicU64::new(1),
            }),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Arc::new(Mutex::new(Vec::new())),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Registers a handler for `topic`. Handlers registered after an event
    /// begins dispatch are not delivered that event (spec.md §4.2: "delivered
    /// to every subscriber registered at the moment of dispatch").
    pub fn subscribe(&self, topic: Topic, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .registry
            .write()
            .by_topic
            .entry(topic)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.inner.registry.write();
        for subs in registry.by_topic.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Enqueues `event`; suspends if the queue is full (backpressure per
    /// spec.md §4.2/§5 — there is no drop policy).
    pub async fn publish(&self, event: Event) -> EventEnvelope {
        let envelope = EventEnvelope::new(event);
        self.publish_envelope(envelope.clone()).await;
        envelope
    }

    /// Publishes an envelope that already carries a correlation id, so a
    /// handler can chain decisions from the same originating trigger
    /// (spec.md §3 "propagated by components that chain events").
    pub async fn publish_envelope(&self, envelope: EventEnvelope) {
        self.inner.stats.record_publish();
        // `send` suspends only when the bounded queue is full.
        if self.sender.send(envelope).await.is_err() {
            warn!("event bus queue closed, dropping publish");
        }
    }

    /// Spawns a single dispatch loop draining the shared queue, preserving
    /// per-topic FIFO order (spec.md §4.2).
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.start_with_workers(1)
    }

    /// Same as [`Self::start`] but with an explicit worker count, used when
    /// the caller wants true parallel dispatch (at the cost of losing the
    /// per-topic FIFO guarantee — spec.md §4.2).
    pub fn start_with_workers(&self, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
        let worker_count = worker_count.max(1);
        let mut handles = Vec::new();
        for _ in 0..worker_count {
            let bus = self.clone();
            handles.push(tokio::spawn(async move { bus.worker_loop().await }));
        }
        handles
    }

    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.inner.stats.snapshot()
    }

    async fn worker_loop(&self) {
        loop {
            let envelope = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => None,
                    env = receiver.recv() => env,
                }
            };
            let Some(envelope) = envelope else {
                break;
            };
            self.dispatch(envelope).await;
        }
    }

    /// Delivers one envelope to every handler subscribed to its topic.
    /// Handlers run concurrently with each other (spec.md §4.2 "handlers for
    /// the same event may run concurrently"); the event is considered
    /// delivered once every handler has returned or failed.
    async fn dispatch(&self, envelope: EventEnvelope) {
        let topic = envelope.topic();
        let handlers: Vec<Handler> = {
            let registry = self.inner.registry.read();
            registry
                .by_topic
                .get(&topic)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        let futures = handlers.into_iter().map(|handler| {
            let envelope = envelope.clone();
            let stats = &self.inner.stats;
            async move {
                let started = tokio::time::Instant::now();
                let result = handler(envelope).await;
                let failed = result.is_err();
                if let Err(err) = result {
                    debug!(?err, "event bus handler failed");
                }
                stats.record_handler(started.elapsed(), failed);
            }
        });
        futures::future::join_all(futures).await;
    }
}

/// Convenience used by components that only need to build a handler closure
/// from an async fn without writing the `Pin<Box<...>>` boilerplate at every
/// call site.
pub fn boxed_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |env| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f(env)) })
}

// Keep clippy-friendly type alias visible for downstream modules that need
// to name the pinned future type explicitly.
pub type DispatchFuture = Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::Event;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn make_bus() -> EventBus {
        EventBus::new(EventBusConfig {
            queue_capacity: 64,
            worker_count: 1,
        })
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers_of_topic() {
        let bus = make_bus();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        bus.subscribe(
            Topic::EmergencyStop,
            boxed_handler(move |_env| {
                let c1 = c1.clone();
                async move {
                    c1.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        bus.subscribe(
            Topic::EmergencyStop,
            boxed_handler(move |_env| {
                let c2 = c2.clone();
                async move {
                    c2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let _handles = bus.start();
        bus.publish(Event::EmergencyStop { reason: "test".into() }).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().processed, 2);
    }

    #[tokio::test]
    async fn handler_error_is_caught_and_counted() {
        let bus = make_bus();
        bus.subscribe(
            Topic::EmergencyStop,
            boxed_handler(|_env| async move { Err(anyhow::anyhow!("boom")) }),
        );
        let _handles = bus.start();
        bus.publish(Event::EmergencyStop { reason: "x".into() }).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let snap = bus.stats();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.failed, 1);
    }

    #[tokio::test]
    async fn single_worker_preserves_per_topic_fifo() {
        let bus = make_bus();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        bus.subscribe(
            Topic::PriceTick,
            boxed_handler(move |env| {
                let order = order_clone.clone();
                async move {
                    if let Event::PriceTick { reference_price, .. } = env.event {
                        order.lock().await.push(reference_price);
                    }
                    Ok(())
                }
            }),
        );
        let _handles = bus.start();
        for p in [1, 2, 3] {
            bus.publish(Event::PriceTick {
                reference_price: rust_decimal::Decimal::from(p),
                change_from_prev: rust_decimal::Decimal::ZERO,
                confidence: 1.0,
            })
            .await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = order.lock().await;
        assert_eq!(
            *seen,
            vec![
                rust_decimal::Decimal::from(1),
                rust_decimal::Decimal::from(2),
                rust_decimal::Decimal::from(3)
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = make_bus();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let id = bus.subscribe(
            Topic::EmergencyStop,
            boxed_handler(move |_env| {
                let c1 = c1.clone();
                async move {
                    c1.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        bus.unsubscribe(id);
        let _handles = bus.start();
        bus.publish(Event::EmergencyStop { reason: "x".into() }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
