//! Execution Engine (C6): drains priority work queues under the rate
//! limiter, retries transient failures with bounded backoff, and reconciles
//! acknowledgements back into the Order Manager (spec.md §4.6).
//!
//! Grounded on the teacher's `executor.rs` (`Executor::handle_place_bid`,
//! `handle_cancel_order`, retry/backoff loop) generalized from a single
//! channel-fed actor to the two-priority-queue design spec.md §4.6 requires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{boxed_handler, EventBus};
use crate::model::event::{CancelReason, Event, ResetReason, Topic};
use crate::model::order::{OrderState, Side};
use crate::order_manager::{OrderManager, TimeoutKind};
use crate::priority;
use crate::ratelimit::RateLimiter;
use crate::transport::{ExchangeTransport, TransportEvent};

use super::queue::{WorkItem, WorkPayload, WorkQueue};

#[derive(Debug, Clone, Copy)]
pub struct ExecutionConfig {
    pub worker_count: usize,
    pub modify_worker_count: usize,
    /// Reserved: how many work items a worker may claim per scheduling pass.
    /// Not otherwise exercised since `WorkQueue::pop` is already a
    /// single-item suspend point; kept for config-surface parity with
    /// spec.md §6.
    pub batch_size: usize,
    pub rate_limit: i64,
    pub modify_rate_limit: i64,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            modify_worker_count: 1,
            batch_size: 1,
            rate_limit: 10,
            modify_rate_limit: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MM_EXEC_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_MODIFY_WORKER_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.modify_worker_count = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_RATE_LIMIT") {
            if let Ok(n) = v.parse() {
                cfg.rate_limit = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_MODIFY_RATE_LIMIT") {
            if let Ok(n) = v.parse() {
                cfg.modify_rate_limit = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                cfg.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("MM_EXEC_RETRY_DELAY_MS") {
            if let Ok(n) = v.parse() {
                cfg.retry_delay = Duration::from_millis(n);
            }
        }
        cfg
    }
}

pub struct ExecutionEngine {
    symbol: String,
    config: ExecutionConfig,
    order_manager: Arc<OrderManager>,
    transport: Arc<dyn ExchangeTransport>,
    rate_limiter: Arc<RateLimiter>,
    modify_rate_limiter: Arc<RateLimiter>,
    primary_queue: Arc<WorkQueue>,
    modify_queue: Arc<WorkQueue>,
    bus: EventBus,
    /// Set on `EmergencyStop`; place/modify events are rejected while set,
    /// until an explicit resume (out of scope per spec.md §4.6).
    stopped: Arc<AtomicBool>,
    /// Monotonic counter feeding `cancel_then_replace`'s client_id suffix;
    /// a wall-clock elapsed-time read on a freshly-created `Instant` is
    /// always ~0 and collides across repeated modifies of the same order.
    modify_seq: AtomicU64,
}

fn client_order_id(local_id: Uuid) -> String {
    // `mm_<epoch_ms>_<rand4>` per spec.md §4.6; `local_id` stands in for the
    // wall-clock epoch component since the engine may not assume a real
    // clock source beyond `tokio::time::Instant` (see SPEC_FULL.md §10.6).
    let rand4: u32 = rand::random::<u32>() % 10_000;
    format!("mm_{}_{:04}", local_id.simple(), rand4)
}

/// Recovers `local_id` from a `client_id` produced by [`client_order_id`] or
/// `cancel_then_replace`'s `"modify_<uuid>_<seq>"` format, used as the
/// fallback correlation path when a transport push notification's
/// `remote_id` isn't yet known to the Order Manager (spec.md §6).
fn local_id_from_client_id(client_id: &str) -> Option<Uuid> {
    client_id.split('_').find_map(|segment| Uuid::parse_str(segment).ok())
}

impl ExecutionEngine {
    pub fn new(
        symbol: String,
        config: ExecutionConfig,
        order_manager: Arc<OrderManager>,
        transport: Arc<dyn ExchangeTransport>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            symbol,
            rate_limiter: Arc::new(RateLimiter::new(crate::ratelimit::RateLimiterConfig {
                rate_limit: config.rate_limit,
            })),
            modify_rate_limiter: Arc::new(RateLimiter::new(crate::ratelimit::RateLimiterConfig {
                rate_limit: config.modify_rate_limit,
            })),
            config,
            order_manager,
            transport,
            primary_queue: Arc::new(WorkQueue::new()),
            modify_queue: Arc::new(WorkQueue::new()),
            bus,
            stopped: Arc::new(AtomicBool::new(false)),
            modify_seq: AtomicU64::new(0),
        })
    }

    /// Wires bus subscriptions that translate strategy/risk decisions into
    /// internal queue pushes. Call once before `spawn_workers`.
    pub fn subscribe(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            Topic::PlaceOrder,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::PlaceOrder { symbol, side, price, qty, priority, .. } = env.event {
                        this.handle_place(symbol, side, price, qty, priority).await;
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::CancelOrder,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::CancelOrder { local_id, reason, priority } = env.event {
                        this.handle_cancel(local_id, reason, priority).await;
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::ModifyOrder,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::ModifyOrder { local_id, new_price, new_qty, priority } = env.event {
                        this.handle_modify(local_id, new_price, new_qty, priority).await;
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::OrderReset,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::OrderReset { reason, affected } = env.event {
                        this.handle_order_reset(reason, affected).await;
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::EmergencyStop,
            boxed_handler(move |_env| {
                let this = this.clone();
                async move {
                    this.handle_emergency_stop().await;
                    Ok(())
                }
            }),
        );
    }

    /// Spawns `worker_count` primary workers and `modify_worker_count`
    /// modify workers (spec.md §4.6 "a configurable number of workers drain
    /// each queue concurrently").
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for _ in 0..self.config.worker_count.max(1) {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.primary_worker_loop().await }));
        }
        for _ in 0..self.config.modify_worker_count.max(1) {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.modify_worker_loop().await }));
        }
        handles
    }

    async fn handle_place(&self, symbol: String, side: Side, price: Decimal, qty: Decimal, priority: u8) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("rejecting PlaceOrder: engine is emergency-stopped");
            return;
        }
        let local_id = self.order_manager.create(side, price, qty).await;
        self.primary_queue.push(WorkItem::new(
            WorkPayload::Place { local_id, symbol, side, price, qty },
            priority,
        ));
    }

    async fn handle_cancel(&self, local_id: Uuid, reason: CancelReason, priority: u8) {
        if let Err(err) = self.order_manager.request_cancel(local_id).await {
            warn!(%local_id, %err, "cancel request rejected");
            return;
        }
        self.primary_queue
            .push(WorkItem::new(WorkPayload::Cancel { local_id, reason }, priority));
    }

    async fn handle_modify(&self, local_id: Uuid, new_price: Option<Decimal>, new_qty: Option<Decimal>, priority: u8) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("rejecting ModifyOrder: engine is emergency-stopped");
            return;
        }
        if let Err(err) = self.order_manager.request_modify(local_id, new_price, new_qty).await {
            warn!(%local_id, %err, "modify request rejected");
            return;
        }
        self.modify_queue.push(WorkItem::new(
            WorkPayload::Modify { local_id, new_price, new_qty },
            priority,
        ));
    }

    /// "OrderReset: enumerate all live orders and enqueue a high-priority
    /// cancel per order" (spec.md §4.6). The Order Manager has already
    /// transitioned each order to `PENDING_CANCEL` as part of emitting this
    /// event, so only the work item needs enqueuing here.
    async fn handle_order_reset(&self, _reason: ResetReason, affected: Vec<Uuid>) {
        info!(count = affected.len(), "enqueuing reset cancels");
        for local_id in affected {
            self.primary_queue.push(WorkItem::new(
                WorkPayload::Cancel { local_id, reason: CancelReason::Reset },
                priority::CANCEL_RESET,
            ));
        }
    }

    /// "drain the place and modify queues (discard pending items), then
    /// enqueue priority-0 cancels for every live order" (spec.md §4.6).
    async fn handle_emergency_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        self.modify_queue.drain();
        for item in self.primary_queue.drain() {
            if matches!(item.payload, WorkPayload::Cancel { .. }) {
                self.primary_queue.push(item);
            }
        }

        for order in self.order_manager.query_live(None) {
            if self.order_manager.request_cancel(order.local_id).await.is_ok() {
                self.primary_queue.push(WorkItem::new(
                    WorkPayload::Cancel { local_id: order.local_id, reason: CancelReason::Emergency },
                    priority::CANCEL_EMERGENCY,
                ));
            }
        }
    }

    async fn primary_worker_loop(&self) {
        loop {
            let item = self.primary_queue.pop().await;
            self.rate_limiter.acquire().await;
            match item.payload.clone() {
                WorkPayload::Place { local_id, symbol, side, price, qty } => {
                    self.run_place(item, local_id, symbol, side, price, qty).await;
                }
                WorkPayload::Cancel { local_id, reason } => {
                    self.run_cancel(item, local_id, reason).await;
                }
                WorkPayload::Modify { .. } => {
                    warn!("modify item found on primary queue, dropping");
                }
            }
        }
    }

    async fn modify_worker_loop(&self) {
        loop {
            let item = self.modify_queue.pop().await;
            self.modify_rate_limiter.acquire().await;
            if let WorkPayload::Modify { local_id, new_price, new_qty } = item.payload.clone() {
                self.run_modify(item, local_id, new_price, new_qty).await;
            }
        }
    }

    async fn run_place(&self, item: WorkItem, local_id: Uuid, symbol: String, side: Side, price: Decimal, qty: Decimal) {
        let client_id = client_order_id(local_id);
        match self.transport.place(&symbol, side, price, qty, &client_id).await {
            Ok(remote_id) => {
                let _ = self.order_manager.apply_ack(local_id, remote_id, true).await;
            }
            Err(err) if err.is_transient() && item.retry_count < self.config.max_retries => {
                self.retry(item, WorkPayload::Place { local_id, symbol, side, price, qty }, &self.primary_queue)
                    .await;
            }
            Err(err) => {
                warn!(%local_id, %err, "place failed terminally");
                let _ = self.order_manager.apply_ack(local_id, String::new(), false).await;
            }
        }
    }

    async fn run_cancel(&self, item: WorkItem, local_id: Uuid, reason: CancelReason) {
        let Some(order) = self.order_manager.get(local_id) else {
            return;
        };
        let Some(remote_id) = order.remote_id.clone() else {
            // Place ack hasn't landed yet; requeue behind it (spec.md §4.6:
            // "a cancel whose order has no remote_id yet must be
            // queued-after the place ack").
            if item.retry_count < self.config.max_retries {
                self.retry(item, WorkPayload::Cancel { local_id, reason }, &self.primary_queue).await;
            } else {
                warn!(%local_id, "cancel abandoned: order never acquired a remote_id");
            }
            return;
        };
        match self.transport.cancel(&order.symbol, &remote_id).await {
            // The exchange's cancel ack/fill report drives the terminal
            // CANCELLED transition, not the HTTP return (spec.md §4.6).
            Ok(()) => {}
            Err(crate::error::TransportError::NotFound) => {
                let _ = self.order_manager.apply_terminal(local_id, OrderState::Cancelled).await;
            }
            Err(err) if err.is_transient() && item.retry_count < self.config.max_retries => {
                self.retry(item, WorkPayload::Cancel { local_id, reason }, &self.primary_queue).await;
            }
            Err(err) => {
                warn!(%local_id, %err, "cancel failed terminally, left PENDING_CANCEL for manual recovery");
            }
        }
    }

    async fn run_modify(&self, item: WorkItem, local_id: Uuid, new_price: Option<Decimal>, new_qty: Option<Decimal>) {
        let Some(order) = self.order_manager.get(local_id) else {
            return;
        };
        let Some(remote_id) = order.remote_id.clone() else {
            let _ = self.order_manager.apply_modify_result(local_id, false).await;
            return;
        };

        if self.transport.supports_amend() {
            match self.transport.amend(&order.symbol, &remote_id, new_price, new_qty).await {
                Ok(Some(())) => {
                    let _ = self.order_manager.apply_modify_result(local_id, true).await;
                }
                Ok(None) => {
                    self.cancel_then_replace(item, local_id, order.symbol, order.side, order.price, order.qty_total - order.qty_filled, new_price, new_qty)
                        .await;
                }
                Err(err) if err.is_transient() && item.retry_count < self.config.max_retries => {
                    self.retry(item, WorkPayload::Modify { local_id, new_price, new_qty }, &self.modify_queue)
                        .await;
                }
                Err(err) => {
                    warn!(%local_id, %err, "amend failed terminally");
                    let _ = self.order_manager.apply_modify_result(local_id, false).await;
                }
            }
        } else {
            self.cancel_then_replace(item, local_id, order.symbol, order.side, order.price, order.qty_total - order.qty_filled, new_price, new_qty)
                .await;
        }
    }

    /// Fallback modify strategy (spec.md §4.6 option 2, SPEC_FULL.md §12
    /// decision 1): cancel the resting order, place its remainder at the
    /// requested price, and rebind the original `local_id` to the new
    /// remote order so the Order Manager's view stays a single logical
    /// order.
    #[allow(clippy::too_many_arguments)]
    async fn cancel_then_replace(
        &self,
        item: WorkItem,
        local_id: Uuid,
        symbol: String,
        side: Side,
        original_price: Decimal,
        remainder_qty: Decimal,
        new_price: Option<Decimal>,
        new_qty: Option<Decimal>,
    ) {
        let Some(order) = self.order_manager.get(local_id) else {
            return;
        };
        let Some(old_remote) = order.remote_id.clone() else {
            let _ = self.order_manager.apply_modify_result(local_id, false).await;
            return;
        };
        if let Err(err) = self.transport.cancel(&symbol, &old_remote).await {
            if err.is_transient() && item.retry_count < self.config.max_retries {
                self.retry(item, WorkPayload::Modify { local_id, new_price, new_qty }, &self.modify_queue)
                    .await;
            } else {
                let _ = self.order_manager.apply_modify_result(local_id, false).await;
            }
            return;
        }

        let price = new_price.unwrap_or(original_price);
        let qty = new_qty.unwrap_or(remainder_qty);
        let seq = self.modify_seq.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("modify_{}_{}", local_id.simple(), seq);
        match self.transport.place(&symbol, side, price, qty, &client_id).await {
            Ok(new_remote_id) => {
                self.order_manager.rebind_remote(local_id, new_remote_id);
                let _ = self.order_manager.apply_modify_result(local_id, true).await;
            }
            Err(_) => {
                let _ = self.order_manager.apply_modify_result(local_id, false).await;
            }
        }
    }

    async fn retry(&self, item: WorkItem, payload: WorkPayload, queue: &Arc<WorkQueue>) {
        let retry_count = item.retry_count + 1;
        let delay = self.config.retry_delay * 2u32.pow(retry_count.min(16));
        tokio::time::sleep(delay).await;
        queue.push(WorkItem {
            payload,
            priority: item.priority,
            retry_count,
            enqueued_at: tokio::time::Instant::now(),
        });
    }

    /// Resolves stuck `PENDING_*` orders whose task exceeded its implicit
    /// timeout (spec.md §5: `retry_delay · 2^max_retries + slack`).
    pub async fn reap_timeout(&self, local_id: Uuid, kind: TimeoutKind) {
        let _ = self.order_manager.apply_timeout(local_id, kind).await;
    }

    /// Drains the transport's unsolicited fill/cancel/expire/reject
    /// notifications and reconciles them into the Order Manager (spec.md
    /// §6: "pushed... correlated by remote_id, fallback: client_id").
    /// Mirrors the teacher's `on_order_event` reconciliation pass, adapted
    /// to a pull-based transport rather than a websocket callback.
    pub async fn run_event_listener(self: Arc<Self>) {
        loop {
            match self.transport.next_event().await {
                Some(TransportEvent::Fill { remote_id, client_id, filled_qty, sequence }) => {
                    self.reconcile_fill(&remote_id, client_id.as_deref(), filled_qty, sequence).await;
                }
                Some(TransportEvent::Cancelled { remote_id, client_id }) => {
                    self.reconcile_terminal(&remote_id, client_id.as_deref(), OrderState::Cancelled).await;
                }
                Some(TransportEvent::Expired { remote_id, client_id }) => {
                    self.reconcile_terminal(&remote_id, client_id.as_deref(), OrderState::Expired).await;
                }
                Some(TransportEvent::Rejected { remote_id, client_id, reason }) => {
                    warn!(%remote_id, %reason, "transport rejected a resting order");
                    self.reconcile_terminal(&remote_id, client_id.as_deref(), OrderState::Rejected).await;
                }
                None => return,
            }
        }
    }

    async fn reconcile_fill(&self, remote_id: &str, client_id: Option<&str>, filled_qty: Decimal, sequence: Option<u64>) {
        if self.order_manager.apply_fill(remote_id, filled_qty, sequence).await.is_ok() {
            return;
        }
        let Some(local_id) = client_id.and_then(local_id_from_client_id) else {
            warn!(%remote_id, "fill notification for unknown order, dropping");
            return;
        };
        if let Err(err) = self.order_manager.apply_fill_for_local(local_id, filled_qty, sequence).await {
            warn!(%remote_id, %local_id, %err, "fill notification could not be reconciled");
        }
    }

    async fn reconcile_terminal(&self, remote_id: &str, client_id: Option<&str>, state: OrderState) {
        let local_id = self
            .order_manager
            .local_id_for_remote(remote_id)
            .or_else(|| client_id.and_then(local_id_from_client_id));
        let Some(local_id) = local_id else {
            warn!(%remote_id, "terminal notification for unknown order, dropping");
            return;
        };
        if let Err(err) = self.order_manager.apply_terminal(local_id, state).await {
            warn!(%remote_id, %local_id, %err, "terminal notification could not be reconciled");
        }
    }

    pub fn primary_queue_len(&self) -> usize {
        self.primary_queue.len()
    }

    pub fn modify_queue_len(&self) -> usize {
        self.modify_queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
