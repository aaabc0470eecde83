//! Order Manager (C3): canonical order store, finite state machine,
//! periodic reset, in-flight modify table (spec.md §4.3).
//!
//! Grounded on the teacher's `legacy::order_manager::OrderManager`
//! (`HashMap<String, Order>` + `sync()` reconciliation) and `types::Order`,
//! generalized to the full FSM spec.md §3/§4.3 specify and the BID/ASK
//! two-sided book. All mutating operations take the single `parking_lot`
//! lock described in SPEC_FULL.md §10.6; the lock is always released before
//! any `.await` (bus publish), satisfying spec.md §5's "no two locks held
//! simultaneously".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::OrderManagerError;
use crate::model::event::{Event, ResetReason};
use crate::model::order::{Order, OrderState, Side};

/// Retention window for terminal orders before they are purged from the
/// store (spec.md §3 "Lifecycles" — "archived... for 2 hours, then purged").
const ARCHIVE_TTL: Duration = Duration::from_secs(7_200);

#[derive(Debug, Clone, Copy)]
pub struct OrderManagerConfig {
    pub reset_interval: Duration,
    pub max_pending_modifications: usize,
    pub modification_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            reset_interval: Duration::from_secs(300),
            max_pending_modifications: 64,
            modification_timeout: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl OrderManagerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MM_RESET_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.reset_interval = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("MM_MAX_PENDING_MODIFICATIONS") {
            if let Ok(n) = v.parse() {
                cfg.max_pending_modifications = n;
            }
        }
        if let Ok(v) = std::env::var("MM_MODIFICATION_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.modification_timeout = Duration::from_secs(n);
            }
        }
        if let Ok(v) = std::env::var("MM_CLEANUP_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.cleanup_interval = Duration::from_secs(n);
            }
        }
        cfg
    }
}

/// `(local_id, new_price?, new_qty?, submitted_at)` — spec.md §3.
#[derive(Debug, Clone)]
struct ModifyRequest {
    new_price: Option<Decimal>,
    new_qty: Option<Decimal>,
    submitted_at: Instant,
    prior_state: OrderState,
}

/// What kind of in-flight network task timed out, for [`OrderManager::apply_timeout`]
/// (spec.md §5 "Cancellation and timeouts").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Place,
    Modify,
    Cancel,
}

/// Read-only snapshot for monitoring (SPEC_FULL.md §11, grounded on the
/// Python prototype's `get_reset_stats`).
#[derive(Debug, Clone)]
pub struct ResetStats {
    pub last_reset_time: Option<Instant>,
    pub next_reset_time: Option<Instant>,
    pub active_orders_count: usize,
    pub pending_modifications_count: usize,
}

struct Store {
    orders: HashMap<Uuid, Order>,
    remote_index: HashMap<String, Uuid>,
    pending_modifications: HashMap<Uuid, ModifyRequest>,
    last_reset_at: Option<Instant>,
    lifetime_place_count: u64,
}

pub struct OrderManager {
    symbol: String,
    config: OrderManagerConfig,
    store: Mutex<Store>,
    bus: EventBus,
}

impl OrderManager {
    pub fn new(symbol: String, config: OrderManagerConfig, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            symbol,
            config,
            store: Mutex::new(Store {
                orders: HashMap::new(),
                remote_index: HashMap::new(),
                pending_modifications: HashMap::new(),
                last_reset_at: None,
                lifetime_place_count: 0,
            }),
            bus,
        })
    }

    /// `create(symbol, side, price, qty) -> local_id` (spec.md §4.3).
    pub async fn create(&self, side: Side, price: Decimal, qty: Decimal) -> Uuid {
        let now = Instant::now();
        let order = Order::new(self.symbol.clone(), side, price, qty, now);
        let local_id = order.local_id;
        {
            let mut store = self.store.lock();
            store.lifetime_place_count += 1;
            store.orders.insert(local_id, order.clone());
        }
        self.bus
            .publish(Event::OrderStatus { order, old_state: None })
            .await;
        local_id
    }

    /// `apply_ack(local_id, remote_id, accepted)`: `PENDING_NEW -> ACTIVE | REJECTED`.
    pub async fn apply_ack(&self, local_id: Uuid, remote_id: String, accepted: bool) -> Result<(), OrderManagerError> {
        let (order, old_state) = {
            let mut store = self.store.lock();
            let order = store
                .orders
                .get(&local_id)
                .cloned()
                .ok_or(OrderManagerError::UnknownOrder(local_id))?;
            if order.state != OrderState::PendingNew {
                return Err(OrderManagerError::InvalidState(local_id));
            }
            let old_state = order.state;
            let new_state = if accepted { OrderState::Active } else { OrderState::Rejected };
            let now = Instant::now();
            let order = store
                .orders
                .get_mut(&local_id)
                .expect("checked above");
            order.state = new_state;
            order.updated_at = now;
            order.last_event_at = now;
            if accepted {
                order.remote_id = Some(remote_id.clone());
                store.remote_index.insert(remote_id, local_id);
            }
            (order.clone(), old_state)
        };
        self.bus
            .publish(Event::OrderStatus { order, old_state: Some(old_state) })
            .await;
        Ok(())
    }

    /// `apply_fill(remote_id, filled_qty)`. `sequence`, when present, lets the
    /// manager deduplicate replayed fills (SPEC_FULL.md §12 decision 2); absent
    /// a sequence number every call is additive per spec.md §4.3.
    pub async fn apply_fill(
        &self,
        remote_id: &str,
        filled_qty: Decimal,
        sequence: Option<u64>,
    ) -> Result<(), OrderManagerError> {
        let local_id = {
            let store = self.store.lock();
            *store
                .remote_index
                .get(remote_id)
                .ok_or_else(|| OrderManagerError::UnknownOrder(Uuid::nil()))?
        };
        self.apply_fill_for_local(local_id, filled_qty, sequence).await
    }

    /// Same as [`Self::apply_fill`] but keyed by `local_id` directly, used by
    /// the Execution Engine's transport-event listener when an unsolicited
    /// fill notification's `remote_id` can't be resolved and it falls back
    /// to `client_id` (spec.md §6 "correlated by remote_id, fallback:
    /// client_id").
    pub async fn apply_fill_for_local(
        &self,
        local_id: Uuid,
        filled_qty: Decimal,
        sequence: Option<u64>,
    ) -> Result<(), OrderManagerError> {
        let (order, old_state) = {
            let mut store = self.store.lock();
            let order = store.orders.get(&local_id).cloned().ok_or(OrderManagerError::UnknownOrder(local_id))?;
            if !matches!(
                order.state,
                OrderState::Active | OrderState::PartiallyFilled | OrderState::PendingModify | OrderState::PendingCancel
            ) {
                return Err(OrderManagerError::InvalidState(local_id));
            }
            let old_state = order.state;
            let now = Instant::now();
            let order_mut = store.orders.get_mut(&local_id).expect("checked above");
            order_mut.qty_filled = (order_mut.qty_filled + filled_qty).min(order_mut.qty_total);
            order_mut.state = if order_mut.qty_filled >= order_mut.qty_total {
                OrderState::Filled
            } else if order_mut.state != OrderState::PendingModify && order_mut.state != OrderState::PendingCancel {
                OrderState::PartiallyFilled
            } else {
                order_mut.state
            };
            order_mut.updated_at = now;
            order_mut.last_event_at = now;
            if order_mut.state.is_terminal() {
                if let Some(remote_id) = order_mut.remote_id.clone() {
                    store.remote_index.remove(&remote_id);
                }
            }
            let _ = sequence; // no monotonic sequence guarantee assumed; see SPEC_FULL.md §12.2
            (order_mut.clone(), old_state)
        };
        self.bus
            .publish(Event::OrderStatus { order: order.clone(), old_state: Some(old_state) })
            .await;
        self.bus
            .publish(Event::OrderFill {
                remote_id: order.remote_id.clone(),
                local_id: Some(order.local_id),
                filled_qty,
                sequence,
            })
            .await;
        Ok(())
    }

    /// `request_modify(local_id, new_price?, new_qty?)` (spec.md §4.3).
    pub async fn request_modify(
        &self,
        local_id: Uuid,
        new_price: Option<Decimal>,
        new_qty: Option<Decimal>,
    ) -> Result<(), OrderManagerError> {
        let order = {
            let mut store = self.store.lock();
            let order = store
                .orders
                .get(&local_id)
                .cloned()
                .ok_or(OrderManagerError::UnknownOrder(local_id))?;
            match order.state {
                OrderState::PendingModify => return Err(OrderManagerError::AlreadyModifying(local_id)),
                OrderState::Active | OrderState::PartiallyFilled => {}
                _ => return Err(OrderManagerError::InvalidState(local_id)),
            }
            let price_changes = new_price.is_some_and(|p| p != order.price);
            let qty_changes = new_qty.is_some_and(|q| q != order.qty_total);
            if !price_changes && !qty_changes {
                return Err(OrderManagerError::NoChange(local_id));
            }
            let now = Instant::now();
            let prior_state = order.state;
            store.pending_modifications.insert(
                local_id,
                ModifyRequest {
                    new_price,
                    new_qty,
                    submitted_at: now,
                    prior_state,
                },
            );
            let order_mut = store.orders.get_mut(&local_id).expect("checked above");
            order_mut.state = OrderState::PendingModify;
            order_mut.updated_at = now;
            order_mut.last_event_at = now;
            order_mut.clone()
        };
        self.bus
            .publish(Event::OrderStatus { order: order.clone(), old_state: None })
            .await;
        self.bus.publish(Event::ModifyRequested { local_id }).await;
        Ok(())
    }

    /// `apply_modify_result(local_id, success)` (spec.md §4.3).
    pub async fn apply_modify_result(&self, local_id: Uuid, success: bool) -> Result<(), OrderManagerError> {
        let order = {
            let mut store = self.store.lock();
            let request = store
                .pending_modifications
                .remove(&local_id)
                .ok_or(OrderManagerError::InvalidState(local_id))?;
            let now = Instant::now();
            let order = store
                .orders
                .get_mut(&local_id)
                .ok_or(OrderManagerError::UnknownOrder(local_id))?;
            if success {
                if let Some(p) = request.new_price {
                    order.price = p;
                }
                if let Some(q) = request.new_qty {
                    order.qty_total = q;
                }
            }
            order.state = request.prior_state;
            order.updated_at = now;
            order.last_event_at = now;
            order.clone()
        };
        self.bus
            .publish(Event::OrderStatus { order, old_state: Some(OrderState::PendingModify) })
            .await;
        if success {
            self.bus.publish(Event::ModifySucceeded { local_id }).await;
        } else {
            self.bus.publish(Event::ModifyFailed { local_id }).await;
        }
        Ok(())
    }

    /// `request_cancel(local_id)`: idempotent on `PENDING_CANCEL` (spec.md §4.3).
    pub async fn request_cancel(&self, local_id: Uuid) -> Result<(), OrderManagerError> {
        let order = {
            let mut store = self.store.lock();
            let order = store
                .orders
                .get(&local_id)
                .cloned()
                .ok_or(OrderManagerError::UnknownOrder(local_id))?;
            if order.state == OrderState::PendingCancel {
                return Ok(());
            }
            if !order.state.is_live() {
                return Err(OrderManagerError::InvalidState(local_id));
            }
            let now = Instant::now();
            let order_mut = store.orders.get_mut(&local_id).expect("checked above");
            order_mut.state = OrderState::PendingCancel;
            order_mut.updated_at = now;
            order_mut.last_event_at = now;
            order_mut.clone()
        };
        self.bus
            .publish(Event::OrderStatus { order, old_state: None })
            .await;
        self.bus.publish(Event::CancelRequested { local_id }).await;
        Ok(())
    }

    /// Applies exchange acknowledgement of a cancel (`PENDING_CANCEL -> CANCELLED`)
    /// or an exchange-driven expiry (`any_live -> EXPIRED`).
    pub async fn apply_terminal(&self, local_id: Uuid, state: OrderState) -> Result<(), OrderManagerError> {
        if !state.is_terminal() {
            return Err(OrderManagerError::InvalidState(local_id));
        }
        let (order, old_state) = {
            let mut store = self.store.lock();
            let order = store.orders.get(&local_id).cloned().ok_or(OrderManagerError::UnknownOrder(local_id))?;
            if order.state.is_terminal() {
                return Err(OrderManagerError::InvalidState(local_id));
            }
            let old_state = order.state;
            let now = Instant::now();
            let order_mut = store.orders.get_mut(&local_id).expect("checked above");
            order_mut.state = state;
            order_mut.updated_at = now;
            order_mut.last_event_at = now;
            if let Some(remote_id) = order_mut.remote_id.clone() {
                store.remote_index.remove(&remote_id);
            }
            (order_mut.clone(), old_state)
        };
        self.bus
            .publish(Event::OrderStatus { order, old_state: Some(old_state) })
            .await;
        Ok(())
    }

    /// Resolves an in-flight network task timeout without leaving the order
    /// wedged (spec.md §5): places become `REJECTED`, modifies restore the
    /// prior live state, cancels are left `PENDING_CANCEL` (retry-safe).
    pub async fn apply_timeout(&self, local_id: Uuid, kind: TimeoutKind) -> Result<(), OrderManagerError> {
        match kind {
            TimeoutKind::Place => self.apply_terminal(local_id, OrderState::Rejected).await,
            TimeoutKind::Modify => self.apply_modify_result(local_id, false).await,
            TimeoutKind::Cancel => {
                warn!(%local_id, "cancel task timed out, left PENDING_CANCEL for retry");
                Ok(())
            }
        }
    }

    /// Rebinds `local_id` to a freshly-placed remote order, used only by the
    /// Execution Engine's cancel-then-replace modify fallback (spec.md §4.6
    /// option 2) where the old remote id is cancelled and a new one takes
    /// its place under the same `local_id`.
    pub fn rebind_remote(&self, local_id: Uuid, new_remote_id: String) {
        let mut store = self.store.lock();
        if let Some(order) = store.orders.get_mut(&local_id) {
            if let Some(old) = order.remote_id.take() {
                store.remote_index.remove(&old);
            }
            order.remote_id = Some(new_remote_id.clone());
            store.remote_index.insert(new_remote_id, local_id);
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Resolves a `remote_id` to its `local_id`, used by the Execution
    /// Engine's transport-event listener to correlate unsolicited
    /// cancel/expire/reject notifications (spec.md §6).
    pub fn local_id_for_remote(&self, remote_id: &str) -> Option<Uuid> {
        self.store.lock().remote_index.get(remote_id).copied()
    }

    pub fn get(&self, local_id: Uuid) -> Option<Order> {
        self.store.lock().orders.get(&local_id).cloned()
    }

    pub fn query_live(&self, side: Option<Side>) -> Vec<Order> {
        self.store
            .lock()
            .orders
            .values()
            .filter(|o| o.is_live() && side.map_or(true, |s| o.side == s))
            .cloned()
            .collect()
    }

    pub fn query_by_price_range(&self, min: Decimal, max: Decimal) -> Vec<Order> {
        self.store
            .lock()
            .orders
            .values()
            .filter(|o| o.is_live() && o.price >= min && o.price <= max)
            .cloned()
            .collect()
    }

    /// `cancel_all() -> [local_id]` (spec.md §4.3).
    pub async fn cancel_all(&self) -> Vec<Uuid> {
        let orders = {
            let mut store = self.store.lock();
            let now = Instant::now();
            let mut affected = Vec::new();
            let ids: Vec<Uuid> = store
                .orders
                .values()
                .filter(|o| o.is_live())
                .map(|o| o.local_id)
                .collect();
            for id in ids {
                if let Some(order) = store.orders.get_mut(&id) {
                    order.state = OrderState::PendingCancel;
                    order.updated_at = now;
                    order.last_event_at = now;
                    affected.push(order.clone());
                }
            }
            affected
        };
        let ids: Vec<Uuid> = orders.iter().map(|o| o.local_id).collect();
        for order in orders {
            self.bus
                .publish(Event::OrderStatus { order, old_state: None })
                .await;
        }
        ids
    }

    pub fn reset_stats(&self) -> ResetStats {
        let store = self.store.lock();
        ResetStats {
            last_reset_time: store.last_reset_at,
            next_reset_time: store.last_reset_at.map(|t| t + self.config.reset_interval),
            active_orders_count: store.orders.values().filter(|o| o.is_live()).count(),
            pending_modifications_count: store.pending_modifications.len(),
        }
    }

    /// Background timer: fires every `reset_interval`, marking all live
    /// orders `PENDING_CANCEL` and emitting `OrderReset` (spec.md §4.3).
    pub async fn run_periodic_reset(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reset_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let affected = self.cancel_all().await;
            self.store.lock().last_reset_at = Some(Instant::now());
            if !affected.is_empty() {
                info!(count = affected.len(), "periodic order reset");
                self.bus
                    .publish(Event::OrderReset {
                        reason: ResetReason::Periodic,
                        affected,
                    })
                    .await;
            }
        }
    }

    /// Background sweep purging terminal orders past [`ARCHIVE_TTL`]
    /// (spec.md §3 "Lifecycles").
    pub async fn run_archival_purge(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        loop {
            ticker.tick().await;
            let mut store = self.store.lock();
            let now = Instant::now();
            store
                .orders
                .retain(|_, o| !(o.state.is_terminal() && now.saturating_duration_since(o.last_event_at) >= ARCHIVE_TTL));
        }
    }
}
