//! Risk Controller (C7): position, price-volatility, order-count, and
//! daily-PnL monitoring with idempotent emergency stop (spec.md §4.7).
//!
//! Grounded on the teacher's `InventoryManager` (VWAP-based `apply_fill`,
//! `can_open()` gating) for the position/PnL bookkeeping shape, generalized
//! to the BID/ASK two-sided position spec.md §4.7 describes and to the
//! four independent breach rules it lists.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Duration;
use tracing::{error, warn};

use crate::bus::{boxed_handler, EventBus};
use crate::model::event::{Event, RiskLevel, RiskWarningKind, Topic};
use crate::order_manager::OrderManager;

#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
    pub max_position: Decimal,
    pub max_order_count: u64,
    pub max_daily_loss: Decimal,
    pub max_price_change: Decimal,
    pub check_interval: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position: Decimal::new(2, 0),
            max_order_count: 10_000,
            max_daily_loss: Decimal::new(1_000, 0),
            max_price_change: Decimal::new(5, 2), // 0.05
            check_interval: Duration::from_secs(5),
        }
    }
}

impl RiskConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        macro_rules! dec_env {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(n) = v.parse::<Decimal>() {
                        cfg.$field = n;
                    }
                }
            };
        }
        dec_env!("MM_MAX_POSITION", max_position);
        dec_env!("MM_MAX_DAILY_LOSS", max_daily_loss);
        dec_env!("MM_MAX_PRICE_CHANGE", max_price_change);
        if let Ok(v) = std::env::var("MM_MAX_ORDER_COUNT") {
            if let Ok(n) = v.parse() {
                cfg.max_order_count = n;
            }
        }
        if let Ok(v) = std::env::var("MM_RISK_CHECK_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.check_interval = Duration::from_secs(n);
            }
        }
        cfg
    }
}

struct State {
    /// Signed net position: positive long, negative short.
    position: Decimal,
    avg_entry_price: Decimal,
    daily_pnl: Decimal,
    last_price: Option<Decimal>,
    prev_price: Option<Decimal>,
}

pub struct RiskController {
    config: RiskConfig,
    state: Mutex<State>,
    lifetime_place_count: AtomicU64,
    emergency_stopped: AtomicBool,
    order_manager: Arc<OrderManager>,
    bus: EventBus,
}

impl RiskController {
    pub fn new(config: RiskConfig, order_manager: Arc<OrderManager>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(State {
                position: Decimal::ZERO,
                avg_entry_price: Decimal::ZERO,
                daily_pnl: Decimal::ZERO,
                last_price: None,
                prev_price: None,
            }),
            lifetime_place_count: AtomicU64::new(0),
            emergency_stopped: AtomicBool::new(false),
            order_manager,
            bus,
        })
    }

    pub fn position(&self) -> Decimal {
        self.state.lock().position
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.state.lock().daily_pnl
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::SeqCst)
    }

    /// Wires the `OrderStatus`/`PriceTick`/`OrderFill` subscriptions
    /// (spec.md §4.7).
    pub fn subscribe(self: &Arc<Self>) {
        let this = self.clone();
        self.bus.subscribe(
            Topic::OrderStatus,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::OrderStatus { old_state: None, .. } = env.event {
                        this.lifetime_place_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::PriceTick,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::PriceTick { reference_price, .. } = env.event {
                        this.on_price_tick(reference_price).await;
                    }
                    Ok(())
                }
            }),
        );

        let this = self.clone();
        self.bus.subscribe(
            Topic::OrderFill,
            boxed_handler(move |env| {
                let this = this.clone();
                async move {
                    if let Event::OrderFill { local_id: Some(local_id), filled_qty, .. } = env.event {
                        this.on_fill(local_id, filled_qty).await;
                    }
                    Ok(())
                }
            }),
        );
    }

    async fn on_price_tick(&self, reference_price: Decimal) {
        let breach = {
            let mut state = self.state.lock();
            state.prev_price = state.last_price;
            state.last_price = Some(reference_price);
            match state.prev_price {
                Some(prev) if !prev.is_zero() => {
                    let change = ((reference_price - prev) / prev).abs();
                    change > self.config.max_price_change
                }
                _ => false,
            }
        };
        if breach {
            self.emit_warning(RiskWarningKind::PriceVolatilityHigh, RiskLevel::High, "reference price moved beyond max_price_change".into())
                .await;
        }
    }

    async fn on_fill(&self, local_id: uuid::Uuid, filled_qty: Decimal) {
        let Some(order) = self.order_manager.get(local_id) else {
            return;
        };
        let signed_qty = match order.side {
            crate::model::order::Side::Bid => filled_qty,
            crate::model::order::Side::Ask => -filled_qty,
        };
        let mut state = self.state.lock();
        let prior_position = state.position;
        if prior_position.is_zero() || prior_position.signum() == signed_qty.signum() {
            let new_position = prior_position + signed_qty;
            if !new_position.is_zero() {
                state.avg_entry_price = (state.avg_entry_price * prior_position.abs() + order.price * signed_qty.abs())
                    / new_position.abs();
            }
            state.position = new_position;
        } else {
            let closing_qty = signed_qty.abs().min(prior_position.abs());
            let realized = closing_qty * (order.price - state.avg_entry_price) * prior_position.signum();
            state.daily_pnl += realized;
            state.position += signed_qty;
            if state.position.signum() != prior_position.signum() && !state.position.is_zero() {
                state.avg_entry_price = order.price;
            }
        }
    }

    /// Spawns the periodic invariant check (spec.md §4.7: "Periodically...
    /// evaluates all invariants" — position, order count, daily PnL; price
    /// volatility is evaluated per-tick in [`Self::on_price_tick`] since the
    /// rule is stated as "on each tick").
    pub async fn run_periodic_checks(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            ticker.tick().await;
            self.check_position().await;
            self.check_order_count().await;
            self.check_daily_pnl().await;
        }
    }

    async fn check_position(&self) {
        let position = self.state.lock().position;
        if position.abs() > self.config.max_position {
            self.emit_warning(
                RiskWarningKind::PositionLimitExceeded,
                RiskLevel::High,
                format!("|position|={position} exceeds max_position={}", self.config.max_position),
            )
            .await;
            self.trigger_emergency_stop("position limit exceeded".into()).await;
        }
    }

    async fn check_order_count(&self) {
        let count = self.lifetime_place_count.load(Ordering::Relaxed);
        if count > self.config.max_order_count {
            self.emit_warning(
                RiskWarningKind::OrderCountExceeded,
                RiskLevel::Medium,
                format!("lifetime place count {count} exceeds max_order_count={}", self.config.max_order_count),
            )
            .await;
        }
    }

    async fn check_daily_pnl(&self) {
        let pnl = self.state.lock().daily_pnl;
        if pnl < -self.config.max_daily_loss {
            self.emit_warning(
                RiskWarningKind::DailyLossExceeded,
                RiskLevel::High,
                format!("daily_pnl={pnl} breaches max_daily_loss={}", self.config.max_daily_loss),
            )
            .await;
            self.trigger_emergency_stop("daily loss limit exceeded".into()).await;
        }
    }

    async fn emit_warning(&self, kind: RiskWarningKind, level: RiskLevel, details: String) {
        warn!(?kind, ?level, %details, "risk warning");
        self.bus
            .publish(Event::RiskWarning { kind, level, details })
            .await;
    }

    /// Idempotent: once engaged, suppresses all subsequent attempts until an
    /// explicit reset (spec.md §4.7) — resume is out of scope here, so this
    /// engine never unsets the flag once tripped.
    async fn trigger_emergency_stop(&self, reason: String) {
        if self.emergency_stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(%reason, "emergency stop engaged");
        self.bus.publish(Event::EmergencyStop { reason }).await;
        self.bus.publish(Event::CancelAllOrders).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::model::order::Side;
    use rust_decimal_macros::dec;

    fn make() -> (Arc<RiskController>, Arc<OrderManager>, EventBus) {
        let bus = EventBus::new(EventBusConfig::default());
        let order_manager = OrderManager::new("BTCUSDT".into(), Default::default(), bus.clone());
        let risk = RiskController::new(
            RiskConfig {
                max_position: dec!(2),
                ..Default::default()
            },
            order_manager.clone(),
            bus.clone(),
        );
        (risk, order_manager, bus)
    }

    #[tokio::test]
    async fn s5_position_breach_triggers_emergency_stop() {
        let (risk, order_manager, bus) = make();
        risk.subscribe();
        let _handles = bus.start();

        let a = order_manager.create(Side::Bid, dec!(100), dec!(1.0)).await;
        order_manager.apply_ack(a, "R1".into(), true).await.unwrap();
        order_manager.apply_fill("R1", dec!(1.0), None).await.unwrap();

        let b = order_manager.create(Side::Bid, dec!(100), dec!(1.1)).await;
        order_manager.apply_ack(b, "R2".into(), true).await.unwrap();
        order_manager.apply_fill("R2", dec!(1.1), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(risk.position(), dec!(2.1));

        risk.check_position().await;
        assert!(risk.is_emergency_stopped());
    }

    #[tokio::test]
    async fn emergency_stop_is_idempotent() {
        let (risk, _order_manager, bus) = make();
        let _handles = bus.start();
        risk.trigger_emergency_stop("first".into()).await;
        risk.trigger_emergency_stop("second".into()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.stats().published, 2);
    }

    #[tokio::test]
    async fn volatility_breach_emits_warning_without_emergency_stop() {
        let (risk, _order_manager, bus) = make();
        risk.subscribe();
        let _handles = bus.start();
        bus.publish(Event::PriceTick {
            reference_price: dec!(100),
            change_from_prev: Decimal::ZERO,
            confidence: 1.0,
        })
        .await;
        bus.publish(Event::PriceTick {
            reference_price: dec!(200),
            change_from_prev: Decimal::ZERO,
            confidence: 1.0,
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!risk.is_emergency_stopped());
        assert!(bus.stats().published >= 2);
    }
}
