//! Strategy Engine (C5): per-tick keep/modify/cancel/place decisions
//! (spec.md §4.5).
//!
//! Grounded on the teacher's `legacy::Strategy` (Kelly-ish sizing, pair-cost
//! risk checks per tick) and `coordinator.rs`'s `aggressive_price`/`safe_price`
//! helpers, generalized to the BID/ASK two-sided optimal-price formula
//! spec.md §4.5 defines.

use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::model::event::{CancelReason, Event};
use crate::model::order::{Order, Side};
use crate::order_manager::OrderManager;
use crate::priority;

#[derive(Debug, Clone, Copy)]
pub struct StrategyConfig {
    pub min_spread: Decimal,
    pub max_spread: Decimal,
    pub min_order_value: Decimal,
    pub target_orders_per_side: usize,
    pub drift_threshold: Decimal,
    pub rebalance_interval: std::time::Duration,
    pub modify_threshold: Decimal,
    pub max_modify_deviation: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_spread: Decimal::new(2, 3),         // 0.002
            max_spread: Decimal::new(4, 3),          // 0.004
            min_order_value: Decimal::new(10_000, 0),
            target_orders_per_side: 1,
            drift_threshold: Decimal::new(5, 3),     // 0.005
            rebalance_interval: std::time::Duration::from_secs(5),
            modify_threshold: Decimal::new(3, 3),    // 0.003
            max_modify_deviation: Decimal::new(1, 2), // 0.01
        }
    }
}

impl StrategyConfig {
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
        dec_env!("MM_MIN_SPREAD", min_spread);
        dec_env!("MM_MAX_SPREAD", max_spread);
        dec_env!("MM_MIN_ORDER_VALUE", min_order_value);
        dec_env!("MM_DRIFT_THRESHOLD", drift_threshold);
        dec_env!("MM_MODIFY_THRESHOLD", modify_threshold);
        dec_env!("MM_MAX_MODIFY_DEVIATION", max_modify_deviation);
        if let Ok(v) = std::env::var("MM_TARGET_ORDERS_PER_SIDE") {
            if let Ok(n) = v.parse() {
                cfg.target_orders_per_side = n;
            }
        }
        if let Ok(v) = std::env::var("MM_REBALANCE_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                cfg.rebalance_interval = std::time::Duration::from_secs(n);
            }
        }
        cfg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Keep,
    Modify,
    Cancel(CancelReason),
}

fn classify(dev: Decimal, cfg: &StrategyConfig) -> Decision {
    if dev > cfg.drift_threshold && dev <= cfg.max_modify_deviation {
        Decision::Modify
    } else if dev > cfg.max_modify_deviation {
        Decision::Cancel(CancelReason::Drift)
    } else if dev < Decimal::new(8, 1) * cfg.min_spread {
        if dev >= cfg.modify_threshold {
            Decision::Modify
        } else {
            Decision::Cancel(CancelReason::TooClose)
        }
    } else {
        Decision::Keep
    }
}

/// `P · (1 − 0.8·max_spread)` for BID, `P · (1 + 0.8·max_spread)` for ASK
/// (spec.md §4.5 "Optimal price").
pub fn optimal_price(reference_price: Decimal, side: Side, max_spread: Decimal) -> Decimal {
    let offset = Decimal::new(8, 1) * max_spread;
    match side {
        Side::Bid => reference_price * (Decimal::ONE - offset),
        Side::Ask => reference_price * (Decimal::ONE + offset),
    }
}

/// `q = min_order_value / optimal_price`, jittered by a uniform factor in
/// `[0.95, 1.05]`, clamped upward so `q · price ≥ min_order_value` always
/// holds (spec.md §4.5 "Quantity sizing").
pub fn size_quantity(min_order_value: Decimal, price: Decimal) -> Decimal {
    if price.is_zero() {
        return Decimal::ZERO;
    }
    let base = min_order_value / price;
    let factor: f64 = rand::thread_rng().gen_range(0.95..=1.05);
    let factor = Decimal::try_from(factor).unwrap_or(Decimal::ONE);
    let mut qty = base * factor;
    if qty * price < min_order_value {
        // Exchange quantity tick is an external-transport detail (spec.md §6
        // does not enumerate it); round up at 8 decimal places as a
        // conservative default precision.
        let tick = Decimal::new(1, 8);
        let ticks = ((min_order_value / price) / tick).ceil();
        qty = ticks * tick;
    }
    qty
}

pub struct StrategyEngine {
    config: StrategyConfig,
    symbol: String,
    order_manager: Arc<OrderManager>,
    bus: EventBus,
}

impl StrategyEngine {
    pub fn new(symbol: String, config: StrategyConfig, order_manager: Arc<OrderManager>, bus: EventBus) -> Self {
        Self {
            config,
            symbol,
            order_manager,
            bus,
        }
    }

    /// Runs one full decision pass for reference price `p` (spec.md §4.5
    /// steps 1-5). Stateless across calls: everything is re-derived from the
    /// current order snapshot.
    pub async fn on_price_tick(&self, reference_price: Decimal, correlation_id: Uuid) {
        if reference_price.is_zero() {
            return;
        }
        let live = self.order_manager.query_live(None);

        let mut modifies: Vec<(Order, Decimal)> = Vec::new();
        let mut cancels: Vec<(Order, Decimal, CancelReason)> = Vec::new();
        let mut remaining_bids = 0usize;
        let mut remaining_asks = 0usize;

        for order in live {
            let dev = (order.price - reference_price).abs() / reference_price;
            match classify(dev, &self.config) {
                Decision::Keep => {
                    match order.side {
                        Side::Bid => remaining_bids += 1,
                        Side::Ask => remaining_asks += 1,
                    }
                }
                Decision::Modify => {
                    match order.side {
                        Side::Bid => remaining_bids += 1,
                        Side::Ask => remaining_asks += 1,
                    }
                    modifies.push((order, dev));
                }
                Decision::Cancel(reason) => cancels.push((order, dev, reason)),
            }
        }

        // Tie-breaking: cancel in descending deviation order (spec.md §4.5).
        cancels.sort_by(|a, b| b.1.cmp(&a.1));

        for (order, _dev) in &modifies {
            let new_price = optimal_price(reference_price, order.side, self.config.max_spread);
            self.bus
                .publish_envelope(crate::model::event::EventEnvelope::with_correlation(
                    Event::ModifyOrder {
                        local_id: order.local_id,
                        new_price: Some(new_price),
                        new_qty: None,
                        priority: priority::MODIFY,
                    },
                    correlation_id,
                ))
                .await;
        }
        for (order, _dev, reason) in &cancels {
            self.bus
                .publish_envelope(crate::model::event::EventEnvelope::with_correlation(
                    Event::CancelOrder {
                        local_id: order.local_id,
                        reason: *reason,
                        priority: priority::CANCEL_STRATEGY,
                    },
                    correlation_id,
                ))
                .await;
        }

        let need_bid = self.config.target_orders_per_side.saturating_sub(remaining_bids);
        let need_ask = self.config.target_orders_per_side.saturating_sub(remaining_asks);

        for _ in 0..need_bid {
            self.emit_place(reference_price, Side::Bid, correlation_id).await;
        }
        for _ in 0..need_ask {
            self.emit_place(reference_price, Side::Ask, correlation_id).await;
        }
    }

    async fn emit_place(&self, reference_price: Decimal, side: Side, correlation_id: Uuid) {
        let price = optimal_price(reference_price, side, self.config.max_spread);
        let qty = size_quantity(self.config.min_order_value, price);
        self.bus
            .publish_envelope(crate::model::event::EventEnvelope::with_correlation(
                Event::PlaceOrder {
                    local_id: Uuid::new_v4(),
                    symbol: self.symbol.clone(),
                    side,
                    price,
                    qty,
                    priority: priority::PLACE,
                },
                correlation_id,
            ))
            .await;
    }
}
