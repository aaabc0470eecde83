//! The event bus's typed event vocabulary (spec.md §3 "Event envelope",
//! §4.2-§4.7).
//!
//! Grounded on the teacher's `polymarket::messages` module: one `enum` per
//! channel direction (`MarketDataMsg`, `ExecutionCmd`, `OrderResult`,
//! `FillEvent`), each carrying small `Copy`/`Clone` payload structs. Per
//! `DESIGN.md` / REDESIGN FLAGS in spec.md §9, this crate folds all of those
//! into a single tagged-union `Event` so one bus (spec.md §4.2) can dispatch
//! by statically-known `Topic`, while `EventEnvelope` carries the
//! `correlation_id` spec.md §3 requires.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{Order, Side};

/// Discriminant used for subscription routing. One variant per `Event`
/// payload kind, matching spec.md's "one topic per event kind" design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PriceTick,
    OrderStatus,
    OrderReset,
    ModifyRequested,
    ModifySucceeded,
    ModifyFailed,
    CancelRequested,
    PlaceOrder,
    CancelOrder,
    ModifyOrder,
    CancelAllOrders,
    OrderFill,
    RiskWarning,
    EmergencyStop,
}

/// Why orders are being reset (spec.md §4.3 "Periodic reset").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    Periodic,
}

/// Why a cancel decision was produced (spec.md §4.5, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Drift,
    TooClose,
    Reset,
    Emergency,
}

/// Risk invariant that was breached (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskWarningKind {
    PositionLimitExceeded,
    PriceVolatilityHigh,
    OrderCountExceeded,
    DailyLossExceeded,
}

/// Severity of a risk warning (spec.md §4.7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Medium,
    High,
    Critical,
}

/// The tagged union of everything that can flow through the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// Emitted by the Reference-Price Engine (C4) for every input sample.
    PriceTick {
        reference_price: Decimal,
        change_from_prev: Decimal,
        confidence: f64,
    },
    /// Emitted by the Order Manager (C3) on every committed state transition.
    OrderStatus {
        order: Order,
        old_state: Option<crate::model::order::OrderState>,
    },
    /// Emitted by the Order Manager when the periodic reset fires.
    OrderReset { reason: ResetReason, affected: Vec<Uuid> },
    ModifyRequested { local_id: Uuid },
    ModifySucceeded { local_id: Uuid },
    ModifyFailed { local_id: Uuid },
    CancelRequested { local_id: Uuid },
    /// Emitted by the Strategy Engine (C5); consumed by Execution (C6).
    PlaceOrder {
        local_id: Uuid,
        symbol: String,
        side: Side,
        price: Decimal,
        qty: Decimal,
        priority: u8,
    },
    CancelOrder {
        local_id: Uuid,
        reason: CancelReason,
        priority: u8,
    },
    ModifyOrder {
        local_id: Uuid,
        new_price: Option<Decimal>,
        new_qty: Option<Decimal>,
        priority: u8,
    },
    /// Emitted by the Risk Controller (C7) on emergency stop.
    CancelAllOrders,
    /// Fill notification, correlated by `remote_id` (fallback `local_id`).
    OrderFill {
        remote_id: Option<String>,
        local_id: Option<Uuid>,
        filled_qty: Decimal,
        sequence: Option<u64>,
    },
    RiskWarning {
        kind: RiskWarningKind,
        level: RiskLevel,
        details: String,
    },
    EmergencyStop { reason: String },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::PriceTick { .. } => Topic::PriceTick,
            Event::OrderStatus { .. } => Topic::OrderStatus,
            Event::OrderReset { .. } => Topic::OrderReset,
            Event::ModifyRequested { .. } => Topic::ModifyRequested,
            Event::ModifySucceeded { .. } => Topic::ModifySucceeded,
            Event::ModifyFailed { .. } => Topic::ModifyFailed,
            Event::CancelRequested { .. } => Topic::CancelRequested,
            Event::PlaceOrder { .. } => Topic::PlaceOrder,
            Event::CancelOrder { .. } => Topic::CancelOrder,
            Event::ModifyOrder { .. } => Topic::ModifyOrder,
            Event::CancelAllOrders => Topic::CancelAllOrders,
            Event::OrderFill { .. } => Topic::OrderFill,
            Event::RiskWarning { .. } => Topic::RiskWarning,
            Event::EmergencyStop { .. } => Topic::EmergencyStop,
        }
    }
}

/// The envelope every event travels in (spec.md §3 "Event envelope").
///
/// `correlation_id` defaults to a fresh id and is propagated by components
/// that chain events derived from the same trigger (e.g. a `PriceTick`'s
/// correlation id flows onto the `PlaceOrder` decisions it produces).
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event: Event,
    pub correlation_id: Uuid,
    pub timestamp: tokio::time::Instant,
}

impl EventEnvelope {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            correlation_id: Uuid::new_v4(),
            timestamp: tokio::time::Instant::now(),
        }
    }

    pub fn with_correlation(event: Event, correlation_id: Uuid) -> Self {
        Self {
            event,
            correlation_id,
            timestamp: tokio::time::Instant::now(),
        }
    }

    pub fn topic(&self) -> Topic {
        self.event.topic()
    }
}

/// A read-only snapshot passed to strategy/risk consumers. Mirrors
/// `MarketDataMsg::BookTick` in the teacher's `messages.rs`, generalized to
/// the spec's single-symbol two-sided top-of-book plus last trade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSample {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last_price: Option<Decimal>,
    pub last_qty: Option<Decimal>,
}

impl MarketSample {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}
