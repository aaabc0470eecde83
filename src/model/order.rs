//! Order data model and finite state machine (spec.md §3, §4.3).
//!
//! Grounded on the teacher's `polymarket::types::{Order, OrderStatus}` and
//! the Python prototype's `OrderState`/`OrderStatus` — generalized from a
//! two-outcome (YES/NO) book to the spec's BID/ASK book, and from `f64`
//! prices to `rust_decimal::Decimal` per SPEC_FULL.md §10.5.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Order lifecycle states (spec.md §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    PendingNew,
    Active,
    PartiallyFilled,
    PendingModify,
    PendingCancel,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    /// Terminal states are absorbing (spec.md §3 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }

    /// Orders in these states count toward `query_live` and strategy
    /// decisions (spec.md §3 derived field `is_live`).
    pub fn is_live(self) -> bool {
        matches!(
            self,
            OrderState::Active | OrderState::PartiallyFilled | OrderState::PendingModify
        )
    }
}

/// The unit of exchange interaction (spec.md §3).
#[derive(Debug, Clone)]
pub struct Order {
    pub local_id: Uuid,
    pub remote_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub qty_total: Decimal,
    pub qty_filled: Decimal,
    pub state: OrderState,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub last_event_at: Instant,
}

impl Order {
    pub fn new(symbol: String, side: Side, price: Decimal, qty_total: Decimal, now: Instant) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            remote_id: None,
            symbol,
            side,
            price,
            qty_total,
            qty_filled: Decimal::ZERO,
            state: OrderState::PendingNew,
            created_at: now,
            updated_at: now,
            last_event_at: now,
        }
    }

    /// Derived: remaining unfilled quantity (spec.md §3).
    pub fn qty_open(&self) -> Decimal {
        self.qty_total - self.qty_filled
    }

    /// Derived: whether this order counts as resting in the book.
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }
}
