//! Error types shared across the engine's components.
//!
//! Grounded on the teacher's split between `thiserror` domain enums (used at
//! component boundaries, e.g. `polymarket::executor`'s `anyhow::Result`
//! wrapping typed failures) and `anyhow` for the binary/wiring layer.

use rust_decimal::Decimal;
use uuid::Uuid;

/// Errors returned by [`crate::order_manager::OrderManager`] operations.
///
/// These are synchronous, caller-facing failures (spec.md §7 "Invalid
/// operation") — no state is changed when one of these is returned.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum OrderManagerError {
    #[error("order {0} not found")]
    UnknownOrder(Uuid),

    #[error("order {0} is not in a state that allows this operation")]
    InvalidState(Uuid),

    #[error("modify request for order {0} changes nothing")]
    NoChange(Uuid),

    #[error("order {0} already has a modification in flight")]
    AlreadyModifying(Uuid),
}

/// Failure kinds an [`crate::transport::ExchangeTransport`] call can report.
///
/// Mirrors the "Failure kinds" column of spec.md §6's operation table.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("order not found")]
    NotFound,
}

impl TransportError {
    /// Transient failures are retried with bounded exponential backoff
    /// (spec.md §7 "Transport transient"); the rest are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Engine-level errors: configuration and startup failures.
///
/// Per spec.md §7, these are the only engine-fatal cases — everything else
/// (transport errors, handler errors, single-order invariant violations)
/// degrades the specific order or component instead of the whole engine.
#[derive(Debug, thiserror::Error)]
pub enum MmError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("order manager error: {0}")]
    OrderManager(#[from] OrderManagerError),
}

/// Result of a strategy deviation classification (spec.md §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deviation {
    Keep,
    Modify,
    Cancel,
}

/// Convenience used by the strategy/risk modules to report a price sanity
/// failure without pulling in a full error enum.
#[derive(Debug, thiserror::Error)]
#[error("price must be positive, got {0}")]
pub struct NonPositivePrice(pub Decimal);
