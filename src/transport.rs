//! Abstract exchange transport (spec.md §1 "exchange REST/WS client... out
//! of scope, specified only at its interface"; operation table in §6).
//!
//! Grounded on the teacher's `executor.rs` dry-run branch (a
//! `place_post_only_order`/`cancel` pair gated by a boolean), generalized
//! into a trait so the Execution Engine (C6) is transport-agnostic. The
//! `async_trait` macro is adopted from `praveen686-shrivenQ/feeds`, the pack
//! repo that uses it for exactly this kind of dyn-dispatched async
//! collaborator interface.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::model::order::Side;

/// Exchange-assigned identifier for an order, returned on acceptance.
pub type RemoteId = String;

/// A read-only snapshot returned by `status` (spec.md §6).
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub remote_id: RemoteId,
    pub qty_filled: Decimal,
    pub is_live: bool,
}

/// An unsolicited notification pushed by the exchange (spec.md §6: "the
/// transport also pushes unsolicited fill, cancel, expire, and reject
/// notifications correlated by remote_id, fallback: client_id"). `client_id`
/// is the value the Execution Engine passed to `place`/`amend`'s
/// replacement, used to resolve the order when `remote_id` is absent or not
/// yet known to the caller.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Fill {
        remote_id: RemoteId,
        client_id: Option<String>,
        filled_qty: Decimal,
        sequence: Option<u64>,
    },
    Cancelled {
        remote_id: RemoteId,
        client_id: Option<String>,
    },
    Expired {
        remote_id: RemoteId,
        client_id: Option<String>,
    },
    Rejected {
        remote_id: RemoteId,
        client_id: Option<String>,
        reason: String,
    },
}

/// The exchange operation vocabulary the Execution Engine depends on
/// (spec.md §6). Implementations are expected to be internally
/// synchronized — the trait is shared across execution workers
/// (spec.md §5 "Shared resources").
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    async fn place(
        &self,
        symbol: &str,
        side: Side,
        price: Decimal,
        qty: Decimal,
        client_id: &str,
    ) -> Result<RemoteId, TransportError>;

    async fn cancel(&self, symbol: &str, remote_id: &str) -> Result<(), TransportError>;

    /// Native amend, when the venue supports it (spec.md §6: "amend
    /// (optional)"). `Ok(None)` communicates "not supported"; the caller
    /// falls back to cancel-then-replace (SPEC_FULL.md §12 decision 1).
    async fn amend(
        &self,
        symbol: &str,
        remote_id: &str,
        new_price: Option<Decimal>,
        new_qty: Option<Decimal>,
    ) -> Result<Option<()>, TransportError> {
        let _ = (symbol, remote_id, new_price, new_qty);
        Ok(None)
    }

    async fn status(&self, symbol: &str, remote_id: &str) -> Result<OrderSnapshot, TransportError>;

    /// Whether [`Self::amend`] is backed by a real venue operation.
    fn supports_amend(&self) -> bool {
        false
    }

    /// Suspends until the exchange pushes the next unsolicited fill/cancel/
    /// expire/reject notification (spec.md §6), or returns `None` if this
    /// transport has no push channel (the Execution Engine's listener then
    /// falls back to whatever `status` polling it does on its own). The
    /// default never resolves, matching `amend`'s "not supported" sentinel
    /// in spirit: a transport with nothing to push simply never completes
    /// this call.
    async fn next_event(&self) -> Option<TransportEvent> {
        std::future::pending().await
    }
}

/// In-memory transport for tests and the demo binary. Always accepts places
/// and cancels; never rejects. Unsolicited events are only produced when a
/// test explicitly calls [`MockTransport::push_event`] — nothing is pushed
/// automatically.
pub struct MockTransport {
    counter: std::sync::atomic::AtomicU64,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            counter: std::sync::atomic::AtomicU64::new(0),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    /// Test/demo helper: enqueue an unsolicited notification for the next
    /// `next_event().await` call to return.
    pub fn push_event(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl ExchangeTransport for MockTransport {
    async fn place(
        &self,
        _symbol: &str,
        _side: Side,
        _price: Decimal,
        _qty: Decimal,
        client_id: &str,
    ) -> Result<RemoteId, TransportError> {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(format!("mock-{client_id}-{n}"))
    }

    async fn cancel(&self, _symbol: &str, _remote_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn status(&self, _symbol: &str, remote_id: &str) -> Result<OrderSnapshot, TransportError> {
        Ok(OrderSnapshot {
            remote_id: remote_id.to_string(),
            qty_filled: Decimal::ZERO,
            is_live: true,
        })
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_always_accepts_place() {
        let transport = MockTransport::new();
        let remote_id = transport
            .place("BTCUSDT", Side::Bid, Decimal::new(100, 0), Decimal::ONE, "mm_1_abcd")
            .await
            .unwrap();
        assert!(remote_id.starts_with("mock-mm_1_abcd"));
        assert!(!transport.supports_amend());
    }

    #[tokio::test]
    async fn pushed_events_are_delivered_in_order() {
        let transport = MockTransport::new();
        transport.push_event(TransportEvent::Fill {
            remote_id: "R1".into(),
            client_id: None,
            filled_qty: Decimal::ONE,
            sequence: None,
        });
        transport.push_event(TransportEvent::Cancelled {
            remote_id: "R2".into(),
            client_id: None,
        });

        match transport.next_event().await.unwrap() {
            TransportEvent::Fill { remote_id, .. } => assert_eq!(remote_id, "R1"),
            other => panic!("expected Fill, got {other:?}"),
        }
        match transport.next_event().await.unwrap() {
            TransportEvent::Cancelled { remote_id, .. } => assert_eq!(remote_id, "R2"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }
}
