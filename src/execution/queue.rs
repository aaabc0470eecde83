//! Priority work queues for the Execution Engine (spec.md §4.6).
//!
//! Grounded on the teacher's channel-based work dispatch (`executor.rs`
//! receives `ExecutionCmd` over an `mpsc` channel and processes FIFO);
//! generalized to a priority-ordered queue since spec.md §4.6 requires lower
//! numeric priority to drain first, with FIFO among equal priorities.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::model::event::CancelReason;
use crate::model::order::Side;

/// What kind of exchange call this item drives (spec.md §4.6 "task_type").
#[derive(Debug, Clone)]
pub enum WorkPayload {
    Place {
        local_id: Uuid,
        symbol: String,
        side: Side,
        price: Decimal,
        qty: Decimal,
    },
    Cancel {
        local_id: Uuid,
        reason: CancelReason,
    },
    Modify {
        local_id: Uuid,
        new_price: Option<Decimal>,
        new_qty: Option<Decimal>,
    },
}

/// `(task_type, order_snapshot, modify_fields?, retry_count, priority)`
/// (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub payload: WorkPayload,
    pub priority: u8,
    pub retry_count: u32,
    pub enqueued_at: tokio::time::Instant,
}

impl WorkItem {
    pub fn new(payload: WorkPayload, priority: u8) -> Self {
        Self {
            payload,
            priority,
            retry_count: 0,
            enqueued_at: tokio::time::Instant::now(),
        }
    }
}

struct Entry {
    priority: u8,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert priority so the lowest numeric
        // priority sorts highest, and invert seq so earlier items sort
        // highest (FIFO among equal priorities).
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A bounded-in-practice (caller-controlled) priority queue: lower
/// `priority` drains first, FIFO within a priority level.
pub struct WorkQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    notify: Notify,
    next_seq: AtomicU64,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, item: WorkItem) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(Entry {
            priority: item.priority,
            seq,
            item,
        });
        self.notify.notify_one();
    }

    /// Suspends until an item is available, then returns the
    /// highest-priority (lowest numeric value), earliest-enqueued item.
    pub async fn pop(&self) -> WorkItem {
        loop {
            if let Some(entry) = self.heap.lock().pop() {
                return entry.item;
            }
            self.notify.notified().await;
        }
    }

    /// Discards everything queued (spec.md §4.6 "EmergencyStop... drain the
    /// place and modify queues"). Returns what was discarded for logging.
    pub fn drain(&self) -> Vec<WorkItem> {
        let mut heap = self.heap.lock();
        let mut out = Vec::with_capacity(heap.len());
        while let Some(entry) = heap.pop() {
            out.push(entry.item);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel_item(priority: u8) -> WorkItem {
        WorkItem::new(
            WorkPayload::Cancel {
                local_id: Uuid::new_v4(),
                reason: CancelReason::Drift,
            },
            priority,
        )
    }

    #[tokio::test]
    async fn lower_priority_drains_first() {
        let q = WorkQueue::new();
        q.push(cancel_item(5));
        q.push(cancel_item(0));
        q.push(cancel_item(3));
        assert_eq!(q.pop().await.priority, 0);
        assert_eq!(q.pop().await.priority, 3);
        assert_eq!(q.pop().await.priority, 5);
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = WorkQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            q.push(WorkItem::new(
                WorkPayload::Cancel {
                    local_id: *id,
                    reason: CancelReason::Drift,
                },
                1,
            ));
        }
        for expected in ids {
            let item = q.pop().await;
            match item.payload {
                WorkPayload::Cancel { local_id, .. } => assert_eq!(local_id, expected),
                _ => panic!("wrong payload"),
            }
        }
    }

    #[test]
    fn drain_empties_the_queue() {
        let q = WorkQueue::new();
        q.push(cancel_item(1));
        q.push(cancel_item(2));
        assert_eq!(q.drain().len(), 2);
        assert!(q.is_empty());
    }
}
