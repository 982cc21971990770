//! Ingestion queue for time grants.
//!
//! Key properties:
//! - Strict first-in-first-out: grants are credited in arrival order, which
//!   matters once a goal deadline makes later grants depend on earlier ones.
//! - Unbounded: producers are never rejected and never wait on accounting.
//! - Guarded by its own lock, independent of the budget state lock.

use std::collections::VecDeque;

use foundation::time::EpochMillis;
use parking_lot::Mutex;

use crate::contribution::Contribution;

/// Reason tag marking subscription-class grants.
pub const SUBSCRIPTION_REASON: &str = "sub";
pub const MANUAL_REASON: &str = "manual";

/// A pending request to add time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Requested seconds; negative values are credited as zero.
    pub seconds: i64,
    pub reason: String,
    pub contribution: Option<Contribution>,
    pub enqueued_at_ms: EpochMillis,
}

impl QueueItem {
    pub fn new(
        seconds: i64,
        reason: impl Into<String>,
        contribution: Option<Contribution>,
        enqueued_at_ms: EpochMillis,
    ) -> Self {
        Self {
            seconds,
            reason: reason.into(),
            contribution,
            enqueued_at_ms,
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.reason == SUBSCRIPTION_REASON
    }
}

#[derive(Debug, Default)]
pub struct IngestionQueue {
    items: Mutex<VecDeque<QueueItem>>,
}

impl IngestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail and returns the new depth.
    pub fn enqueue(&self, item: QueueItem) -> usize {
        let mut items = self.items.lock();
        items.push_back(item);
        items.len()
    }

    /// Removes the head, if any.
    pub fn dequeue_one(&self) -> Option<QueueItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
