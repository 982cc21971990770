use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-lifetime counters for the ingestion path.
///
/// Counters are lock-free so request handlers can bump them without touching
/// either the queue lock or the state lock.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    total_requests: AtomicU64,
    queued_additions: AtomicU64,
    processed_additions: AtomicU64,
    rejected_by_goal: AtomicU64,
}

/// Point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub queued_additions: u64,
    /// Grants credited in full or in part.
    pub processed_additions: u64,
    pub rejected_by_goal: u64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued_additions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed_additions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_by_goal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.queued_additions.store(0, Ordering::Relaxed);
        self.processed_additions.store(0, Ordering::Relaxed);
        self.rejected_by_goal.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            queued_additions: self.queued_additions.load(Ordering::Relaxed),
            processed_additions: self.processed_additions.load(Ordering::Relaxed),
            rejected_by_goal: self.rejected_by_goal.load(Ordering::Relaxed),
        }
    }
}
