use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use foundation::time::{Clock, EpochMillis};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::budget::{GrantOutcome, GrantResult};
use crate::consumer::run_consumer;
use crate::contribution::Contribution;
use crate::grants;
use crate::metrics::{RuntimeStats, StatsSnapshot};
use crate::persistence::{encode, SnapshotStore};
use crate::state::{BudgetState, ConfigPatch, TickOutcome};
use crate::ticker::run_ticker;
use crate::work_queue::{IngestionQueue, QueueItem};

/// Cadence of the background workers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the consumer looks for a queued grant.
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// The consumer persists after this many grants, and whenever it drains
    /// the queue.
    pub persist_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            tick_interval: Duration::from_secs(1),
            persist_every: 10,
        }
    }
}

/// Everything a status query returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    #[serde(flatten)]
    pub state: BudgetState,
    pub queue_size: usize,
    pub stats: StatsSnapshot,
    pub max_addable: u64,
}

/// One grant taken off the queue and applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub item: QueueItem,
    pub result: GrantResult,
    /// The queue was empty right after this grant was dequeued.
    pub queue_drained: bool,
}

/// Handles of the two background workers.
pub struct Workers {
    pub consumer: JoinHandle<()>,
    pub ticker: JoinHandle<()>,
}

impl Workers {
    pub fn abort(&self) {
        self.consumer.abort();
        self.ticker.abort();
    }
}

/// The time budget accounting engine.
///
/// Owns the budget state behind one lock and the ingestion queue behind
/// another; the two are never held at the same time. Constructed once per
/// process and shared behind an `Arc` by the workers and request handlers.
pub struct Engine {
    config: EngineConfig,
    state: Mutex<BudgetState>,
    queue: IngestionQueue,
    stats: RuntimeStats,
    store: SnapshotStore,
    /// Number of the last snapshot encoded. Only advanced with the state
    /// lock held, so save order matches state order.
    save_sequence: AtomicU64,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        initial: BudgetState,
        store: SnapshotStore,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(initial),
            queue: IngestionQueue::new(),
            stats: RuntimeStats::new(),
            store,
            save_sequence: AtomicU64::new(0),
            clock,
        }
    }

    /// Builds an engine from the snapshot in `store`, or from defaults.
    pub async fn open(
        config: EngineConfig,
        store: SnapshotStore,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let initial = store.load(clock.now_ms()).await;
        Self::new(config, initial, store, clock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> EpochMillis {
        self.clock.now_ms()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.clock.now_ms();
        let (state, max_addable) = {
            let state = self.state.lock();
            (state.clone(), state.max_addable(now))
        };
        EngineSnapshot {
            state,
            queue_size: self.queue.len(),
            stats: self.stats.snapshot(),
            max_addable,
        }
    }

    /// Queues a grant and returns the queue depth. Crediting happens later on
    /// the consumer and may be capped to zero.
    pub fn enqueue(&self, seconds: i64, reason: &str, contribution: Option<Contribution>) -> usize {
        let item = QueueItem::new(seconds, reason, contribution, self.clock.now_ms());
        let depth = self.queue.enqueue(item);
        self.stats.record_queued();
        depth
    }

    /// Prices a raw contribution with the current config and queues it.
    /// Returns the requested seconds and the queue depth.
    pub fn enqueue_contribution(&self, contribution: Contribution) -> (u64, usize) {
        let seconds = {
            let state = self.state.lock();
            grants::seconds_for(&state.config, &contribution)
        };
        let reason = grants::reason_for(&contribution.kind);
        let requested = i64::try_from(seconds).unwrap_or(i64::MAX);
        let depth = self.enqueue(requested, reason, Some(contribution));
        (seconds, depth)
    }

    /// Applies the grant at the head of the queue, if any.
    pub fn process_next(&self) -> Option<Processed> {
        let item = self.queue.dequeue_one()?;
        let queue_drained = self.queue.is_empty();
        let now = self.clock.now_ms();

        let result = {
            let mut state = self.state.lock();
            state.apply_grant(
                now,
                item.seconds,
                item.is_subscription(),
                item.contribution.clone(),
            )
        };

        let who = item
            .contribution
            .as_ref()
            .map(|c| c.username.as_str())
            .unwrap_or("manual");
        match result.outcome {
            GrantOutcome::Rejected => {
                self.stats.record_rejected();
                info!(requested = result.requested, who, "grant rejected, goal reached");
            }
            GrantOutcome::Capped => {
                self.stats.record_processed();
                info!(
                    requested = result.requested,
                    credited = result.credited,
                    who,
                    "grant capped by goal"
                );
            }
            GrantOutcome::Applied => {
                self.stats.record_processed();
                debug!(
                    credited = result.credited,
                    reason = %item.reason,
                    who,
                    remaining = result.remaining,
                    "grant credited"
                );
            }
        }

        Some(Processed {
            item,
            result,
            queue_drained,
        })
    }

    /// One countdown step.
    pub fn tick(&self) -> TickOutcome {
        let outcome = self.state.lock().tick();
        if outcome == TickOutcome::Expired {
            info!("budget exhausted, countdown stopped");
        }
        outcome
    }

    /// Writes the current state to the store. Returns `false` when the write
    /// failed or a newer snapshot got there first; failures are logged and
    /// in-memory accounting is unaffected.
    pub async fn persist(&self) -> bool {
        let (sequence, encoded) = {
            let mut state = self.state.lock();
            let sequence = self.save_sequence.fetch_add(1, Ordering::Relaxed) + 1;
            state.last_persisted_at_ms = self.clock.now_ms();
            (sequence, encode(&state))
        };
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("snapshot not saved: {err}");
                return false;
            }
        };
        match self.store.write(&bytes, sequence).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(sequence, "newer snapshot already saved");
                false
            }
            Err(err) => {
                warn!(path = %self.store.path().display(), "snapshot not saved: {err}");
                false
            }
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut BudgetState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub async fn set_config(&self, patch: ConfigPatch) {
        let config = self.mutate(|s| {
            s.merge_config(patch);
            s.config.clone()
        });
        info!(
            channel = %config.channel,
            tier1 = config.seconds_per_tier1_sub,
            tier2 = config.seconds_per_tier2_sub,
            tier3 = config.seconds_per_tier3_sub,
            "config updated"
        );
        self.persist().await;
    }

    pub async fn set_goal_deadline(&self, deadline_ms: Option<EpochMillis>) {
        self.mutate(|s| s.set_goal_deadline(deadline_ms));
        match deadline_ms {
            Some(goal) => info!(goal_deadline_ms = goal, "goal deadline set"),
            None => info!("goal deadline cleared"),
        }
        self.persist().await;
    }

    pub async fn set_start_marker(&self, start_ms: Option<EpochMillis>) {
        self.mutate(|s| s.set_start_marker(start_ms));
        match start_ms {
            Some(start) => info!(start_ms = start, "start marker set"),
            None => info!("start marker cleared"),
        }
        self.persist().await;
    }

    /// Returns whether the countdown is running afterwards; an empty budget
    /// stays paused.
    pub async fn start(&self) -> bool {
        let running = self.mutate(BudgetState::start);
        if running {
            info!("countdown started");
        } else {
            info!("nothing to count down, countdown stays paused");
        }
        self.persist().await;
        running
    }

    pub async fn pause(&self) {
        self.mutate(BudgetState::pause);
        info!("countdown paused");
        self.persist().await;
    }

    pub async fn reset_counters(&self) {
        self.mutate(BudgetState::reset_counters);
        info!("counters reset");
        self.persist().await;
    }

    pub async fn full_reset(&self) {
        self.mutate(BudgetState::full_reset);
        self.stats.clear();
        info!("full reset, all state back to defaults");
        self.persist().await;
    }

    /// Returns the remaining seconds actually stored after goal clamping.
    pub async fn set_absolute_remaining(&self, seconds: i64) -> u64 {
        let now = self.clock.now_ms();
        let stored = self.mutate(|s| s.set_absolute_remaining(now, seconds));
        info!(remaining = stored, "remaining time set");
        self.persist().await;
        stored
    }

    /// Returns the new bits total.
    pub async fn add_bits(&self, amount: u64) -> u64 {
        let total = self.mutate(|s| s.add_bits(amount));
        info!(bits = amount, total, "bits recorded");
        self.persist().await;
        total
    }

    pub async fn clear_contribution_log(&self) {
        self.mutate(BudgetState::clear_contribution_log);
        info!("contribution log and totals cleared");
        self.persist().await;
    }

    /// Starts the queue consumer and the countdown ticker on the current
    /// tokio runtime. They run until aborted.
    pub fn spawn_workers(self: &Arc<Self>) -> Workers {
        Workers {
            consumer: tokio::spawn(run_consumer(Arc::clone(self))),
            ticker: tokio::spawn(run_ticker(Arc::clone(self))),
        }
    }
}
