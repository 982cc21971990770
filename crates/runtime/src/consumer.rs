use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::engine::Engine;

/// Whether the consumer should write a snapshot after its `processed`-th
/// grant.
pub fn should_persist(processed: u64, persist_every: u64, queue_drained: bool) -> bool {
    queue_drained || (persist_every > 0 && processed % persist_every == 0)
}

/// Drains the ingestion queue one grant per poll interval, forever.
pub async fn run_consumer(engine: Arc<Engine>) {
    let period = engine.config().poll_interval;
    let persist_every = engine.config().persist_every;
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(?period, "queue consumer running");
    let mut processed: u64 = 0;
    loop {
        interval.tick().await;
        let Some(step) = engine.process_next() else {
            continue;
        };
        processed = processed.wrapping_add(1);
        if should_persist(processed, persist_every, step.queue_drained) {
            engine.persist().await;
        }
    }
}
