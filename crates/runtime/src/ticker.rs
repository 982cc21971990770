use std::sync::Arc;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::engine::Engine;

/// Counts the budget down once per tick interval, forever.
///
/// Missed ticks are replayed in a burst so the countdown keeps pace with the
/// wall clock when the runtime stalls.
pub async fn run_ticker(engine: Arc<Engine>) {
    let period = engine.config().tick_interval;
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    debug!(?period, "countdown ticker running");
    loop {
        interval.tick().await;
        if engine.tick().should_persist() {
            engine.persist().await;
        }
    }
}
