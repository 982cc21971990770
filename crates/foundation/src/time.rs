use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock instant in milliseconds since the Unix epoch.
pub type EpochMillis = i64;

pub const MILLIS_PER_SECOND: i64 = 1000;

/// Source of wall-clock time.
///
/// Accounting decisions (goal capping, restart reconciliation) depend on the
/// current wall-clock instant, so they read it through this seam instead of
/// calling `SystemTime::now()` directly.
pub trait Clock {
    fn now_ms(&self) -> EpochMillis;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMillis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as EpochMillis)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: EpochMillis) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set_ms(&self, now_ms: EpochMillis) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * MILLIS_PER_SECOND);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Whole seconds elapsed from `earlier` to `later`, floored and never negative.
pub fn whole_seconds_between(earlier: EpochMillis, later: EpochMillis) -> u64 {
    let delta = later.saturating_sub(earlier);
    if delta <= 0 {
        return 0;
    }
    (delta / MILLIS_PER_SECOND) as u64
}

#[cfg(test)]
mod tests {
    use super::{whole_seconds_between, Clock, ManualClock, SystemClock};

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_secs(30);
        assert_eq!(clock.now_ms(), 31_000);
        clock.set_ms(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.now_ms() > 0);
    }

    #[test]
    fn whole_seconds_floor_and_clamp() {
        assert_eq!(whole_seconds_between(0, 30_999), 30);
        assert_eq!(whole_seconds_between(10_000, 0), 0);
        assert_eq!(whole_seconds_between(0, 999), 0);
    }
}
