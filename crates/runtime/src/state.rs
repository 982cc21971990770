use foundation::time::{whole_seconds_between, EpochMillis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::budget::{max_addable, max_remaining, GrantOutcome, GrantResult};
use crate::contribution::{Contribution, ContributionEntry, ContributionLog};

/// Conversion rates used by the request layer to turn raw events into
/// grant amounts. The engine itself only ever sees second counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerConfig {
    pub channel: String,
    #[serde(rename = "timePerSub")]
    pub seconds_per_tier1_sub: u64,
    #[serde(rename = "timePerSubTier2")]
    pub seconds_per_tier2_sub: u64,
    #[serde(rename = "timePerSubTier3")]
    pub seconds_per_tier3_sub: u64,
    #[serde(rename = "timePerGiftSub")]
    pub seconds_per_gift_sub: u64,
    /// Bits that buy one minute.
    pub bits_per_minute: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            channel: String::new(),
            seconds_per_tier1_sub: 60,
            seconds_per_tier2_sub: 120,
            seconds_per_tier3_sub: 300,
            seconds_per_gift_sub: 60,
            bits_per_minute: 500,
        }
    }
}

/// Partial [`TimerConfig`] update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigPatch {
    pub channel: Option<String>,
    #[serde(rename = "timePerSub")]
    pub seconds_per_tier1_sub: Option<u64>,
    #[serde(rename = "timePerSubTier2")]
    pub seconds_per_tier2_sub: Option<u64>,
    #[serde(rename = "timePerSubTier3")]
    pub seconds_per_tier3_sub: Option<u64>,
    #[serde(rename = "timePerGiftSub")]
    pub seconds_per_gift_sub: Option<u64>,
    pub bits_per_minute: Option<u64>,
}

impl ConfigPatch {
    pub fn apply_to(self, config: &mut TimerConfig) {
        if let Some(v) = self.channel {
            config.channel = v;
        }
        if let Some(v) = self.seconds_per_tier1_sub {
            config.seconds_per_tier1_sub = v;
        }
        if let Some(v) = self.seconds_per_tier2_sub {
            config.seconds_per_tier2_sub = v;
        }
        if let Some(v) = self.seconds_per_tier3_sub {
            config.seconds_per_tier3_sub = v;
        }
        if let Some(v) = self.seconds_per_gift_sub {
            config.seconds_per_gift_sub = v;
        }
        if let Some(v) = self.bits_per_minute {
            config.bits_per_minute = v;
        }
    }
}

/// Result of one countdown tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Paused or already at zero; nothing changed.
    Idle,
    Decremented { remaining: u64 },
    /// The last second ran out and the countdown stopped.
    Expired,
}

impl TickOutcome {
    /// Ticks persist on every tenth remaining second, expiry included.
    pub fn should_persist(&self) -> bool {
        match self {
            Self::Idle => false,
            Self::Decremented { remaining } => remaining % 10 == 0,
            Self::Expired => true,
        }
    }
}

/// The authoritative subathon budget.
///
/// Field names on the wire match the `timer-data.json` layout written by
/// earlier versions of the timer, so existing snapshots keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BudgetState {
    #[serde(rename = "totalSeconds")]
    pub remaining_seconds: u64,
    pub is_running: bool,
    #[serde(rename = "totalSubs")]
    pub total_contributors: u64,
    #[serde(rename = "totalBits")]
    pub total_bits: u64,
    #[serde(rename = "totalTimeAdded")]
    pub total_seconds_granted: u64,
    #[serde(rename = "lastUpdate")]
    pub last_persisted_at_ms: EpochMillis,
    #[serde(rename = "goalTimestamp")]
    pub goal_deadline_ms: Option<EpochMillis>,
    pub goal_reached: bool,
    #[serde(rename = "startTimestamp")]
    pub start_marker_ms: Option<EpochMillis>,
    pub config: TimerConfig,
    #[serde(rename = "subList")]
    pub contributions: ContributionLog,
}

impl Default for BudgetState {
    fn default() -> Self {
        Self {
            remaining_seconds: 0,
            is_running: false,
            total_contributors: 0,
            total_bits: 0,
            total_seconds_granted: 0,
            last_persisted_at_ms: 0,
            goal_deadline_ms: None,
            goal_reached: false,
            start_marker_ms: None,
            config: TimerConfig::default(),
            contributions: ContributionLog::new(),
        }
    }
}

impl BudgetState {
    pub fn max_addable(&self, now_ms: EpochMillis) -> u64 {
        max_addable(now_ms, self.goal_deadline_ms, self.remaining_seconds)
    }

    /// Credits up to `requested` seconds, capped by the goal deadline.
    /// Without a deadline the full request is credited.
    ///
    /// Negative requests are treated as zero. Contributor totals only move for
    /// subscription-class grants that carry contribution metadata; the
    /// metadata is logged whenever present and the grant was not rejected.
    pub fn apply_grant(
        &mut self,
        now_ms: EpochMillis,
        requested: i64,
        subscription: bool,
        contribution: Option<Contribution>,
    ) -> GrantResult {
        let requested = requested.max(0) as u64;

        let (credited, outcome) = match self.goal_deadline_ms {
            None => (requested, GrantOutcome::Applied),
            Some(_) => {
                let headroom = self.max_addable(now_ms);
                if headroom == 0 {
                    self.goal_reached = true;
                    return GrantResult {
                        requested,
                        credited: 0,
                        outcome: GrantOutcome::Rejected,
                        remaining: self.remaining_seconds,
                    };
                }
                if requested > headroom {
                    self.goal_reached = true;
                    (headroom, GrantOutcome::Capped)
                } else {
                    (requested, GrantOutcome::Applied)
                }
            }
        };

        self.remaining_seconds = self.remaining_seconds.saturating_add(credited);
        self.total_seconds_granted = self.total_seconds_granted.saturating_add(credited);

        if let Some(contribution) = contribution {
            if subscription {
                self.total_contributors = self
                    .total_contributors
                    .saturating_add(contribution.contributor_count());
            }
            self.contributions.record(ContributionEntry {
                timestamp: now_ms,
                contribution,
                time_added: credited,
            });
        }

        GrantResult {
            requested,
            credited,
            outcome,
            remaining: self.remaining_seconds,
        }
    }

    /// One second of countdown.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_running || self.remaining_seconds == 0 {
            return TickOutcome::Idle;
        }
        self.remaining_seconds -= 1;
        if self.remaining_seconds == 0 {
            self.is_running = false;
            return TickOutcome::Expired;
        }
        TickOutcome::Decremented {
            remaining: self.remaining_seconds,
        }
    }

    /// Subtracts the wall-clock time that passed since the snapshot was
    /// written, if the countdown was running at the time. Returns the number
    /// of seconds deducted.
    pub fn reconcile_elapsed(&mut self, now_ms: EpochMillis) -> u64 {
        if !self.is_running || self.last_persisted_at_ms <= 0 {
            return 0;
        }
        let elapsed = whole_seconds_between(self.last_persisted_at_ms, now_ms);
        let deducted = elapsed.min(self.remaining_seconds);
        self.remaining_seconds -= deducted;
        if self.remaining_seconds == 0 {
            self.is_running = false;
        }
        deducted
    }

    /// Starts the countdown. An empty budget cannot run, so starting at zero
    /// leaves it paused. Returns whether the countdown is now running.
    pub fn start(&mut self) -> bool {
        self.is_running = self.remaining_seconds > 0;
        self.is_running
    }

    pub fn pause(&mut self) {
        self.is_running = false;
    }

    /// Sets the remaining time directly, clamped to the goal deadline.
    /// Storing zero stops the countdown. Returns the value actually stored.
    pub fn set_absolute_remaining(&mut self, now_ms: EpochMillis, seconds: i64) -> u64 {
        let mut seconds = seconds.max(0) as u64;
        if let Some(limit) = max_remaining(now_ms, self.goal_deadline_ms) {
            if seconds > limit {
                info!(requested = seconds, limit, "remaining time clamped to goal");
                seconds = limit;
                self.goal_reached = true;
            }
        }
        self.remaining_seconds = seconds;
        if seconds == 0 {
            self.is_running = false;
        }
        seconds
    }

    pub fn set_goal_deadline(&mut self, deadline_ms: Option<EpochMillis>) {
        self.goal_deadline_ms = deadline_ms;
        self.goal_reached = false;
    }

    pub fn set_start_marker(&mut self, start_ms: Option<EpochMillis>) {
        self.start_marker_ms = start_ms;
    }

    pub fn merge_config(&mut self, patch: ConfigPatch) {
        patch.apply_to(&mut self.config);
    }

    /// Returns the new bits total.
    pub fn add_bits(&mut self, amount: u64) -> u64 {
        self.total_bits = self.total_bits.saturating_add(amount);
        self.total_bits
    }

    /// Soft reset: clears the running totals, keeps config, goal and log.
    pub fn reset_counters(&mut self) {
        self.remaining_seconds = 0;
        self.is_running = false;
        self.total_contributors = 0;
        self.total_seconds_granted = 0;
        self.goal_reached = false;
    }

    /// Back to defaults, keeping only the persistence stamp.
    pub fn full_reset(&mut self) {
        let last_persisted_at_ms = self.last_persisted_at_ms;
        *self = Self {
            last_persisted_at_ms,
            ..Self::default()
        };
    }

    pub fn clear_contribution_log(&mut self) {
        self.contributions.clear();
        self.total_contributors = 0;
        self.total_seconds_granted = 0;
        self.total_bits = 0;
    }
}
