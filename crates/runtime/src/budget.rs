use foundation::time::{EpochMillis, MILLIS_PER_SECOND};

/// Headroom reported when no goal deadline is set. Grants are never capped
/// by it.
///
/// A large finite number rather than `u64::MAX` so it survives a round trip
/// through JSON consumers that parse numbers as doubles.
pub const UNLIMITED_ADDABLE: u64 = 999_999_999;

/// Maximum number of seconds that may still be added before the budget would
/// run past the goal deadline.
///
/// `floor((deadline - now) / 1000) - remaining`, floored at zero. Pure; the
/// caller serialises the mutation that follows.
pub fn max_addable(
    now_ms: EpochMillis,
    goal_deadline_ms: Option<EpochMillis>,
    remaining: u64,
) -> u64 {
    let Some(deadline) = goal_deadline_ms else {
        return UNLIMITED_ADDABLE;
    };
    let until_goal = seconds_until(now_ms, deadline);
    if until_goal <= 0 {
        return 0;
    }
    (until_goal as u64).saturating_sub(remaining)
}

/// Largest `remaining` value the deadline allows right now.
pub fn max_remaining(now_ms: EpochMillis, goal_deadline_ms: Option<EpochMillis>) -> Option<u64> {
    goal_deadline_ms.map(|deadline| seconds_until(now_ms, deadline).max(0) as u64)
}

fn seconds_until(now_ms: EpochMillis, deadline_ms: EpochMillis) -> i64 {
    deadline_ms
        .saturating_sub(now_ms)
        .div_euclid(MILLIS_PER_SECOND)
}

/// How a grant fared against the goal cap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Credited in full.
    Applied,
    /// Credited partially; the deadline was reached by this grant.
    Capped,
    /// Nothing credited; the deadline had already been reached.
    Rejected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GrantResult {
    pub requested: u64,
    pub credited: u64,
    pub outcome: GrantOutcome,
    /// Remaining seconds after the grant.
    pub remaining: u64,
}
