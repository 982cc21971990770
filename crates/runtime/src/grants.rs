//! Conversion of raw chat events into grant amounts.

use crate::contribution::{Contribution, ContributionKind};
use crate::state::TimerConfig;
use crate::work_queue::{MANUAL_REASON, SUBSCRIPTION_REASON};

pub const BITS_REASON: &str = "bits";

/// Gift subs of higher tiers are worth a multiple of the base gift time.
fn gift_multiplier(tier: u8) -> u64 {
    match tier {
        2 => 2,
        3 => 5,
        _ => 1,
    }
}

fn seconds_for_tier(config: &TimerConfig, tier: u8) -> u64 {
    match tier {
        2 => config.seconds_per_tier2_sub,
        3 => config.seconds_per_tier3_sub,
        _ => config.seconds_per_tier1_sub,
    }
}

/// Seconds a contribution is worth under `config`. Saturates instead of
/// overflowing on oversized client-supplied amounts.
pub fn seconds_for(config: &TimerConfig, contribution: &Contribution) -> u64 {
    match &contribution.kind {
        ContributionKind::Sub | ContributionKind::Resub => {
            seconds_for_tier(config, contribution.tier)
        }
        ContributionKind::Prime => config.seconds_per_tier1_sub,
        ContributionKind::GiftSent => {
            config
                .seconds_per_gift_sub
                .saturating_mul(gift_multiplier(contribution.tier))
                .saturating_mul(contribution.contributor_count())
        }
        ContributionKind::GiftReceived => {
            config
                .seconds_per_gift_sub
                .saturating_mul(gift_multiplier(contribution.tier))
        }
        ContributionKind::Bits => {
            if config.bits_per_minute == 0 {
                0
            } else {
                contribution.bits.saturating_mul(60) / config.bits_per_minute
            }
        }
        ContributionKind::Manual | ContributionKind::Other(_) => 0,
    }
}

/// Reason tag the grant is queued under.
pub fn reason_for(kind: &ContributionKind) -> &'static str {
    if kind.is_subscription() {
        SUBSCRIPTION_REASON
    } else if *kind == ContributionKind::Bits {
        BITS_REASON
    } else {
        MANUAL_REASON
    }
}

#[cfg(test)]
mod tests {
    use super::{reason_for, seconds_for};
    use crate::contribution::{Contribution, ContributionKind};
    use crate::state::TimerConfig;

    fn event(kind: ContributionKind, tier: u8) -> Contribution {
        Contribution {
            kind,
            tier,
            ..Contribution::default()
        }
    }

    #[test]
    fn subs_are_priced_by_tier() {
        let config = TimerConfig::default();
        assert_eq!(seconds_for(&config, &event(ContributionKind::Sub, 1)), 60);
        assert_eq!(seconds_for(&config, &event(ContributionKind::Resub, 2)), 120);
        assert_eq!(seconds_for(&config, &event(ContributionKind::Sub, 3)), 300);
        assert_eq!(seconds_for(&config, &event(ContributionKind::Prime, 3)), 60);
        // Unknown tiers fall back to tier 1.
        assert_eq!(seconds_for(&config, &event(ContributionKind::Sub, 9)), 60);
    }

    #[test]
    fn gift_bundles_multiply_by_size_and_tier() {
        let config = TimerConfig::default();
        let bomb = Contribution {
            gift_count: 10,
            ..event(ContributionKind::GiftSent, 2)
        };
        assert_eq!(seconds_for(&config, &bomb), 60 * 2 * 10);
        assert_eq!(seconds_for(&config, &event(ContributionKind::GiftSent, 1)), 60);
        assert_eq!(seconds_for(&config, &event(ContributionKind::GiftReceived, 3)), 300);
    }

    #[test]
    fn bits_follow_rate() {
        let mut config = TimerConfig::default();
        let cheer = Contribution {
            bits: 1250,
            ..event(ContributionKind::Bits, 1)
        };
        assert_eq!(seconds_for(&config, &cheer), 150);
        config.bits_per_minute = 0;
        assert_eq!(seconds_for(&config, &cheer), 0);
    }

    #[test]
    fn oversized_amounts_saturate() {
        let mut config = TimerConfig::default();
        let whale = Contribution {
            bits: u64::MAX,
            ..event(ContributionKind::Bits, 1)
        };
        assert_eq!(seconds_for(&config, &whale), u64::MAX / 500);

        config.seconds_per_gift_sub = u64::MAX / 2;
        let bomb = Contribution {
            gift_count: u32::MAX,
            ..event(ContributionKind::GiftSent, 3)
        };
        assert_eq!(seconds_for(&config, &bomb), u64::MAX);
    }

    #[test]
    fn manual_and_unknown_kinds_are_free() {
        let config = TimerConfig::default();
        assert_eq!(seconds_for(&config, &event(ContributionKind::Manual, 1)), 0);
        let raid = event(ContributionKind::Other("raid".into()), 1);
        assert_eq!(seconds_for(&config, &raid), 0);
        assert_eq!(reason_for(&raid.kind), "manual");
    }

    #[test]
    fn reasons_follow_kind() {
        assert_eq!(reason_for(&ContributionKind::GiftSent), "sub");
        assert_eq!(reason_for(&ContributionKind::Bits), "bits");
    }
}
