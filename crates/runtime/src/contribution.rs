use std::collections::VecDeque;

use foundation::time::EpochMillis;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Number of recent contributions kept for display.
pub const CONTRIBUTION_LOG_CAPACITY: usize = 100;

/// Kind tag of a contribution as reported by the chat integration.
///
/// Unknown tags are preserved verbatim; no cross-field validation is done
/// against tier, prime or bits fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContributionKind {
    #[default]
    Sub,
    Resub,
    Prime,
    /// A gifter sending one or more gift subs.
    GiftSent,
    /// A viewer receiving a gifted sub.
    GiftReceived,
    Bits,
    Manual,
    Other(String),
}

impl ContributionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sub => "sub",
            Self::Resub => "resub",
            Self::Prime => "prime",
            Self::GiftSent => "gift",
            Self::GiftReceived => "gifted",
            Self::Bits => "bits",
            Self::Manual => "manual",
            Self::Other(tag) => tag,
        }
    }

    /// Subscriptions of any flavour, gifted ones included.
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::Sub | Self::Resub | Self::Prime | Self::GiftSent | Self::GiftReceived
        )
    }
}

impl From<String> for ContributionKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "sub" => Self::Sub,
            "resub" => Self::Resub,
            "prime" => Self::Prime,
            "gift" | "giftsub" => Self::GiftSent,
            "gifted" => Self::GiftReceived,
            "bits" => Self::Bits,
            "manual" => Self::Manual,
            _ => Self::Other(tag),
        }
    }
}

impl From<ContributionKind> for String {
    fn from(kind: ContributionKind) -> Self {
        match kind {
            ContributionKind::Other(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

/// Contributor metadata attached to a grant.
///
/// Fields are read leniently: a value of the wrong type or out of range
/// falls back to the field's default instead of rejecting the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Contribution {
    #[serde(deserialize_with = "lenient_username")]
    pub username: String,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: ContributionKind,
    #[serde(deserialize_with = "lenient_tier")]
    pub tier: u8,
    #[serde(deserialize_with = "lenient")]
    pub gift_count: u32,
    #[serde(deserialize_with = "lenient")]
    pub recipient: String,
    #[serde(deserialize_with = "lenient")]
    pub is_prime: bool,
    #[serde(deserialize_with = "lenient")]
    pub months: u32,
    #[serde(deserialize_with = "lenient")]
    pub bits: u64,
}

fn lenient_or<'de, D, T>(deserializer: D, fallback: T) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or(fallback))
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    lenient_or(deserializer, T::default())
}

fn lenient_tier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    lenient_or(deserializer, 1)
}

fn lenient_username<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    lenient_or(deserializer, "unknown".to_string())
}

impl Default for Contribution {
    fn default() -> Self {
        Self {
            username: "unknown".to_string(),
            kind: ContributionKind::Sub,
            tier: 1,
            gift_count: 0,
            recipient: String::new(),
            is_prime: false,
            months: 0,
            bits: 0,
        }
    }
}

impl Contribution {
    /// Contributors this event stands for: the bundle size for gift bombs,
    /// otherwise one.
    pub fn contributor_count(&self) -> u64 {
        u64::from(self.gift_count.max(1))
    }
}

/// One accepted grant, as shown in the recent-contributions list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionEntry {
    pub timestamp: EpochMillis,
    #[serde(flatten)]
    pub contribution: Contribution,
    /// Seconds actually credited, after goal capping.
    pub time_added: u64,
}

/// Most-recent-first log of contributions, bounded to
/// [`CONTRIBUTION_LOG_CAPACITY`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContributionLog {
    entries: VecDeque<ContributionEntry>,
}

impl ContributionLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CONTRIBUTION_LOG_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends `entry`, evicting the oldest one when full.
    pub fn record(&mut self, entry: ContributionEntry) {
        if self.entries.len() >= CONTRIBUTION_LOG_CAPACITY {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&ContributionEntry> {
        self.entries.front()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ContributionEntry> {
        self.entries.iter()
    }
}

impl<'de> Deserialize<'de> for ContributionLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut entries = VecDeque::<ContributionEntry>::deserialize(deserializer)?;
        entries.truncate(CONTRIBUTION_LOG_CAPACITY);
        Ok(Self { entries })
    }
}
