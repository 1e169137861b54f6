//! Priority tiers and deterministic priority ordering.
//!
//! A priority is either a named tier or a raw number. Both map to a score in
//! `0..=1000`; higher scores win. Queries that order by priority break ties
//! by registration order, never by sort-algorithm accident.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Score of the `low` tier.
pub const LOW_SCORE: u32 = 10;
/// Score of the `normal` tier.
pub const NORMAL_SCORE: u32 = 50;
/// Score of the `high` tier.
pub const HIGH_SCORE: u32 = 100;
/// Upper bound for raw priorities.
pub const MAX_SCORE: u32 = 1000;

/// A priority expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    /// Named tier.
    Tier(PriorityTier),
    /// Raw number, clamped into `0..=1000` when scored.
    Value(i64),
}

/// Named priority tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    Normal,
    High,
}

impl Priority {
    pub const LOW: Self = Self::Tier(PriorityTier::Low);
    pub const NORMAL: Self = Self::Tier(PriorityTier::Normal);
    pub const HIGH: Self = Self::Tier(PriorityTier::High);

    /// Comparable score for this priority.
    pub fn score(&self) -> u32 {
        parse_priority(*self)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Self::Value(value)
    }
}

impl From<PriorityTier> for Priority {
    fn from(tier: PriorityTier) -> Self {
        Self::Tier(tier)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "normal" => Ok(Self::NORMAL),
            "high" => Ok(Self::HIGH),
            other => other
                .parse::<i64>()
                .map(Self::Value)
                .map_err(|_| format!("invalid priority '{s}': expected low, normal, high or a number")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tier(PriorityTier::Low) => f.write_str("low"),
            Self::Tier(PriorityTier::Normal) => f.write_str("normal"),
            Self::Tier(PriorityTier::High) => f.write_str("high"),
            Self::Value(value) => write!(f, "{value}"),
        }
    }
}

/// Map a priority expression to its score.
pub fn parse_priority(priority: Priority) -> u32 {
    match priority {
        Priority::Tier(PriorityTier::Low) => LOW_SCORE,
        Priority::Tier(PriorityTier::Normal) => NORMAL_SCORE,
        Priority::Tier(PriorityTier::High) => HIGH_SCORE,
        Priority::Value(value) => value.clamp(0, i64::from(MAX_SCORE)) as u32,
    }
}

/// `score(a) - score(b)`; positive means `a` outranks `b`.
pub fn compare_priority(a: Priority, b: Priority) -> i64 {
    i64::from(parse_priority(a)) - i64::from(parse_priority(b))
}

/// Ordering for priority queries: higher score first, then lower
/// registration sequence first.
pub fn priority_order(a: (Priority, u64), b: (Priority, u64)) -> Ordering {
    b.0.score().cmp(&a.0.score()).then_with(|| a.1.cmp(&b.1))
}

/// Sort items by descending priority with registration order as tie-break.
pub fn sort_by_priority<T>(items: &mut [T], key: impl Fn(&T) -> (Priority, u64)) {
    items.sort_by(|a, b| priority_order(key(a), key(b)));
}
