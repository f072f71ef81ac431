//! Declarative policy definitions.
//!
//! These are the `policies` entries of the configuration file. Each definition
//! converts into a [`Policy`] ready for registration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::algorithm::AlgorithmConfig;
use super::policy::{KeySelector, Match, Policy, Tier};

/// Definition of one policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Unique policy name
    pub name: String,
    /// Limit applied to partitions not claimed by a tier
    pub limit: LimitRule,
    /// How untiered requests are partitioned
    #[serde(default)]
    pub partition_by: SelectorRule,
    /// Tiers, tried in order
    #[serde(default)]
    pub tiers: Vec<TierRule>,
}

/// A tier within a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRule {
    /// Tier name, unique within the policy
    pub name: String,
    /// Attribute test selecting the tier
    pub when: Match,
    /// Limit for the tier's partitions
    pub limit: LimitRule,
    /// How matching requests are partitioned
    #[serde(default)]
    pub partition_by: SelectorRule,
}

/// Algorithm and parameters, with durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitRule {
    FixedWindow {
        permit_limit: u64,
        window_ms: u64,
    },
    SlidingWindow {
        permit_limit: u64,
        window_ms: u64,
        segments_per_window: u32,
    },
    TokenBucket {
        token_limit: u64,
        tokens_per_period: u64,
        replenish_period_ms: u64,
    },
    Concurrency {
        permit_limit: u64,
    },
}

/// Partition selector as written in a policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SelectorRule {
    #[default]
    Global,
    ClientAddress,
    Query {
        name: String,
    },
    Header {
        name: String,
    },
}

impl From<&LimitRule> for AlgorithmConfig {
    fn from(rule: &LimitRule) -> Self {
        match *rule {
            LimitRule::FixedWindow {
                permit_limit,
                window_ms,
            } => AlgorithmConfig::fixed_window(permit_limit, Duration::from_millis(window_ms)),
            LimitRule::SlidingWindow {
                permit_limit,
                window_ms,
                segments_per_window,
            } => AlgorithmConfig::sliding_window(
                permit_limit,
                Duration::from_millis(window_ms),
                segments_per_window,
            ),
            LimitRule::TokenBucket {
                token_limit,
                tokens_per_period,
                replenish_period_ms,
            } => AlgorithmConfig::token_bucket(
                token_limit,
                tokens_per_period,
                Duration::from_millis(replenish_period_ms),
            ),
            LimitRule::Concurrency { permit_limit } => AlgorithmConfig::concurrency(permit_limit),
        }
    }
}

impl From<&SelectorRule> for KeySelector {
    fn from(rule: &SelectorRule) -> Self {
        match rule {
            SelectorRule::Global => KeySelector::Global,
            SelectorRule::ClientAddress => KeySelector::ClientAddress,
            SelectorRule::Query { name } => KeySelector::Query(name.clone()),
            SelectorRule::Header { name } => KeySelector::Header(name.clone()),
        }
    }
}

impl PolicyRule {
    /// Build the policy. Validation happens at registration.
    pub fn to_policy(&self) -> Policy {
        self.tiers.iter().fold(
            Policy::new(self.name.clone(), AlgorithmConfig::from(&self.limit))
                .partition_by(KeySelector::from(&self.partition_by)),
            |policy, tier| {
                policy.tier(
                    Tier::new(
                        tier.name.clone(),
                        tier.when.clone(),
                        AlgorithmConfig::from(&tier.limit),
                    )
                    .partition_by(KeySelector::from(&tier.partition_by)),
                )
            },
        )
    }
}
