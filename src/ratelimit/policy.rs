//! Policies and the registry that resolves them by name.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::algorithm::AlgorithmConfig;
use super::descriptor::{PartitionKey, RequestDescriptor};
use crate::error::{Result, TollgateError};

/// Key used by policies that share one limiter across all requests.
pub const GLOBAL_KEY: &str = "global";

/// Prefix of keys owned by tiers.
const TIER_PREFIX: &str = "tier:";

/// Marks an untiered key that would otherwise read as a reserved one.
const ESCAPE: char = '~';

type SelectorFn = dyn Fn(&RequestDescriptor) -> String + Send + Sync;

/// Derives a partition key from a request.
#[derive(Clone, Default)]
pub enum KeySelector {
    /// One partition for every request
    #[default]
    Global,
    /// One partition per client address; requests without one share `"unknown"`
    ClientAddress,
    /// One partition per value of a query parameter
    Query(String),
    /// One partition per value of a header
    Header(String),
    /// Caller-supplied selector. Must be a pure function of the descriptor.
    Custom(Arc<SelectorFn>),
}

impl KeySelector {
    /// Wrap a function as a selector.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> String + Send + Sync + 'static,
    {
        KeySelector::Custom(Arc::new(f))
    }

    /// Compute the key for a request.
    pub fn key_for(&self, descriptor: &RequestDescriptor) -> String {
        match self {
            KeySelector::Global => GLOBAL_KEY.to_string(),
            KeySelector::ClientAddress => descriptor
                .client_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            KeySelector::Query(name) => descriptor.query(name).unwrap_or("none").to_string(),
            KeySelector::Header(name) => descriptor.header(name).unwrap_or("none").to_string(),
            KeySelector::Custom(f) => f(descriptor),
        }
    }
}

impl fmt::Debug for KeySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySelector::Global => f.write_str("Global"),
            KeySelector::ClientAddress => f.write_str("ClientAddress"),
            KeySelector::Query(name) => f.debug_tuple("Query").field(name).finish(),
            KeySelector::Header(name) => f.debug_tuple("Header").field(name).finish(),
            KeySelector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Where a [`Match`] reads its attribute from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeSource {
    Query,
    Header,
}

/// An equality test against one request attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub source: AttributeSource,
    pub name: String,
    pub value: String,
}

impl Match {
    /// Match a query parameter value.
    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: AttributeSource::Query,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Match a header value.
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: AttributeSource::Header,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether the request carries the expected value.
    pub fn matches(&self, descriptor: &RequestDescriptor) -> bool {
        let actual = match self.source {
            AttributeSource::Query => descriptor.query(&self.name),
            AttributeSource::Header => descriptor.header(&self.name),
        };
        actual == Some(self.value.as_str())
    }
}

/// A named routing rule inside a policy.
///
/// Requests matching a tier get their own partitions and limit, keyed
/// `tier:<name>` so they never share state with untiered traffic.
#[derive(Debug, Clone)]
pub struct Tier {
    name: String,
    when: Match,
    limit: AlgorithmConfig,
    partition_by: KeySelector,
}

impl Tier {
    /// Create a tier sharing one partition among all matching requests.
    pub fn new(name: impl Into<String>, when: Match, limit: AlgorithmConfig) -> Self {
        Self {
            name: name.into(),
            when,
            limit,
            partition_by: KeySelector::Global,
        }
    }

    /// Builder-style: partition matching requests further
    pub fn partition_by(mut self, selector: KeySelector) -> Self {
        self.partition_by = selector;
        self
    }

    /// Get the tier name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn key_for(&self, descriptor: &RequestDescriptor) -> String {
        match self.partition_by {
            KeySelector::Global => format!("{}{}", TIER_PREFIX, self.name),
            ref selector => format!("{}{}:{}", TIER_PREFIX, self.name, selector.key_for(descriptor)),
        }
    }
}

/// Keep untiered keys out of the tier and overflow namespaces.
///
/// Keys starting with `tier:` or `~`, and the overflow key itself, gain a
/// leading `~`. Every other key is used as is, and the mapping stays injective.
fn untiered_key(key: String) -> String {
    if key.starts_with(TIER_PREFIX) || key.starts_with(ESCAPE) || key == PartitionKey::OVERFLOW {
        format!("{}{}", ESCAPE, key)
    } else {
        key
    }
}

/// The partition a request routes to within a policy.
#[derive(Debug, Clone)]
pub struct Route<'a> {
    /// Partition key within the policy
    pub key: String,
    /// Limit applied to the partition
    pub limit: &'a AlgorithmConfig,
    /// Tier that matched, if any
    pub tier: Option<&'a str>,
}

/// A named rate limiting policy.
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    limit: AlgorithmConfig,
    partition_by: KeySelector,
    tiers: Vec<Tier>,
}

impl Policy {
    /// Create a policy with a single global partition.
    pub fn new(name: impl Into<String>, limit: AlgorithmConfig) -> Self {
        Self {
            name: name.into(),
            limit,
            partition_by: KeySelector::Global,
            tiers: Vec::new(),
        }
    }

    /// Builder-style: set the default partition selector
    pub fn partition_by(mut self, selector: KeySelector) -> Self {
        self.partition_by = selector;
        self
    }

    /// Builder-style: append a tier. Tiers are tried in insertion order.
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Get the policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the default limit.
    pub fn limit(&self) -> &AlgorithmConfig {
        &self.limit
    }

    /// Get the tiers.
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Check the policy and every tier.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TollgateError::invalid(&self.name, "policy name must not be empty"));
        }
        self.limit.validate(&self.name)?;

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if tier.name.trim().is_empty() {
                return Err(TollgateError::invalid(&self.name, "tier name must not be empty"));
            }
            if tier.name.contains(':') {
                return Err(TollgateError::invalid(
                    &self.name,
                    format!("tier name '{}' must not contain ':'", tier.name),
                ));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(TollgateError::invalid(
                    &self.name,
                    format!("duplicate tier '{}'", tier.name),
                ));
            }
            tier.limit.validate(&self.name)?;
        }
        Ok(())
    }

    /// Resolve the partition key and limit for a request.
    ///
    /// The first matching tier wins; otherwise the default selector and limit
    /// apply. Untiered keys never collide with tier keys or the overflow key.
    pub fn route(&self, descriptor: &RequestDescriptor) -> Route<'_> {
        for tier in &self.tiers {
            if tier.when.matches(descriptor) {
                return Route {
                    key: tier.key_for(descriptor),
                    limit: &tier.limit,
                    tier: Some(tier.name.as_str()),
                };
            }
        }
        Route {
            key: untiered_key(self.partition_by.key_for(descriptor)),
            limit: &self.limit,
            tier: None,
        }
    }
}

/// Resolves policies by name.
///
/// Policies are registered during startup and are immutable afterwards.
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<Policy>>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and add a policy.
    pub fn register(&self, policy: Policy) -> Result<()> {
        policy.validate()?;

        let mut policies = self.policies.write();
        if policies.contains_key(policy.name()) {
            return Err(TollgateError::DuplicatePolicy(policy.name().to_string()));
        }

        info!(
            policy = %policy.name(),
            kind = %policy.limit().kind(),
            limit = policy.limit().limit(),
            tiers = policy.tiers().len(),
            "Registered rate limit policy"
        );
        policies.insert(policy.name().to_string(), Arc::new(policy));
        Ok(())
    }

    /// Look up a policy.
    pub fn resolve(&self, name: &str) -> Result<Arc<Policy>> {
        self.policies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TollgateError::UnknownPolicy(name.to_string()))
    }

    /// Partition key a request maps to under `policy`.
    pub fn partition_key_for(&self, policy: &Policy, descriptor: &RequestDescriptor) -> String {
        policy.route(descriptor).key
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    /// Whether no policy is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }

    /// Remove every policy.
    pub fn clear(&self) {
        self.policies.write().clear();
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
