//! The decision engine: resolves a policy, routes to a partition and asks its
//! limiter for a permit.

use std::time::Duration;
use tracing::{debug, info, trace};

use super::descriptor::{PartitionKey, RequestDescriptor};
use super::lease::Lease;
use super::policy::{Policy, PolicyRegistry};
use super::store::{PartitionStore, Placement, StoreLimits};
use crate::clock::{Clock, MonotonicClock};
use crate::config::TollgateConfig;
use crate::error::Result;

/// The admission call the host makes for every request.
///
/// Abstracts over engines with different clocks so middleware can hold a
/// `dyn AdmissionBackend`.
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether a request under `policy` may proceed.
    fn admit(&self, policy: &str, descriptor: &RequestDescriptor) -> Result<Lease>;
}

/// The admission façade.
///
/// Owns the policy registry and the partition store. Starts no threads:
/// window resets and replenishment are computed on access. Dropping the engine
/// drops every partition.
pub struct DecisionEngine<C: Clock = MonotonicClock> {
    registry: PolicyRegistry,
    store: PartitionStore,
    clock: C,
}

impl DecisionEngine<MonotonicClock> {
    /// Create an engine with no policies, an unbounded store and the system
    /// monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for DecisionEngine<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> DecisionEngine<C> {
    /// Create an engine reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            registry: PolicyRegistry::new(),
            store: PartitionStore::new(),
            clock,
        }
    }

    /// Create an engine whose partition store is bounded by `limits`.
    ///
    /// Fails with [`InvalidEngineConfiguration`](crate::TollgateError::InvalidEngineConfiguration)
    /// for a zero partition cap or a zero idle timeout.
    pub fn with_store_limits(limits: StoreLimits, clock: C) -> Result<Self> {
        limits.validate()?;
        Ok(Self {
            registry: PolicyRegistry::new(),
            store: PartitionStore::with_limits(limits),
            clock,
        })
    }

    /// Create an engine from a loaded configuration, registering every policy.
    pub fn from_config(config: &TollgateConfig, clock: C) -> Result<Self> {
        let engine = Self::with_store_limits(config.engine.store_limits(), clock)?;
        for policy in config.policies()? {
            engine.register(policy)?;
        }

        info!(
            policies = engine.registry.len(),
            max_partitions = ?engine.store.limits().max_partitions,
            "Decision engine initialized"
        );
        Ok(engine)
    }

    /// Register a policy.
    pub fn register(&self, policy: Policy) -> Result<()> {
        self.registry.register(policy)
    }

    /// The policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// The engine's clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Decide on a request at `now`.
    ///
    /// Fails only with [`UnknownPolicy`](crate::TollgateError::UnknownPolicy);
    /// a rejection is a successful call returning a rejected lease.
    pub fn decide(
        &self,
        policy_name: &str,
        descriptor: &RequestDescriptor,
        now: Duration,
    ) -> Result<Lease> {
        let policy = self.registry.resolve(policy_name)?;
        let route = policy.route(descriptor);
        let key = PartitionKey::new(policy.name(), route.key.as_str());

        trace!(
            key = %key,
            tier = ?route.tier,
            "Checking rate limit"
        );

        let factory = |partition: &PartitionKey| {
            if partition.is_overflow() {
                policy.limit().build(now)
            } else {
                route.limit.build(now)
            }
        };

        let (key, limiter) = match self.store.get_or_create(&key, now, factory) {
            Placement::Partition(limiter) => (key, limiter),
            Placement::Overflow(limiter) => (PartitionKey::overflow(policy.name()), limiter),
            Placement::Refused => return Ok(Lease::refused(key)),
        };

        let acquisition = limiter.try_acquire(now);
        if !acquisition.admitted {
            debug!(
                key = %key,
                retry_after = ?acquisition.retry_after,
                "Rate limit exceeded"
            );
        }

        Ok(Lease::from_acquisition(key, acquisition))
    }

    /// Decide on a request at the clock's current time.
    pub fn check(&self, policy_name: &str, descriptor: &RequestDescriptor) -> Result<Lease> {
        self.decide(policy_name, descriptor, self.clock.now())
    }

    /// Evict partitions idle for longer than the configured idle timeout.
    ///
    /// Returns the number evicted; zero when no idle timeout is configured.
    pub fn evict_idle(&self) -> usize {
        match self.store.limits().idle_timeout {
            Some(idle_timeout) => self.store.evict_idle(self.clock.now(), idle_timeout),
            None => 0,
        }
    }

    /// Get the number of live partitions.
    pub fn partition_count(&self) -> usize {
        self.store.len()
    }

    /// Whether a partition exists for the given policy and key.
    pub fn has_partition(&self, policy: &str, key: &str) -> bool {
        self.store.contains(&PartitionKey::new(policy, key))
    }

    /// Drop all partition state, keeping the registered policies.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl<C: Clock> AdmissionBackend for DecisionEngine<C> {
    fn admit(&self, policy: &str, descriptor: &RequestDescriptor) -> Result<Lease> {
        self.check(policy, descriptor)
    }
}
