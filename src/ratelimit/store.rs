//! Partition store: one limiter per partition key, created on first use.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::algorithm::Limiter;
use super::descriptor::PartitionKey;
use crate::error::{Result, TollgateError};

/// What to do with a request for a new partition once the store is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Reject the request outright
    #[default]
    Reject,
    /// Route the request to the policy's shared overflow partition
    Shared,
}

/// Bounds on the store's growth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum number of partitions, not counting overflow partitions
    pub max_partitions: Option<usize>,
    /// Behaviour once `max_partitions` is reached
    pub overflow: OverflowPolicy,
    /// Partitions untouched for this long may be evicted
    pub idle_timeout: Option<Duration>,
}

impl StoreLimits {
    /// Reject bounds that would refuse or evict on every request.
    pub fn validate(&self) -> Result<()> {
        if self.max_partitions == Some(0) {
            return Err(TollgateError::InvalidEngineConfiguration(
                "max_partitions must be greater than 0".to_string(),
            ));
        }
        if self.idle_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(TollgateError::InvalidEngineConfiguration(
                "idle_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a request was placed.
pub enum Placement {
    /// The partition for the requested key
    Partition(Arc<dyn Limiter>),
    /// The shared overflow partition of the policy
    Overflow(Arc<dyn Limiter>),
    /// The store is full and new partitions are refused
    Refused,
}

struct Partition {
    limiter: Arc<dyn Limiter>,
    /// Nanoseconds of the last access
    last_access: AtomicU64,
}

impl Partition {
    fn new(limiter: Arc<dyn Limiter>, now: Duration) -> Self {
        Self {
            limiter,
            last_access: AtomicU64::new(now.as_nanos() as u64),
        }
    }

    fn touch(&self, now: Duration) -> Arc<dyn Limiter> {
        self.last_access
            .fetch_max(now.as_nanos() as u64, Ordering::Relaxed);
        Arc::clone(&self.limiter)
    }

    fn is_idle(&self, now: Duration, idle_timeout: Duration) -> bool {
        let last = Duration::from_nanos(self.last_access.load(Ordering::Relaxed));
        now.saturating_sub(last) >= idle_timeout && self.limiter.is_idle(now)
    }
}

/// Maps partition keys to limiter instances.
///
/// Creation is single-flight: the shard holding a vacant key stays locked
/// while the factory runs, so concurrent first requests for one key all end up
/// with the same instance. Partitions never share state.
pub struct PartitionStore {
    partitions: DashMap<PartitionKey, Partition>,
    /// Partitions counted against `max_partitions`
    counted: AtomicUsize,
    limits: StoreLimits,
}

impl PartitionStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    /// Create a store with growth limits.
    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            partitions: DashMap::new(),
            counted: AtomicUsize::new(0),
            limits,
        }
    }

    /// The configured limits.
    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    /// Return the limiter for `key`, creating it with `factory` if absent.
    ///
    /// When creating would exceed `max_partitions`, idle partitions are
    /// evicted first; if the store is still full the overflow policy decides.
    /// The factory receives the key being created, which is the policy's
    /// overflow key when a request is diverted.
    pub fn get_or_create<F>(&self, key: &PartitionKey, now: Duration, factory: F) -> Placement
    where
        F: Fn(&PartitionKey) -> Arc<dyn Limiter>,
    {
        if let Some(partition) = self.partitions.get(key) {
            return Placement::Partition(partition.touch(now));
        }

        if let Some(limiter) = self.try_insert(key, now, &factory) {
            return Placement::Partition(limiter);
        }

        if let Some(idle_timeout) = self.limits.idle_timeout {
            if self.evict_idle(now, idle_timeout) > 0 {
                if let Some(limiter) = self.try_insert(key, now, &factory) {
                    return Placement::Partition(limiter);
                }
            }
        }

        match self.limits.overflow {
            OverflowPolicy::Reject => {
                warn!(key = %key, "Partition limit reached, refusing new partition");
                Placement::Refused
            }
            OverflowPolicy::Shared => {
                let overflow = PartitionKey::overflow(&key.policy);
                warn!(key = %key, overflow = %overflow, "Partition limit reached, using overflow partition");
                let limiter = self
                    .partitions
                    .entry(overflow.clone())
                    .or_insert_with(|| Partition::new(factory(&overflow), now))
                    .touch(now);
                Placement::Overflow(limiter)
            }
        }
    }

    /// Insert a partition for `key` unless it exists, respecting the cap.
    ///
    /// Returns `None` only when the key is absent and the store is full.
    fn try_insert<F>(&self, key: &PartitionKey, now: Duration, factory: &F) -> Option<Arc<dyn Limiter>>
    where
        F: Fn(&PartitionKey) -> Arc<dyn Limiter>,
    {
        match self.partitions.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().touch(now)),
            Entry::Vacant(entry) => {
                if !key.is_overflow() && !self.reserve_slot() {
                    return None;
                }
                let limiter = factory(key);
                debug!(
                    key = %key,
                    kind = %limiter.kind(),
                    "Creating new partition"
                );
                entry.insert(Partition::new(Arc::clone(&limiter), now));
                Some(limiter)
            }
        }
    }

    fn reserve_slot(&self) -> bool {
        match self.limits.max_partitions {
            None => {
                self.counted.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(max) => self
                .counted
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
                .is_ok(),
        }
    }

    /// Remove partitions untouched for at least `idle_timeout` whose limiter
    /// is idle.
    ///
    /// A caller may still hold the limiter of a removed partition, and a new
    /// request then creates a second instance for the same key. Both start
    /// from the state a fresh limiter has, so no decision differs.
    ///
    /// Returns the number of partitions removed.
    pub fn evict_idle(&self, now: Duration, idle_timeout: Duration) -> usize {
        let mut removed = 0;
        self.partitions.retain(|key, partition| {
            if partition.is_idle(now, idle_timeout) {
                if !key.is_overflow() {
                    self.counted.fetch_sub(1, Ordering::SeqCst);
                }
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            info!(removed = removed, remaining = self.partitions.len(), "Evicted idle partitions");
        }
        removed
    }

    /// Whether a partition exists for `key`.
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.partitions.contains_key(key)
    }

    /// Get the number of partitions, overflow partitions included.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether the store holds no partitions.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Drop every partition.
    pub fn clear(&self) {
        self.partitions.clear();
        self.counted.store(0, Ordering::SeqCst);
    }
}

impl Default for PartitionStore {
    fn default() -> Self {
        Self::new()
    }
}
