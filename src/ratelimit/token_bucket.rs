//! Token bucket replenished in whole periods.

use parking_lot::Mutex;
use std::time::Duration;

use super::algorithm::{Acquisition, AlgorithmKind, Limiter};

/// A bucket that starts full and regains `tokens_per_period` tokens at the end
/// of every `replenish_period`, capped at `token_limit`.
///
/// Replenishment happens lazily on access and always in whole periods, so the
/// replenishment schedule stays anchored at creation time.
pub struct TokenBucketLimiter {
    /// Maximum number of tokens the bucket can hold
    token_limit: u64,
    /// Tokens added per elapsed period
    tokens_per_period: u64,
    /// Length of a replenishment period
    replenish_period: Duration,
    state: Mutex<TokenBucketState>,
}

struct TokenBucketState {
    /// Tokens currently in the bucket
    available: u64,
    /// End of the last whole period credited to the bucket
    last_replenish: Duration,
    /// Latest instant observed
    latest: Duration,
}

impl TokenBucketLimiter {
    /// Create a full bucket whose first period starts at `now`.
    pub fn new(
        token_limit: u64,
        tokens_per_period: u64,
        replenish_period: Duration,
        now: Duration,
    ) -> Self {
        assert!(!replenish_period.is_zero(), "replenish_period must be greater than 0");

        Self {
            token_limit,
            tokens_per_period,
            replenish_period,
            state: Mutex::new(TokenBucketState {
                available: token_limit,
                last_replenish: now,
                latest: now,
            }),
        }
    }

    /// Get the bucket capacity.
    pub fn token_limit(&self) -> u64 {
        self.token_limit
    }

    /// Tokens in the bucket as of `now`, without taking one.
    pub fn available(&self, now: Duration) -> u64 {
        let mut state = self.state.lock();
        let now = now.max(state.latest);
        state.latest = now;
        state.replenish(now, self);
        state.available
    }
}

impl TokenBucketState {
    /// Tokens and replenishment mark as of `now`, without applying them.
    fn replenished(&self, now: Duration, bucket: &TokenBucketLimiter) -> (u64, Duration) {
        let elapsed = now.saturating_sub(self.last_replenish);
        let period_nanos = bucket.replenish_period.as_nanos();
        let periods = elapsed.as_nanos() / period_nanos;
        if periods == 0 {
            return (self.available, self.last_replenish);
        }

        let added = u64::try_from(periods)
            .unwrap_or(u64::MAX)
            .saturating_mul(bucket.tokens_per_period);
        (
            self.available.saturating_add(added).min(bucket.token_limit),
            self.last_replenish + Duration::from_nanos((periods * period_nanos) as u64),
        )
    }

    fn replenish(&mut self, now: Duration, bucket: &TokenBucketLimiter) {
        let (available, last_replenish) = self.replenished(now, bucket);
        self.available = available;
        self.last_replenish = last_replenish;

        assert!(
            self.available <= bucket.token_limit,
            "token bucket overfilled: {} > {}",
            self.available,
            bucket.token_limit
        );
    }
}

impl Limiter for TokenBucketLimiter {
    fn try_acquire(&self, now: Duration) -> Acquisition {
        let mut state = self.state.lock();
        let now = now.max(state.latest);
        state.latest = now;

        state.replenish(now, self);

        if state.available >= 1 {
            state.available -= 1;
            Acquisition::admitted(state.available)
        } else {
            let next = state.last_replenish + self.replenish_period;
            Acquisition::rejected(Some(next - now))
        }
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    fn is_idle(&self, now: Duration) -> bool {
        let state = self.state.lock();
        let now = now.max(state.latest);
        let (available, _) = state.replenished(now, self);
        available == self.token_limit
    }
}
