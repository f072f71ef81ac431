//! The admission contract shared by all limiting algorithms.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
use super::fixed_window::FixedWindowLimiter;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::error::{Result, TollgateError};

/// A per-partition admission state machine.
///
/// `try_acquire` always returns synchronously. It holds the limiter's own lock
/// for the duration of one call and never fails: the only outcomes are
/// admitted and rejected.
pub trait Limiter: Send + Sync {
    /// Try to take one permit at `now`.
    fn try_acquire(&self, now: Duration) -> Acquisition;

    /// The algorithm behind this limiter.
    fn kind(&self) -> AlgorithmKind;

    /// Whether the state at `now` grants exactly what a freshly built limiter
    /// would: no live window counts, a full bucket, no permits out.
    ///
    /// Only idle limiters may be discarded.
    fn is_idle(&self, now: Duration) -> bool;
}

/// Outcome of a single `try_acquire` call.
#[derive(Debug)]
pub struct Acquisition {
    /// Whether a permit was granted
    pub admitted: bool,
    /// Permits left after this call
    pub remaining: u64,
    /// How long until a permit may become available (rejections only)
    pub retry_after: Option<Duration>,
    /// Held for concurrency limiters; releases its slot when dropped
    pub(crate) permit: Option<ConcurrencyPermit>,
}

impl Acquisition {
    pub(crate) fn admitted(remaining: u64) -> Self {
        Self {
            admitted: true,
            remaining,
            retry_after: None,
            permit: None,
        }
    }

    pub(crate) fn rejected(retry_after: Option<Duration>) -> Self {
        Self {
            admitted: false,
            remaining: 0,
            retry_after,
            permit: None,
        }
    }

    pub(crate) fn with_permit(mut self, permit: ConcurrencyPermit) -> Self {
        self.permit = Some(permit);
        self
    }
}

/// The supported limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmKind {
    /// Counter reset at fixed window boundaries
    FixedWindow,
    /// Ring of segment counters approximating a sliding window
    SlidingWindow,
    /// Bucket replenished by whole periods
    TokenBucket,
    /// Bound on requests in flight
    Concurrency,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlgorithmKind::FixedWindow => "fixed_window",
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::Concurrency => "concurrency",
        };
        f.write_str(name)
    }
}

/// Algorithm kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmConfig {
    /// At most `permit_limit` admissions per `window`.
    FixedWindow { permit_limit: u64, window: Duration },
    /// At most `permit_limit` admissions in any trailing `window`, tracked in
    /// `segments_per_window` segments.
    SlidingWindow {
        permit_limit: u64,
        window: Duration,
        segments_per_window: u32,
    },
    /// Bucket of `token_limit` tokens gaining `tokens_per_period` every
    /// `replenish_period`.
    TokenBucket {
        token_limit: u64,
        tokens_per_period: u64,
        replenish_period: Duration,
    },
    /// At most `permit_limit` leases alive at once.
    Concurrency { permit_limit: u64 },
}

impl AlgorithmConfig {
    /// Fixed window shorthand.
    pub fn fixed_window(permit_limit: u64, window: Duration) -> Self {
        AlgorithmConfig::FixedWindow {
            permit_limit,
            window,
        }
    }

    /// Sliding window shorthand.
    pub fn sliding_window(permit_limit: u64, window: Duration, segments_per_window: u32) -> Self {
        AlgorithmConfig::SlidingWindow {
            permit_limit,
            window,
            segments_per_window,
        }
    }

    /// Token bucket shorthand.
    pub fn token_bucket(token_limit: u64, tokens_per_period: u64, replenish_period: Duration) -> Self {
        AlgorithmConfig::TokenBucket {
            token_limit,
            tokens_per_period,
            replenish_period,
        }
    }

    /// Concurrency shorthand.
    pub fn concurrency(permit_limit: u64) -> Self {
        AlgorithmConfig::Concurrency { permit_limit }
    }

    /// The algorithm kind.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            AlgorithmConfig::FixedWindow { .. } => AlgorithmKind::FixedWindow,
            AlgorithmConfig::SlidingWindow { .. } => AlgorithmKind::SlidingWindow,
            AlgorithmConfig::TokenBucket { .. } => AlgorithmKind::TokenBucket,
            AlgorithmConfig::Concurrency { .. } => AlgorithmKind::Concurrency,
        }
    }

    /// The number of permits a fresh limiter grants.
    pub fn limit(&self) -> u64 {
        match *self {
            AlgorithmConfig::FixedWindow { permit_limit, .. }
            | AlgorithmConfig::SlidingWindow { permit_limit, .. }
            | AlgorithmConfig::Concurrency { permit_limit } => permit_limit,
            AlgorithmConfig::TokenBucket { token_limit, .. } => token_limit,
        }
    }

    /// Check the parameters, naming `policy` in any error.
    pub fn validate(&self, policy: &str) -> Result<()> {
        match *self {
            AlgorithmConfig::FixedWindow {
                permit_limit,
                window,
            } => {
                ensure_positive(policy, "permit_limit", permit_limit)?;
                ensure_nonzero(policy, "window", window)?;
            }
            AlgorithmConfig::SlidingWindow {
                permit_limit,
                window,
                segments_per_window,
            } => {
                ensure_positive(policy, "permit_limit", permit_limit)?;
                ensure_nonzero(policy, "window", window)?;
                ensure_positive(policy, "segments_per_window", u64::from(segments_per_window))?;
                if window.as_nanos() % u128::from(segments_per_window) != 0 {
                    return Err(TollgateError::invalid(
                        policy,
                        format!(
                            "window of {:?} does not divide evenly into {} segments",
                            window, segments_per_window
                        ),
                    ));
                }
            }
            AlgorithmConfig::TokenBucket {
                token_limit,
                tokens_per_period,
                replenish_period,
            } => {
                ensure_positive(policy, "token_limit", token_limit)?;
                ensure_positive(policy, "tokens_per_period", tokens_per_period)?;
                ensure_nonzero(policy, "replenish_period", replenish_period)?;
            }
            AlgorithmConfig::Concurrency { permit_limit } => {
                ensure_positive(policy, "permit_limit", permit_limit)?;
            }
        }
        Ok(())
    }

    /// Build a fresh limiter whose clock starts at `now`.
    ///
    /// Expects a configuration that passed [`validate`](Self::validate).
    pub fn build(&self, now: Duration) -> Arc<dyn Limiter> {
        match *self {
            AlgorithmConfig::FixedWindow {
                permit_limit,
                window,
            } => Arc::new(FixedWindowLimiter::new(permit_limit, window, now)),
            AlgorithmConfig::SlidingWindow {
                permit_limit,
                window,
                segments_per_window,
            } => Arc::new(SlidingWindowLimiter::new(
                permit_limit,
                window,
                segments_per_window,
                now,
            )),
            AlgorithmConfig::TokenBucket {
                token_limit,
                tokens_per_period,
                replenish_period,
            } => Arc::new(TokenBucketLimiter::new(
                token_limit,
                tokens_per_period,
                replenish_period,
                now,
            )),
            AlgorithmConfig::Concurrency { permit_limit } => {
                Arc::new(ConcurrencyLimiter::new(permit_limit))
            }
        }
    }
}

fn ensure_positive(policy: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(TollgateError::invalid(
            policy,
            format!("{} must be greater than 0", field),
        ));
    }
    Ok(())
}

fn ensure_nonzero(policy: &str, field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(TollgateError::invalid(
            policy,
            format!("{} must be greater than 0", field),
        ));
    }
    Ok(())
}
