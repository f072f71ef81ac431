//! Concurrency limiter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::algorithm::{Acquisition, AlgorithmKind, Limiter};

/// Bounds the number of admitted requests alive at once.
///
/// Each admission hands out a [`ConcurrencyPermit`] that travels inside the
/// lease; the slot is returned when the lease is dropped. Time plays no part,
/// so rejections carry no retry hint.
pub struct ConcurrencyLimiter {
    permit_limit: u64,
    in_flight: Arc<Mutex<u64>>,
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing `permit_limit` concurrent leases.
    pub fn new(permit_limit: u64) -> Self {
        Self {
            permit_limit,
            in_flight: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> u64 {
        *self.in_flight.lock()
    }
}

impl Limiter for ConcurrencyLimiter {
    fn try_acquire(&self, _now: Duration) -> Acquisition {
        let mut in_flight = self.in_flight.lock();
        if *in_flight >= self.permit_limit {
            return Acquisition::rejected(None);
        }

        *in_flight += 1;
        let permit = ConcurrencyPermit {
            in_flight: Arc::clone(&self.in_flight),
        };
        Acquisition::admitted(self.permit_limit - *in_flight).with_permit(permit)
    }

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Concurrency
    }

    fn is_idle(&self, _now: Duration) -> bool {
        self.in_flight() == 0
    }
}

/// A slot held against a [`ConcurrencyLimiter`], released on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    in_flight: Arc<Mutex<u64>>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        assert!(*in_flight > 0, "concurrency permit released twice");
        *in_flight -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_when_all_permits_held() {
        let limiter = ConcurrencyLimiter::new(2);

        let first = limiter.try_acquire(Duration::ZERO);
        let second = limiter.try_acquire(Duration::ZERO);
        assert!(first.admitted);
        assert!(second.admitted);
        assert_eq!(second.remaining, 0);
        assert_eq!(limiter.in_flight(), 2);

        let third = limiter.try_acquire(Duration::ZERO);
        assert!(!third.admitted);
        assert!(third.retry_after.is_none());
        assert!(third.permit.is_none());
    }

    #[test]
    fn test_permit_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(1);

        let held = limiter.try_acquire(Duration::ZERO);
        assert!(held.admitted);
        assert!(!limiter.is_idle(Duration::ZERO));
        assert!(!limiter.try_acquire(Duration::ZERO).admitted);

        drop(held);
        assert!(limiter.is_idle(Duration::ZERO));
        assert!(limiter.try_acquire(Duration::ZERO).admitted);
    }
}
