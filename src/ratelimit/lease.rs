//! The outcome of one admission check.

use std::fmt;
use std::time::Duration;

use super::algorithm::Acquisition;
use super::concurrency::ConcurrencyPermit;
use super::descriptor::PartitionKey;

/// Admit or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Admitted => f.write_str("admitted"),
            Decision::Rejected => f.write_str("rejected"),
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The partition's limit is exhausted
    LimitExceeded,
    /// The partition store is full and refused to create a partition
    PartitionCapacity,
}

/// Decision plus metadata for the host.
///
/// For concurrency policies an admitted lease holds the permit; dropping the
/// lease gives it back.
#[derive(Debug)]
pub struct Lease {
    decision: Decision,
    partition: PartitionKey,
    remaining: Option<u64>,
    retry_after: Option<Duration>,
    reason: Option<RejectReason>,
    _permit: Option<ConcurrencyPermit>,
}

impl Lease {
    pub(crate) fn from_acquisition(partition: PartitionKey, acquisition: Acquisition) -> Self {
        if acquisition.admitted {
            Self {
                decision: Decision::Admitted,
                partition,
                remaining: Some(acquisition.remaining),
                retry_after: None,
                reason: None,
                _permit: acquisition.permit,
            }
        } else {
            Self {
                decision: Decision::Rejected,
                partition,
                remaining: Some(0),
                retry_after: acquisition.retry_after,
                reason: Some(RejectReason::LimitExceeded),
                _permit: None,
            }
        }
    }

    pub(crate) fn refused(partition: PartitionKey) -> Self {
        Self {
            decision: Decision::Rejected,
            partition,
            remaining: None,
            retry_after: None,
            reason: Some(RejectReason::PartitionCapacity),
            _permit: None,
        }
    }

    /// Admit or reject.
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        self.decision == Decision::Admitted
    }

    /// The partition that made the decision.
    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Permits left in the partition, when known.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// How long the caller should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Retry hint rounded up to whole seconds, as used by `Retry-After`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    /// Why the request was rejected.
    pub fn reason(&self) -> Option<RejectReason> {
        self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admitted_lease() {
        let lease = Lease::from_acquisition(
            PartitionKey::new("fixed", "global"),
            Acquisition::admitted(4),
        );

        assert!(lease.is_admitted());
        assert_eq!(lease.decision(), Decision::Admitted);
        assert_eq!(lease.remaining(), Some(4));
        assert_eq!(lease.retry_after(), None);
        assert_eq!(lease.reason(), None);
        assert_eq!(lease.partition().to_string(), "fixed:global");
    }

    #[test]
    fn test_rejected_lease() {
        let lease = Lease::from_acquisition(
            PartitionKey::new("fixed", "global"),
            Acquisition::rejected(Some(Duration::from_millis(2_300))),
        );

        assert!(!lease.is_admitted());
        assert_eq!(lease.reason(), Some(RejectReason::LimitExceeded));
        assert_eq!(lease.retry_after(), Some(Duration::from_millis(2_300)));
        assert_eq!(lease.retry_after_secs(), Some(3));
    }

    #[test]
    fn test_refused_lease() {
        let lease = Lease::refused(PartitionKey::new("tiered_policy", "10.0.0.9"));

        assert_eq!(lease.decision(), Decision::Rejected);
        assert_eq!(lease.reason(), Some(RejectReason::PartitionCapacity));
        assert_eq!(lease.remaining(), None);
        assert_eq!(lease.retry_after_secs(), None);
    }

    #[test]
    fn test_retry_after_secs_exact() {
        let lease = Lease::from_acquisition(
            PartitionKey::new("p", "k"),
            Acquisition::rejected(Some(Duration::from_secs(6))),
        );
        assert_eq!(lease.retry_after_secs(), Some(6));
        assert_eq!(Decision::Rejected.to_string(), "rejected");
    }
}
