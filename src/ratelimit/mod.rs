//! Rate limiting logic and state management.

pub mod algorithm;
mod concurrency;
mod descriptor;
mod engine;
mod fixed_window;
mod lease;
mod policy;
pub mod rules;
mod sliding_window;
mod store;
mod token_bucket;

pub use algorithm::{Acquisition, AlgorithmConfig, AlgorithmKind, Limiter};
pub use concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
pub use descriptor::{PartitionKey, RequestDescriptor};
pub use engine::{AdmissionBackend, DecisionEngine};
pub use fixed_window::FixedWindowLimiter;
pub use lease::{Decision, Lease, RejectReason};
pub use policy::{
    AttributeSource, KeySelector, Match, Policy, PolicyRegistry, Route, Tier, GLOBAL_KEY,
};
pub use rules::{LimitRule, PolicyRule, SelectorRule, TierRule};
pub use sliding_window::SlidingWindowLimiter;
pub use store::{OverflowPolicy, PartitionStore, Placement, StoreLimits};
pub use token_bucket::TokenBucketLimiter;
