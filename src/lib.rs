//! Tollgate - In-process Admission Control
//!
//! This crate decides, for each incoming request, whether it may proceed
//! under a named rate limiting policy. Policies partition traffic by a key
//! derived from the request (client address, query or header value) and
//! apply one of four algorithms per partition: fixed window, sliding window,
//! token bucket or concurrency. Rejections are immediate; there is no queue.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::config::{EngineConfig, TollgateConfig};
pub use crate::error::{Result, TollgateError};
pub use crate::ratelimit::{
    AlgorithmConfig, Decision, DecisionEngine, KeySelector, Lease, Match, Policy, PolicyRegistry,
    RequestDescriptor, Tier,
};
