use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tollgate::ratelimit::{OverflowPolicy, RejectReason, StoreLimits};
use tollgate::{
    AlgorithmConfig, DecisionEngine, KeySelector, ManualClock, Match, Policy, RequestDescriptor,
    Tier, TollgateConfig, TollgateError,
};

const SAMPLE: &str = include_str!("../demos/policies.yaml");

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn client(addr: &str) -> RequestDescriptor {
    RequestDescriptor::new().with_client_addr(addr.parse::<IpAddr>().unwrap())
}

fn sample_engine() -> DecisionEngine<ManualClock> {
    let config = TollgateConfig::from_yaml(SAMPLE).unwrap();
    DecisionEngine::from_config(&config, ManualClock::default()).unwrap()
}

fn admitted(
    engine: &DecisionEngine<ManualClock>,
    policy: &str,
    descriptor: &RequestDescriptor,
    now: Duration,
    attempts: u32,
) -> u32 {
    (0..attempts)
        .filter(|_| engine.decide(policy, descriptor, now).unwrap().is_admitted())
        .count() as u32
}

#[test]
fn test_sample_configuration_registers_every_policy() {
    let engine = sample_engine();
    assert_eq!(
        engine.registry().names(),
        vec!["concurrency_policy", "fixed", "sliding", "tiered_policy", "token_bucket"]
    );
    assert_eq!(engine.partition_count(), 0);
}

#[test]
fn test_fixed_window_resets_after_boundary() {
    let engine = sample_engine();
    let request = RequestDescriptor::new();

    assert_eq!(admitted(&engine, "fixed", &request, secs(0), 5), 5);

    // Rejections never consume permits
    for t in 1..10 {
        let lease = engine.decide("fixed", &request, secs(t)).unwrap();
        assert!(!lease.is_admitted());
        assert_eq!(lease.reason(), Some(RejectReason::LimitExceeded));
        assert_eq!(lease.retry_after(), Some(secs(10 - t)));
    }

    assert_eq!(admitted(&engine, "fixed", &request, secs(10), 8), 5);
}

#[test]
fn test_sliding_window_bounds_trailing_admissions() {
    let engine = sample_engine();
    let request = RequestDescriptor::new();

    // Burst of 5, one segment later 5 more attempts
    assert_eq!(admitted(&engine, "sliding", &request, secs(0), 5), 5);
    assert_eq!(admitted(&engine, "sliding", &request, secs(5), 5), 0);

    // One request per second for two minutes
    let mut admitted_at = Vec::new();
    for t in 6..120 {
        if engine.decide("sliding", &request, secs(t)).unwrap().is_admitted() {
            admitted_at.push(t);
        }
    }
    assert!(!admitted_at.is_empty());

    for end in 0..120u64 {
        let start = end.saturating_sub(14);
        let burst_in_window = if start == 0 { 5 } else { 0 };
        let in_window = admitted_at
            .iter()
            .filter(|t| **t >= start && **t <= end)
            .count()
            + burst_in_window;
        assert!(in_window <= 5 + 5 / 3, "{} admits in window ending at {}s", in_window, end);
    }
}

#[test]
fn test_token_bucket_replenishes_whole_periods() {
    let engine = sample_engine();
    let request = RequestDescriptor::new();

    assert_eq!(admitted(&engine, "token_bucket", &request, secs(0), 10), 10);
    let lease = engine.decide("token_bucket", &request, secs(0)).unwrap();
    assert!(!lease.is_admitted());
    assert_eq!(lease.retry_after_secs(), Some(10));

    assert_eq!(admitted(&engine, "token_bucket", &request, secs(9), 3), 0);
    assert_eq!(admitted(&engine, "token_bucket", &request, secs(10), 3), 2);
}

#[test]
fn test_partitions_do_not_influence_each_other() {
    let engine = sample_engine();
    let a = client("10.0.0.1");
    let b = client("10.0.0.2");

    assert_eq!(admitted(&engine, "tiered_policy", &a, secs(0), 7), 5);
    assert_eq!(admitted(&engine, "tiered_policy", &b, secs(0), 7), 5);
    assert!(engine.has_partition("tiered_policy", "10.0.0.1"));
    assert!(engine.has_partition("tiered_policy", "10.0.0.2"));
}

#[test]
fn test_gold_tier_routes_to_higher_limit() {
    let engine = sample_engine();
    let gold = client("10.0.0.1").with_query("tier", "gold");
    let plain = client("10.0.0.1");

    assert_eq!(admitted(&engine, "tiered_policy", &gold, secs(0), 120), 100);
    assert_eq!(admitted(&engine, "tiered_policy", &plain, secs(0), 10), 5);

    let lease = engine.decide("tiered_policy", &gold, secs(0)).unwrap();
    assert_eq!(lease.partition().key, "tier:gold");
}

#[test]
fn test_encoded_query_string_matches_tier() {
    let engine = sample_engine();
    let gold = RequestDescriptor::from_query_string("?tier=%67old")
        .with_client_addr("10.0.0.1".parse::<IpAddr>().unwrap());

    let lease = engine.decide("tiered_policy", &gold, secs(0)).unwrap();
    assert!(lease.is_admitted());
    assert_eq!(lease.partition().key, "tier:gold");
}

#[test]
fn test_stale_instant_never_rewinds_window() {
    let engine = sample_engine();
    let request = RequestDescriptor::new();

    assert_eq!(admitted(&engine, "fixed", &request, secs(0), 5), 5);
    assert_eq!(admitted(&engine, "fixed", &request, secs(10), 5), 5);

    // A caller holding an older timestamp sees the newer window
    let lease = engine.decide("fixed", &request, secs(3)).unwrap();
    assert!(!lease.is_admitted());
    assert_eq!(lease.retry_after(), Some(secs(10)));
}

#[test]
fn test_concurrency_policy_releases_on_drop() {
    let engine = sample_engine();
    let request = RequestDescriptor::new();

    let first = engine.decide("concurrency_policy", &request, secs(0)).unwrap();
    let second = engine.decide("concurrency_policy", &request, secs(0)).unwrap();
    assert!(first.is_admitted() && second.is_admitted());
    assert!(!engine.decide("concurrency_policy", &request, secs(0)).unwrap().is_admitted());

    drop(first);
    assert!(engine.decide("concurrency_policy", &request, secs(0)).unwrap().is_admitted());
}

#[test]
fn test_unknown_policy_is_an_error() {
    let engine = sample_engine();
    let err = engine.decide("nope", &RequestDescriptor::new(), secs(0)).unwrap_err();
    assert!(matches!(err, TollgateError::UnknownPolicy(name) if name == "nope"));
}

#[test]
fn test_partition_cap_refuses_new_keys() {
    let limits = StoreLimits {
        max_partitions: Some(2),
        overflow: OverflowPolicy::Reject,
        idle_timeout: None,
    };
    let engine = DecisionEngine::with_store_limits(limits, ManualClock::default()).unwrap();
    engine
        .register(
            Policy::new("per_client", AlgorithmConfig::fixed_window(5, secs(10)))
                .partition_by(KeySelector::ClientAddress),
        )
        .unwrap();

    assert!(engine.check("per_client", &client("10.0.0.1")).unwrap().is_admitted());
    assert!(engine.check("per_client", &client("10.0.0.2")).unwrap().is_admitted());

    let lease = engine.check("per_client", &client("10.0.0.3")).unwrap();
    assert!(!lease.is_admitted());
    assert_eq!(lease.reason(), Some(RejectReason::PartitionCapacity));
    assert_eq!(engine.partition_count(), 2);
}

#[test]
fn test_idle_eviction_frees_capacity() {
    let clock = ManualClock::default();
    let limits = StoreLimits {
        max_partitions: Some(1),
        overflow: OverflowPolicy::Reject,
        idle_timeout: Some(secs(60)),
    };
    let engine = DecisionEngine::with_store_limits(limits, clock.clone()).unwrap();
    engine
        .register(
            Policy::new("per_header", AlgorithmConfig::token_bucket(3, 1, secs(1)))
                .partition_by(KeySelector::Header("x-api-key".to_string())),
        )
        .unwrap();

    let a = RequestDescriptor::new().with_header("X-Api-Key", "a");
    let b = RequestDescriptor::new().with_header("X-Api-Key", "b");

    assert!(engine.check("per_header", &a).unwrap().is_admitted());
    assert!(!engine.check("per_header", &b).unwrap().is_admitted());

    clock.advance(secs(61));
    assert_eq!(engine.evict_idle(), 1);
    assert!(engine.check("per_header", &b).unwrap().is_admitted());
    assert!(engine.has_partition("per_header", "b"));
}

#[test]
fn test_custom_selector_and_header_tier() {
    let engine = DecisionEngine::with_clock(ManualClock::default());
    engine
        .register(
            Policy::new("api", AlgorithmConfig::fixed_window(1, secs(60)))
                .partition_by(KeySelector::custom(|d: &RequestDescriptor| {
                    d.query("account").unwrap_or("anonymous").to_string()
                }))
                .tier(Tier::new(
                    "internal",
                    Match::header("x-internal", "true"),
                    AlgorithmConfig::fixed_window(50, secs(60)),
                )),
        )
        .unwrap();

    let acme = RequestDescriptor::from_query_string("?account=acme");
    assert!(engine.check("api", &acme).unwrap().is_admitted());
    assert!(!engine.check("api", &acme).unwrap().is_admitted());

    let internal = acme.clone().with_header("X-Internal", "true");
    assert!(engine.check("api", &internal).unwrap().is_admitted());
    assert!(engine.has_partition("api", "acme"));
    assert!(engine.has_partition("api", "tier:internal"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_callers_share_one_partition() {
    let engine = Arc::new(sample_engine());
    let admits = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let engine = Arc::clone(&engine);
        let admits = Arc::clone(&admits);
        handles.push(tokio::spawn(async move {
            let request = RequestDescriptor::new();
            for _ in 0..4 {
                if engine.decide("token_bucket", &request, secs(0)).unwrap().is_admitted() {
                    admits.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(admits.load(Ordering::SeqCst), 10);
    assert_eq!(engine.partition_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_get_independent_budgets() {
    let engine = Arc::new(sample_engine());

    let mut handles = Vec::new();
    for i in 0..16u8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let request = client(&format!("10.0.1.{}", i));
            (0..10)
                .filter(|_| engine.decide("tiered_policy", &request, secs(0)).unwrap().is_admitted())
                .count()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 5);
    }
    assert_eq!(engine.partition_count(), 16);
}
