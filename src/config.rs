//! Configuration management for Tollgate.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::rules::PolicyRule;
use crate::ratelimit::{OverflowPolicy, Policy, StoreLimits};

/// Prefix for environment overrides, e.g. `TOLLGATE__ENGINE__MAX_PARTITIONS`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration: engine settings plus the policy list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Policy definitions, registered in order
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on live partitions; unbounded when absent
    #[serde(default)]
    pub max_partitions: Option<usize>,

    /// What happens to new keys once the cap is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Idle partitions older than this are evictable
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Status code a host should answer rejected requests with
    #[serde(default = "default_rejection_status_code")]
    pub rejection_status_code: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_partitions: None,
            overflow: OverflowPolicy::default(),
            idle_timeout_secs: None,
            rejection_status_code: default_rejection_status_code(),
        }
    }
}

fn default_rejection_status_code() -> u16 {
    429
}

impl EngineConfig {
    /// Partition store bounds derived from these settings.
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_partitions: self.max_partitions,
            overflow: self.overflow,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TollgateError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let config: TollgateConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        info!(
            path = %path.display(),
            policies = config.policies.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides apply.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Build and validate every configured policy, in order.
    pub fn policies(&self) -> Result<Vec<Policy>> {
        self.policies
            .iter()
            .map(|rule| {
                let policy = rule.to_policy();
                policy.validate()?;
                Ok(policy)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::AlgorithmConfig;

    const SAMPLE: &str = r#"
engine:
  max_partitions: 10000
  overflow: shared
  idle_timeout_secs: 300
policies:
  - name: fixed
    limit: { kind: fixed_window, permit_limit: 5, window_ms: 10000 }
  - name: concurrency_policy
    limit: { kind: concurrency, permit_limit: 2 }
"#;

    #[test]
    fn test_default_config() {
        let config = TollgateConfig::default();
        assert!(config.policies.is_empty());
        assert_eq!(config.engine.rejection_status_code, 429);
        assert_eq!(config.engine.overflow, OverflowPolicy::Reject);

        let limits = config.engine.store_limits();
        assert_eq!(limits.max_partitions, None);
        assert_eq!(limits.idle_timeout, None);
    }

    #[test]
    fn test_from_yaml() {
        let config = TollgateConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.engine.max_partitions, Some(10000));
        assert_eq!(config.engine.overflow, OverflowPolicy::Shared);
        assert_eq!(config.engine.rejection_status_code, 429);
        assert_eq!(
            config.engine.store_limits().idle_timeout,
            Some(Duration::from_secs(300))
        );

        let policies = config.policies().unwrap();
        let names: Vec<&str> = policies.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["fixed", "concurrency_policy"]);
    }

    #[test]
    fn test_policy_list_keeps_order_and_kinds() {
        let yaml = r#"
policies:
  - name: sliding
    limit: { kind: sliding_window, permit_limit: 5, window_ms: 15000, segments_per_window: 3 }
  - name: token_bucket
    limit: { kind: token_bucket, token_limit: 10, tokens_per_period: 2, replenish_period_ms: 10000 }
  - name: concurrency_policy
    limit: { kind: concurrency, permit_limit: 2 }
"#;
        let policies = TollgateConfig::from_yaml(yaml).unwrap().policies().unwrap();

        assert_eq!(policies.len(), 3);
        assert_eq!(
            policies[0].limit(),
            &AlgorithmConfig::sliding_window(5, Duration::from_secs(15), 3)
        );
        assert_eq!(
            policies[1].limit(),
            &AlgorithmConfig::token_bucket(10, 2, Duration::from_secs(10))
        );
        assert_eq!(policies[2].limit(), &AlgorithmConfig::concurrency(2));
    }

    #[test]
    fn test_unknown_limit_kind_reports_parse_error() {
        let yaml = r#"
policies:
  - name: broken
    limit: { kind: leaky_bucket, permit_limit: 5 }
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        match err {
            TollgateError::Config(message) => {
                assert!(message.contains("leaky_bucket"), "{}", message)
            }
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
policies:
  - name: fixed
    limit: { kind: fixed_window, permit_limit: 0, window_ms: 10000 }
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let err = config.policies().unwrap_err();
        assert!(matches!(err, TollgateError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();

        let config = TollgateConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.engine.max_partitions, Some(10000));
    }

    #[test]
    fn test_missing_file() {
        let err = TollgateConfig::from_file("/nonexistent/tollgate.yaml").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }
}
