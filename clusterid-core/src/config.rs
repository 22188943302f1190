//! Cluster identity configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! match the well-known record location.

use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INIT_BACKOFF, DEFAULT_INIT_MAX_BACKOFF,
    DEFAULT_INIT_MAX_RETRIES, DEFAULT_NAMESPACE, DEFAULT_RECORD_NAME, DEFAULT_REWATCH_BACKOFF,
};
use crate::error::{ClusterIdResult, ConfigError};
use crate::record::RecordKey;

// ============================================================================
// RETRY CONFIGURATION
// ============================================================================

/// Capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_INIT_MAX_RETRIES,
            initial_backoff: DEFAULT_INIT_BACKOFF,
            max_backoff: DEFAULT_INIT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> ClusterIdResult<()> {
        if self.max_retries == 0 {
            return Err(invalid("init_retry.max_retries", "0", "must be at least 1"));
        }
        if self.initial_backoff.is_zero() {
            return Err(invalid(
                "init_retry.initial_backoff",
                "0ms",
                "must be positive",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(invalid(
                "init_retry.max_backoff",
                &format!("{:?}", self.max_backoff),
                "must not be below initial_backoff",
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "init_retry.backoff_multiplier",
                &self.backoff_multiplier.to_string(),
                "must be at least 1.0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CLUSTER ID CONFIGURATION
// ============================================================================

/// Where the identity record lives and how the resolver converges on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterIdConfig {
    /// Namespace of the identity record.
    pub namespace: String,

    /// Name of the identity record.
    pub record_name: String,

    /// Read-back policy after another process won the create race.
    pub init_retry: RetryConfig,

    /// Delay before re-listing when the watch stream ends.
    pub rewatch_backoff: Duration,
}

impl Default for ClusterIdConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            record_name: DEFAULT_RECORD_NAME.to_string(),
            init_retry: RetryConfig::default(),
            rewatch_backoff: DEFAULT_REWATCH_BACKOFF,
        }
    }
}

impl ClusterIdConfig {
    /// Create ClusterIdConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CLUSTERID_NAMESPACE`: Namespace of the record (default: kube-system)
    /// - `CLUSTERID_RECORD_NAME`: Name of the record (default: ingress-uid)
    /// - `CLUSTERID_INIT_MAX_RETRIES`: Reads after a lost create race (default: 10)
    /// - `CLUSTERID_INIT_BACKOFF_MS`: First read-back delay (default: 50)
    /// - `CLUSTERID_INIT_MAX_BACKOFF_MS`: Read-back delay cap (default: 2000)
    /// - `CLUSTERID_REWATCH_BACKOFF_MS`: Delay before re-watching (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let namespace = std::env::var("CLUSTERID_NAMESPACE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.namespace);

        let record_name = std::env::var("CLUSTERID_RECORD_NAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.record_name);

        let max_retries = std::env::var("CLUSTERID_INIT_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.init_retry.max_retries);

        let initial_backoff = env_millis("CLUSTERID_INIT_BACKOFF_MS")
            .unwrap_or(defaults.init_retry.initial_backoff);

        let max_backoff = env_millis("CLUSTERID_INIT_MAX_BACKOFF_MS")
            .unwrap_or(defaults.init_retry.max_backoff);

        let rewatch_backoff =
            env_millis("CLUSTERID_REWATCH_BACKOFF_MS").unwrap_or(defaults.rewatch_backoff);

        Self {
            namespace,
            record_name,
            init_retry: RetryConfig {
                max_retries,
                initial_backoff,
                max_backoff,
                backoff_multiplier: defaults.init_retry.backoff_multiplier,
            },
            rewatch_backoff,
        }
    }

    /// Short backoffs for tests and local development.
    pub fn development() -> Self {
        Self {
            init_retry: RetryConfig {
                max_retries: 20,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(100),
                backoff_multiplier: 2.0,
            },
            rewatch_backoff: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// Point the config at a different record.
    pub fn with_record(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.record_name = name.into();
        self
    }

    /// Key of the identity record.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.namespace.clone(), self.record_name.clone())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClusterIdResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(invalid("namespace", &self.namespace, "must not be empty"));
        }
        if self.record_name.trim().is_empty() {
            return Err(invalid("record_name", &self.record_name, "must not be empty"));
        }
        if self.rewatch_backoff.is_zero() {
            return Err(invalid("rewatch_backoff", "0ms", "must be positive"));
        }
        self.init_retry.validate()
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::error::ClusterIdError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterIdError;
    use proptest::prelude::*;

    #[test]
    fn test_config_default() {
        let config = ClusterIdConfig::default();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.record_name, DEFAULT_RECORD_NAME);
        assert_eq!(config.init_retry.max_retries, DEFAULT_INIT_MAX_RETRIES);
        assert_eq!(config.rewatch_backoff, DEFAULT_REWATCH_BACKOFF);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = ClusterIdConfig::from_env();
        assert_eq!(config, ClusterIdConfig::default());
    }

    #[test]
    fn test_config_development() {
        let config = ClusterIdConfig::development();
        assert_eq!(config.init_retry.initial_backoff, Duration::from_millis(5));
        assert_eq!(config.rewatch_backoff, Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_record_key() {
        let config = ClusterIdConfig::default().with_record("ns", "name");
        assert_eq!(config.record_key().to_string(), "ns/name");
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = ClusterIdConfig::default().with_record("ns", " ");
        match config.validate() {
            Err(ClusterIdError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "record_name");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_retry() {
        let mut config = ClusterIdConfig::default();
        config.init_retry.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = ClusterIdConfig::default();
        config.init_retry.max_backoff = Duration::from_millis(1);
        assert!(config.validate().is_err());

        let mut config = ClusterIdConfig::default();
        config.init_retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_sequence() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_for(0), Duration::from_millis(50));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(300));
        assert_eq!(retry.backoff_for(40), Duration::from_millis(300));
    }

    proptest! {
        /// Backoff never decreases between attempts and never exceeds the cap.
        #[test]
        fn prop_backoff_monotonic_and_capped(
            initial_ms in 1u64..1000,
            extra_ms in 0u64..10_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let retry = RetryConfig {
                max_retries: 10,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(initial_ms + extra_ms),
                backoff_multiplier: multiplier,
            };
            let current = retry.backoff_for(attempt);
            let next = retry.backoff_for(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= retry.max_backoff);
        }
    }
}
