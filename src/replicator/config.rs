//! Replicator configuration
//!
//! Loaded from an optional YAML file, then overridden from the command line
//! in `main.rs`. Injected once at construction; nothing reads it globally.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How a general-purpose update treats allow rules already on the resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFilterPolicy {
    /// Add newly requested ranges, keep everything already present
    #[default]
    Merge,
    /// Make the allow-list exactly the requested ranges
    Replace,
}

/// Bounded constant backoff applied to every store write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    /// Pause between attempts
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,
    /// Wall-clock budget for all attempts of one operation
    #[serde(default = "default_retry_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            interval_ms: default_retry_interval_ms(),
            max_elapsed_ms: default_retry_max_elapsed_ms(),
        }
    }
}

impl RetrySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Configuration for the replicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatorConfig {
    /// Base URL of the request service
    #[serde(default)]
    pub request_service_url: String,

    /// Availability zone whose requests this replicator serves
    #[serde(default = "default_availability_zone")]
    pub availability_zone: String,

    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Whether general-purpose (NFS) filesystems are replicated
    #[serde(default)]
    pub general_purpose_enabled: bool,

    #[serde(default)]
    pub ip_filter_policy: IpFilterPolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Timeout of the startup liveness check against the request service
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Upper bound on one HTTP exchange with the request service, body
    /// included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            request_service_url: String::new(),
            availability_zone: default_availability_zone(),
            poll_interval_secs: default_poll_interval_secs(),
            general_purpose_enabled: false,
            ip_filter_policy: IpFilterPolicy::default(),
            retry: RetrySettings::default(),
            ping_timeout_secs: default_ping_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ReplicatorConfig {
    /// Load from a YAML file; absent keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Reject configurations the replicator cannot run with.
    /// `needs_endpoint` is false when running against in-memory collaborators.
    pub fn validate(&self, needs_endpoint: bool) -> Result<()> {
        if needs_endpoint && self.request_service_url.trim().is_empty() {
            return Err(Error::Configuration(
                "request service URL is required".into(),
            ));
        }
        if self.availability_zone.trim().is_empty() {
            return Err(Error::Configuration("availability zone is required".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration("poll interval must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration("request timeout must be positive".into()));
        }
        if self.retry.interval_ms == 0 || self.retry.max_elapsed_ms < self.retry.interval_ms {
            return Err(Error::Configuration(format!(
                "retry budget {}ms must cover at least one {}ms interval",
                self.retry.max_elapsed_ms, self.retry.interval_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_availability_zone() -> String {
    "az1".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retry_interval_ms() -> u64 {
    2_000
}

fn default_retry_max_elapsed_ms() -> u64 {
    10_000
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ReplicatorConfig::default();
        assert_eq!(config.availability_zone, "az1");
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.retry.interval(), Duration::from_secs(2));
        assert_eq!(config.retry.max_elapsed(), Duration::from_secs(10));
        assert_eq!(config.ip_filter_policy, IpFilterPolicy::Merge);
        assert!(!config.general_purpose_enabled);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "requestServiceUrl: http://requests.internal:8443\n\
             pollIntervalSecs: 5\n\
             generalPurposeEnabled: true\n\
             ipFilterPolicy: replace\n\
             retry:\n  intervalMs: 500"
        )
        .unwrap();

        let config = ReplicatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_service_url, "http://requests.internal:8443");
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.general_purpose_enabled);
        assert_eq!(config.ip_filter_policy, IpFilterPolicy::Replace);
        assert_eq!(config.retry.interval_ms, 500);
        assert_eq!(config.retry.max_elapsed_ms, 10_000);
        assert_eq!(config.availability_zone, "az1");
        config.validate(true).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = ReplicatorConfig::from_file("/nonexistent/replicator.yaml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate() {
        let config = ReplicatorConfig::default();
        assert!(config.validate(true).is_err());
        assert!(config.validate(false).is_ok());

        let config = ReplicatorConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate(false).is_err());

        let config = ReplicatorConfig {
            retry: RetrySettings {
                interval_ms: 2_000,
                max_elapsed_ms: 1_000,
            },
            ..Default::default()
        };
        assert!(config.validate(false).is_err());

        let config = ReplicatorConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate(false).is_err());
    }
}
