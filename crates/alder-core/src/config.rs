//! Process configuration for a metadata node.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration recognized by the consistency core.
///
/// Hosts typically deserialize this from their platform's configuration
/// payload; every field has a serde default so partial documents work.
///
/// # TOML Example
///
/// ```toml
/// num_deployments = 3
/// local_deployment = 1
/// membership_hosts = ["zk-0:2181", "zk-1:2181"]
/// shared_store_dsn = "mysql://metadata-db:3306/fsmeta"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Total number of deployments partitioning the inode namespace.
    ///
    /// Must match the number of per-deployment ack/invalidation tables
    /// provisioned in the shared store.
    #[serde(default = "default_num_deployments")]
    pub num_deployments: u32,

    /// This node's deployment number, in `0..num_deployments`.
    #[serde(default)]
    pub local_deployment: u32,

    /// Membership service endpoints.
    #[serde(default = "default_membership_hosts")]
    pub membership_hosts: Vec<String>,

    /// Connection descriptor for the shared store.
    #[serde(default = "default_shared_store_dsn")]
    pub shared_store_dsn: String,

    /// Heartbeat interval used by peer subsystems. Carried for interface
    /// completeness; the consistency core itself does not tick on it.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Initial delay before retrying a lost change-event stream. Doubles
    /// on every consecutive failure.
    #[serde(default = "default_event_retry_backoff_ms")]
    pub event_retry_backoff_ms: u64,

    /// Number of reconnect attempts before the event subscriber declares
    /// the stream lost and raises the degradation signal.
    #[serde(default = "default_event_retry_max")]
    pub event_retry_max: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            num_deployments: default_num_deployments(),
            local_deployment: 0,
            membership_hosts: default_membership_hosts(),
            shared_store_dsn: default_shared_store_dsn(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            event_retry_backoff_ms: default_event_retry_backoff_ms(),
            event_retry_max: default_event_retry_max(),
        }
    }
}

impl NodeConfig {
    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - `num_deployments` is zero
    /// - `local_deployment` is outside `0..num_deployments`
    /// - `membership_hosts` is empty or `shared_store_dsn` is blank
    /// - the event retry policy would never retry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_deployments == 0 {
            return Err(ConfigError::NoDeployments);
        }
        if self.local_deployment >= self.num_deployments {
            return Err(ConfigError::DeploymentOutOfRange {
                local_deployment: self.local_deployment,
                num_deployments: self.num_deployments,
            });
        }
        if self.membership_hosts.is_empty() {
            return Err(ConfigError::NoMembershipHosts);
        }
        if self.shared_store_dsn.trim().is_empty() {
            return Err(ConfigError::EmptyStoreDsn);
        }
        if self.event_retry_backoff_ms == 0 || self.event_retry_max == 0 {
            return Err(ConfigError::InvalidEventRetryPolicy {
                backoff_ms: self.event_retry_backoff_ms,
                max_attempts: self.event_retry_max,
            });
        }
        Ok(())
    }
}

fn default_num_deployments() -> u32 {
    1
}

fn default_membership_hosts() -> Vec<String> {
    vec!["127.0.0.1:2181".to_string()]
}

fn default_shared_store_dsn() -> String {
    "memory://local".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_event_retry_backoff_ms() -> u64 {
    100
}

fn default_event_retry_max() -> u32 {
    5
}

/// Rejected node configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `num_deployments` was zero.
    #[error("num_deployments must be at least 1")]
    NoDeployments,

    /// `local_deployment` does not name one of the configured deployments.
    #[error("local_deployment {local_deployment} is out of range for {num_deployments} deployment(s)")]
    DeploymentOutOfRange {
        local_deployment: u32,
        num_deployments: u32,
    },

    /// No membership service endpoint was configured.
    #[error("membership_hosts must list at least one endpoint")]
    NoMembershipHosts,

    /// The shared store connection descriptor was blank.
    #[error("shared_store_dsn must not be empty")]
    EmptyStoreDsn,

    /// The event-stream retry policy can never retry.
    #[error("event retry policy is unusable: backoff {backoff_ms}ms, max attempts {max_attempts}")]
    InvalidEventRetryPolicy { backoff_ms: u64, max_attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_deployments() {
        let config = NodeConfig {
            num_deployments: 0,
            ..NodeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoDeployments));
    }

    #[test]
    fn rejects_out_of_range_local_deployment() {
        let config = NodeConfig {
            num_deployments: 3,
            local_deployment: 3,
            ..NodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DeploymentOutOfRange {
                local_deployment: 3,
                num_deployments: 3,
            })
        );
    }

    #[test]
    fn rejects_empty_membership_hosts() {
        let config = NodeConfig {
            membership_hosts: vec![],
            ..NodeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoMembershipHosts));
    }

    #[test]
    fn rejects_blank_dsn() {
        let config = NodeConfig {
            shared_store_dsn: "   ".to_string(),
            ..NodeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyStoreDsn));
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        let config = NodeConfig {
            event_retry_max: 0,
            ..NodeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEventRetryPolicy { .. })));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: NodeConfig = serde_json::from_str(r#"{"num_deployments": 4, "local_deployment": 2}"#).unwrap();
        assert_eq!(config.num_deployments, 4);
        assert_eq!(config.local_deployment, 2);
        assert_eq!(config.event_retry_max, 5);
        config.validate().unwrap();
    }
}
