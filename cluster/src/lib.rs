pub mod coordinator;
pub mod listener;
pub mod serializer;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use coordinator::ClusterCoordinator;
pub use listener::ClusterEventListener;
pub use serializer::{BincodeSerializer, ClusteredAppSerializer, JsonSerializer};
pub use state::{ClusterSnapshot, ClusterStateHolder};
pub use transport::*;

use hastream_common::{ClusterError, QueueNames, Result};
use serde::{Deserialize, Serialize};

/// Cluster member configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Application identifier shared by every member
    pub app_id: String,

    /// This member's instance number
    pub instance: u32,

    /// Topic the shared input queue subscribes to
    pub input_topic: String,

    /// Authoritative output topic, published only while active and up to date
    pub active_topic: String,

    /// Non-authoritative output topic for external monitoring
    pub standby_topic: String,

    /// Topic the state queue subscribes to; defaults to `active_topic`
    pub state_topic: Option<String>,

    /// Quota for provisioned queues (MB)
    pub queue_quota_mb: u32,

    /// How long `bind_queues` waits for the session to come up (milliseconds)
    pub connect_timeout_ms: u64,

    /// Republish the last output at this period; 0 disables (milliseconds)
    pub heartbeat_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new("hastream", 1)
    }
}

impl ClusterConfig {
    /// Configuration with topics derived from the application id
    pub fn new(app_id: &str, instance: u32) -> Self {
        Self {
            app_id: app_id.to_string(),
            instance,
            input_topic: format!("{}/input", app_id),
            active_topic: format!("{}/active", app_id),
            standby_topic: format!("{}/standby", app_id),
            state_topic: None,
            queue_quota_mb: 150,
            connect_timeout_ms: 5000,
            heartbeat_interval_ms: 0,
        }
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames::new(&self.app_id, self.instance)
    }

    pub fn state_subscription(&self) -> &str {
        self.state_topic.as_deref().unwrap_or(&self.active_topic)
    }

    pub fn validate(&self) -> Result<()> {
        if self.app_id.is_empty() {
            return Err(ClusterError::config("app_id must not be empty"));
        }
        for (name, topic) in [
            ("input_topic", &self.input_topic),
            ("active_topic", &self.active_topic),
            ("standby_topic", &self.standby_topic),
        ] {
            if topic.is_empty() {
                return Err(ClusterError::config(format!("{} must not be empty", name)));
            }
        }
        if self.active_topic == self.standby_topic {
            return Err(ClusterError::config(
                "active_topic and standby_topic must differ",
            ));
        }
        if self.queue_quota_mb == 0 {
            return Err(ClusterError::config("queue_quota_mb must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::new("matcher", 2);
        assert_eq!(config.input_topic, "matcher/input");
        assert_eq!(config.state_subscription(), "matcher/active");
        assert_eq!(config.queue_quota_mb, 150);
        assert_eq!(config.queue_names().state_queue, "matcher_state2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_state_topic_override() {
        let mut config = ClusterConfig::new("fntest", 1);
        config.state_topic = Some("fntest/out/2".to_string());
        assert_eq!(config.state_subscription(), "fntest/out/2");
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ClusterConfig::default();
        config.standby_topic = config.active_topic.clone();
        assert!(matches!(config.validate(), Err(ClusterError::Config { .. })));

        let mut config = ClusterConfig::default();
        config.app_id.clear();
        assert!(config.validate().is_err());

        let mut config = ClusterConfig::default();
        config.queue_quota_mb = 0;
        assert!(config.validate().is_err());
    }
}
