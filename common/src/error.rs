use thiserror::Error;

/// Errors raised by cluster members and their transports
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to provision queue {queue}: {message}")]
    Provision { queue: String, message: String },

    #[error("Failed to subscribe queue {queue} to topic {topic}: {message}")]
    Subscribe {
        queue: String,
        topic: String,
        message: String,
    },

    #[error("Failed to bind flow to queue {queue}: {message}")]
    Bind { queue: String, message: String },

    #[error("Session connect failed: {message}")]
    Connect { message: String },

    #[error("Session is not connected")]
    NotConnected,

    #[error("Timed out after {timeout_ms}ms waiting for the session to come up")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Flow error on queue {queue}: {message}")]
    Flow { queue: String, message: String },

    #[error("Cluster member has shut down")]
    Shutdown,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Provisioning, binding and capability failures abort startup; nothing retries them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::Provision { .. }
                | ClusterError::Subscribe { .. }
                | ClusterError::Bind { .. }
                | ClusterError::Connect { .. }
                | ClusterError::ConnectTimeout { .. }
                | ClusterError::Config { .. }
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ClusterError::Transport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ClusterError::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let provision = ClusterError::Provision {
            queue: "app_input".to_string(),
            message: "quota exceeded".to_string(),
        };
        assert!(provision.is_fatal());
        assert!(ClusterError::ConnectTimeout { timeout_ms: 10 }.is_fatal());

        assert!(!ClusterError::Serialization("bad json".to_string()).is_fatal());
        assert!(!ClusterError::NotConnected.is_fatal());
        assert!(!ClusterError::transport("send rejected").is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = ClusterError::Subscribe {
            queue: "app_state1".to_string(),
            topic: "app/out/2".to_string(),
            message: "no such queue".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to subscribe queue app_state1 to topic app/out/2: no such queue"
        );
    }
}
