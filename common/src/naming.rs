use serde::{Deserialize, Serialize};

/// Broker resource names for one cluster member, derived from the
/// application id and instance number supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    /// Exclusive queue shared by every member of the cluster
    pub input_queue: String,

    /// Private queue mirroring the active member's output
    pub state_queue: String,

    /// Session client name
    pub client_name: String,
}

impl QueueNames {
    pub fn new(app_id: &str, instance: u32) -> Self {
        Self {
            input_queue: format!("{}_input", app_id),
            state_queue: format!("{}_state{}", app_id, instance),
            client_name: format!("{}_inst{}", app_id, instance),
        }
    }

    /// Topic carrying trade or other auxiliary announcements for an application.
    pub fn announcement_topic(app_id: &str, kind: &str) -> String {
        format!("{}/{}/{}", kind, app_id, "new")
    }
}
