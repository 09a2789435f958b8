use hastream_common::{HAState, SeqState};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one cluster member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberHealth {
    pub name: String,
    pub status: HealthStatus,
    pub ha_state: HAState,
    pub seq_state: SeqState,
    pub message: Option<String>,
    pub timestamp: u64,
}

impl MemberHealth {
    /// Active or backup members that have caught up are healthy; members
    /// still recovering or binding are degraded; disconnected members are
    /// unhealthy.
    pub fn from_states(name: impl Into<String>, ha_state: HAState, seq_state: SeqState) -> Self {
        let (status, message) = match (ha_state, seq_state) {
            (HAState::Disconnected, _) => (HealthStatus::Unhealthy, Some("disconnected".to_string())),
            (HAState::Active, SeqState::UpToDate) => (HealthStatus::Healthy, None),
            (HAState::Backup, SeqState::Following) => (HealthStatus::Healthy, None),
            (_, seq) => (HealthStatus::Degraded, Some(format!("sequence state {}", seq))),
        };

        Self {
            name: name.into(),
            status,
            ha_state,
            seq_state,
            message,
            timestamp: current_timestamp(),
        }
    }

    fn is_authoritative(&self) -> bool {
        self.ha_state == HAState::Active && self.seq_state == SeqState::UpToDate
    }
}

/// Overall cluster health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    pub timestamp: u64,
    pub version: String,
    pub active_members: usize,
    pub members: Vec<MemberHealth>,
}

impl ClusterHealth {
    /// A cluster is healthy with exactly one authoritative member. None means
    /// no input is being processed; more than one is a split brain.
    pub fn evaluate(members: Vec<MemberHealth>) -> Self {
        let active_members = members.iter().filter(|m| m.is_authoritative()).count();

        let status = match active_members {
            1 if members.iter().all(|m| m.status == HealthStatus::Healthy) => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        info!(
            "Cluster health evaluated: status={:?}, active={}, members={}",
            status,
            active_members,
            members.len()
        );

        Self {
            status,
            timestamp: current_timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_members,
            members,
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_health_from_states() {
        let active = MemberHealth::from_states("a", HAState::Active, SeqState::UpToDate);
        assert_eq!(active.status, HealthStatus::Healthy);
        assert!(active.message.is_none());

        let recovering = MemberHealth::from_states("b", HAState::Backup, SeqState::Recovering);
        assert_eq!(recovering.status, HealthStatus::Degraded);
        assert_eq!(recovering.message, Some("sequence state Recovering".to_string()));

        let down = MemberHealth::from_states("c", HAState::Disconnected, SeqState::Init);
        assert_eq!(down.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_cluster_health() {
        let healthy = ClusterHealth::evaluate(vec![
            MemberHealth::from_states("a", HAState::Active, SeqState::UpToDate),
            MemberHealth::from_states("b", HAState::Backup, SeqState::Following),
        ]);
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert_eq!(healthy.active_members, 1);

        let degraded = ClusterHealth::evaluate(vec![
            MemberHealth::from_states("a", HAState::Active, SeqState::UpToDate),
            MemberHealth::from_states("b", HAState::Disconnected, SeqState::Init),
        ]);
        assert_eq!(degraded.status, HealthStatus::Degraded);

        let leaderless = ClusterHealth::evaluate(vec![MemberHealth::from_states(
            "b",
            HAState::Backup,
            SeqState::Following,
        )]);
        assert_eq!(leaderless.status, HealthStatus::Unhealthy);

        let split = ClusterHealth::evaluate(vec![
            MemberHealth::from_states("a", HAState::Active, SeqState::UpToDate),
            MemberHealth::from_states("b", HAState::Active, SeqState::UpToDate),
        ]);
        assert_eq!(split.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_health_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
