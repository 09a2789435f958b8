use serde::{Deserialize, Serialize};

/// A member's standing in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HAState {
    /// No broker session
    #[default]
    Disconnected,

    /// Session is up but no role has been granted yet
    Connected,

    /// Warm backup mirroring the active member's output through its state queue
    Backup,

    /// Sole writer: consumes input and publishes authoritative output
    Active,
}

impl HAState {
    pub fn is_connected(&self) -> bool {
        !matches!(self, HAState::Disconnected)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, HAState::Active)
    }
}

impl std::fmt::Display for HAState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HAState::Disconnected => write!(f, "Disconnected"),
            HAState::Connected => write!(f, "Connected"),
            HAState::Backup => write!(f, "Backup"),
            HAState::Active => write!(f, "Active"),
        }
    }
}

/// A member's progress in catching up to the authoritative output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SeqState {
    /// Before connecting, binding, or reading
    #[default]
    Init,

    /// Session is up, queues not bound yet
    Connected,

    /// Input and state queues are bound
    Bound,

    /// Draining the state queue; either catching up as a new backup or
    /// waiting for this member's own recovery marker
    Recovering,

    /// Backup that has caught up and is mirroring live output
    Following,

    /// Every output of the previous active member has been applied
    UpToDate,
}

impl SeqState {
    /// `UpToDate` is only meaningful for the active member.
    pub fn is_valid_for(&self, ha: HAState) -> bool {
        match self {
            SeqState::UpToDate => ha.is_active(),
            SeqState::Following => ha == HAState::Backup,
            _ => true,
        }
    }
}

impl std::fmt::Display for SeqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeqState::Init => write!(f, "Init"),
            SeqState::Connected => write!(f, "Connected"),
            SeqState::Bound => write!(f, "Bound"),
            SeqState::Recovering => write!(f, "Recovering"),
            SeqState::Following => write!(f, "Following"),
            SeqState::UpToDate => write!(f, "UpToDate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(HAState::default(), HAState::Disconnected);
        assert_eq!(SeqState::default(), SeqState::Init);
        assert!(!HAState::default().is_connected());
    }

    #[test]
    fn test_up_to_date_requires_active() {
        assert!(SeqState::UpToDate.is_valid_for(HAState::Active));
        assert!(!SeqState::UpToDate.is_valid_for(HAState::Backup));
        assert!(!SeqState::UpToDate.is_valid_for(HAState::Connected));
        assert!(SeqState::Following.is_valid_for(HAState::Backup));
        assert!(!SeqState::Following.is_valid_for(HAState::Active));
        assert!(SeqState::Recovering.is_valid_for(HAState::Active));
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(HAState::Active.to_string(), "Active");
        assert_eq!(SeqState::UpToDate.to_string(), "UpToDate");

        let json = serde_json::to_string(&SeqState::Recovering).unwrap();
        assert_eq!(json, "\"Recovering\"");
        let back: HAState = serde_json::from_str("\"Backup\"").unwrap();
        assert_eq!(back, HAState::Backup);
    }
}
