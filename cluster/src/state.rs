use crate::listener::ClusterEventListener;
use hastream_common::{HAState, SeqState};
use std::sync::Arc;
use tracing::{debug, info};

/// Point-in-time copy of a member's cluster state
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot<I, O> {
    pub ha_state: HAState,
    pub seq_state: SeqState,
    pub last_input: Option<I>,
    pub last_output: Option<O>,
}

impl<I, O> Default for ClusterSnapshot<I, O> {
    fn default() -> Self {
        Self {
            ha_state: HAState::Disconnected,
            seq_state: SeqState::Init,
            last_input: None,
            last_output: None,
        }
    }
}

impl<I, O> ClusterSnapshot<I, O> {
    /// Active and caught up: the only state allowed to publish authoritative output
    pub fn is_authoritative(&self) -> bool {
        self.ha_state == HAState::Active && self.seq_state == SeqState::UpToDate
    }
}

/// Role state, last input and last output of one cluster member.
///
/// Not synchronized: it lives inside the member's event loop and every
/// mutation happens there. Setters fan out to the application listener,
/// which is shared with the host and outlives the holder.
pub struct ClusterStateHolder<I, O> {
    member: String,
    ha_state: HAState,
    seq_state: SeqState,
    last_input: Option<I>,
    last_output: Option<O>,
    listener: Arc<dyn ClusterEventListener<I, O>>,
}

impl<I, O> ClusterStateHolder<I, O>
where
    I: Clone,
    O: Clone,
{
    pub fn new(member: impl Into<String>, listener: Arc<dyn ClusterEventListener<I, O>>) -> Self {
        Self {
            member: member.into(),
            ha_state: HAState::Disconnected,
            seq_state: SeqState::Init,
            last_input: None,
            last_output: None,
            listener,
        }
    }

    /// Client name of the member this state belongs to
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn ha_state(&self) -> HAState {
        self.ha_state
    }

    pub fn seq_state(&self) -> SeqState {
        self.seq_state
    }

    pub fn last_input(&self) -> Option<&I> {
        self.last_input.as_ref()
    }

    pub fn last_output(&self) -> Option<&O> {
        self.last_output.as_ref()
    }

    /// Returns true if the state changed. Re-applying the current value is a
    /// no-op so redelivered broker events cause no duplicate side effects.
    pub fn set_ha_state(&mut self, state: HAState) -> bool {
        if state == self.ha_state {
            return false;
        }
        let old = self.ha_state;
        self.ha_state = state;
        info!("HA state change: member={}, {} => {}", self.member, old, state);
        self.listener.on_ha_state_change(old, state);
        true
    }

    /// Same compare-and-notify contract as [`Self::set_ha_state`].
    pub fn set_seq_state(&mut self, state: SeqState) -> bool {
        if state == self.seq_state {
            return false;
        }
        let old = self.seq_state;
        self.seq_state = state;
        info!("Sequence state change: member={}, {} => {}", self.member, old, state);
        self.listener.on_seq_state_change(old, state);
        true
    }

    /// Notify first, then commit.
    pub fn set_last_output(&mut self, output: O) {
        self.listener.on_state_message(&output);
        self.last_output = Some(output);
    }

    /// Only valid while this member is the authoritative writer. The
    /// listener computes the new output, which is returned for publication.
    pub fn record_accepted_input(&mut self, input: I) -> O {
        let output = self.listener.update_application_state(&input);
        debug!("Recorded accepted input: member={}", self.member);
        self.last_input = Some(input);
        self.last_output = Some(output.clone());
        output
    }

    /// Back to Disconnected/Init, notifying as usual. The sequence state
    /// goes first so `UpToDate` is never observed without `Active`.
    pub fn reset(&mut self) {
        self.set_seq_state(SeqState::Init);
        self.set_ha_state(HAState::Disconnected);
    }

    pub fn snapshot(&self) -> ClusterSnapshot<I, O> {
        ClusterSnapshot {
            ha_state: self.ha_state,
            seq_state: self.seq_state,
            last_input: self.last_input.clone(),
            last_output: self.last_output.clone(),
        }
    }
}
