use hastream_common::{HAState, SeqState};

/// Implemented by the hosting application to follow role changes and to
/// turn input into output while it is the active member.
///
/// All callbacks run on the member's event loop, one at a time, and must
/// not block.
pub trait ClusterEventListener<I, O>: Send + Sync {
    /// Role changed, e.g. Backup to Active
    fn on_ha_state_change(&self, old: HAState, new: HAState);

    /// Catch-up progress changed, e.g. Recovering to UpToDate
    fn on_seq_state_change(&self, old: SeqState, new: SeqState);

    /// An output of the active member was read from the state queue.
    /// Backups apply it to stay warm.
    fn on_state_message(&self, state: &O);

    /// Called for every accepted input once this member is active and up to
    /// date; the returned output is published by the cluster member.
    fn update_application_state(&self, input: &I) -> O;
}
