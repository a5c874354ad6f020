use crate::link::PeerActions;

/// Work scheduled on a peer once a queue drains.
///
/// Kept as data so it survives a restart; [`ResetAction::dispatch`] binds it to
/// the peer when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetAction {
    /// Set `key` on `channel` back to `reset_value` at `reset_at_secs` (Unix seconds).
    ScheduleValueReset {
        channel: u32,
        key: String,
        reset_value: u32,
        reset_at_secs: u32,
    },
}

impl ResetAction {
    pub fn dispatch(&self, peer: &dyn PeerActions) {
        match self {
            Self::ScheduleValueReset {
                channel,
                key,
                reset_value,
                reset_at_secs,
            } => peer.schedule_value_reset(*channel, key, *reset_value, *reset_at_secs),
        }
    }
}
