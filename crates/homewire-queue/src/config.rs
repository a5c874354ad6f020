use std::time::Duration;

use crate::schedule::{DispatchFlags, ResendSchedule};

/// Default number of transmissions budgeted per entry.
pub const DEFAULT_RETRIES: u32 = 4;

/// Per-queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Retry limit. An unanswered entry is resent `retries - 2` times.
    pub retries: u32,
    pub resend: ResendSchedule,
    /// Polling step of pop-wait timers.
    pub pop_wait_slice: Duration,
    /// How far a long keep-alive pushes the liveness stamp ahead.
    pub long_keep_alive_slack: Duration,
    /// Dispatch flags given to packet entries restored from disk.
    pub restored_dispatch: DispatchFlags,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            resend: ResendSchedule::default(),
            pop_wait_slice: Duration::from_millis(25),
            long_keep_alive_slack: Duration::from_millis(5000),
            restored_dispatch: DispatchFlags::RESEND_IF_UNANSWERED,
        }
    }
}

/// Settings of a [`QueueManager`](crate::manager::QueueManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Pause between two sweeps over the registered queues.
    pub sweep_interval: Duration,
    /// A queue untouched for this long is dropped by the sweep.
    pub idle_timeout: Duration,
    pub queue: QueueConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(2000),
            queue: QueueConfig::default(),
        }
    }
}
