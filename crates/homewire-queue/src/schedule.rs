//! Resend decision and backoff timing.

use std::time::Duration;

use bitflags::bitflags;

bitflags! {
    /// How the queue treats an entry once it is sent.
    ///
    /// Set by whoever queues the entry. These are queue bookkeeping, not bits
    /// of the wire control byte; the framing layer never sees them.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DispatchFlags: u8 {
        /// The receiver answers within the same exchange; no timer needed.
        const RESPONSE_EXPECTED = 1 << 0;

        /// Resend when nothing answers.
        const RESEND_IF_UNANSWERED = 1 << 1;

        /// Long wake-up preamble for sleeping devices. Waits are stretched.
        const BURST = 1 << 2;
    }
}

impl DispatchFlags {
    /// Whether an entry sent with these flags needs a resend timer.
    pub fn needs_resend(self, force: bool) -> bool {
        force
            || (!self.contains(Self::RESPONSE_EXPECTED)
                && self.contains(Self::RESEND_IF_UNANSWERED))
    }

    #[inline]
    pub fn is_burst(self) -> bool {
        self.contains(Self::BURST)
    }
}

/// Wait of one backoff band, with and without burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub normal: Duration,
    pub burst: Duration,
}

impl Band {
    pub const fn new(normal: Duration, burst: Duration) -> Self {
        Self { normal, burst }
    }

    #[inline]
    fn pick(self, burst: bool) -> Duration {
        if burst { self.burst } else { self.normal }
    }
}

/// Backoff timing of resend timers.
///
/// Waits escalate with the attempt count: [`early`](Self::early) for attempts 0
/// and 1, [`middle`](Self::middle) for 2 to 5, [`late`](Self::late) after that.
/// Every wait is slept in [`slice`](Self::slice) steps so a stop request is seen
/// within one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendSchedule {
    /// Extra wait before the first check of attempt 0.
    pub initial_delay: Duration,
    pub early: Band,
    pub middle: Band,
    pub late: Band,
    pub slice: Duration,
}

impl Default for ResendSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            early: Band::new(Duration::from_millis(175), Duration::from_millis(700)),
            middle: Band::new(Duration::from_millis(1000), Duration::from_millis(1000)),
            late: Band::new(Duration::from_millis(2000), Duration::from_millis(5000)),
            slice: Duration::from_millis(25),
        }
    }
}

impl ResendSchedule {
    /// Wait before resend number `attempt` fires.
    pub fn wait_for(&self, attempt: u32, burst: bool) -> Duration {
        let band = match attempt {
            0..2 => self.early,
            2..6 => self.middle,
            _ => self.late,
        };
        band.pick(burst)
    }

    /// Burst sends and later attempts report a long keep-alive while waiting.
    #[inline]
    pub fn uses_long_keep_alive(&self, attempt: u32, burst: bool) -> bool {
        burst || attempt >= 2
    }
}
