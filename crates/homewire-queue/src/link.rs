//! Collaborators a queue talks to. None of them are owned by the queue.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use homewire_proto::Packet;

use crate::message::{Direction, MessageRef, MessageTemplate, Subtype};

/// Puts frames on the bus.
pub trait Transport: Send + Sync {
    /// Identifier persisted with queued entries.
    fn id(&self) -> &str;

    /// Send a frame. Failures are the transport's to log.
    fn send(&self, packet: &Packet, stealthy: bool);

    /// Send a frame behind a long wake-up preamble. Transports that cannot
    /// wake sleeping devices send it plainly.
    fn send_burst(&self, packet: &Packet, stealthy: bool) {
        self.send(packet, stealthy);
    }

    /// Whether the transport retransmits on its own. Queues never arm resend
    /// timers on such transports.
    fn auto_resend(&self) -> bool {
        false
    }

    /// How long a device needs to answer a frame.
    fn response_delay(&self) -> Duration {
        Duration::from_millis(90)
    }
}

/// Per-message-type send routine.
pub trait OutgoingHandler: Send + Sync {
    fn invoke(&self, message: &MessageTemplate, packet: Option<&Packet>);
}

/// Lookup of message templates, used when restoring persisted queues.
pub trait MessageRegistry: Send + Sync {
    fn find(
        &self,
        direction: Direction,
        message_type: u8,
        subtypes: &[Subtype],
    ) -> Option<MessageRef>;
}

/// Service-message state of the peer a queue talks to.
pub trait ServiceMessages: Send + Sync {
    fn set_config_pending(&self, pending: bool);

    fn set_unreachable(&self, _unreachable: bool) {}
}

/// Peer methods a restored drain callback can be bound to.
pub trait PeerActions: Send + Sync {
    fn schedule_value_reset(&self, channel: u32, key: &str, reset_value: u32, reset_at_secs: u32);
}

/// Liveness timestamp shared with whoever watches for stalled conversations.
///
/// Stores milliseconds since the Unix epoch. The queue only writes it.
#[derive(Debug, Clone, Default)]
pub struct LastAction(Arc<AtomicI64>);

impl LastAction {
    pub fn new() -> Self {
        let cell = Self::default();
        cell.touch();
        cell
    }

    pub fn touch(&self) {
        self.0.store(now_millis(), Ordering::Release);
    }

    /// Like [`LastAction::touch`], but stamped `slack` into the future.
    pub fn touch_with_slack(&self, slack: Duration) {
        let slack = i64::try_from(slack.as_millis()).unwrap_or(i64::MAX);
        self.0.store(now_millis().saturating_add(slack), Ordering::Release);
    }

    pub fn millis(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Everything a queue sends through or reports to.
#[derive(Clone)]
pub struct QueueLinks {
    pub transport: Arc<dyn Transport>,
    pub handler: Option<Arc<dyn OutgoingHandler>>,
    pub service: Option<Arc<dyn ServiceMessages>>,
    pub peer: Option<Arc<dyn PeerActions>>,
    pub last_action: Option<LastAction>,
}

impl QueueLinks {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handler: None,
            service: None,
            peer: None,
            last_action: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn OutgoingHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_service(mut self, service: Arc<dyn ServiceMessages>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_peer(mut self, peer: Arc<dyn PeerActions>) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_last_action(mut self, last_action: LastAction) -> Self {
        self.last_action = Some(last_action);
        self
    }
}

impl fmt::Debug for QueueLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLinks")
            .field("transport", &self.transport.id())
            .field("handler", &self.handler.is_some())
            .field("service", &self.service.is_some())
            .field("peer", &self.peer.is_some())
            .field("last_action", &self.last_action)
            .finish()
    }
}
