#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, unbounded};
use homewire_proto::{FrameKind, Packet};
use homewire_queue::{
    Direction, DispatchFlags, MessageRef, MessageRegistry, MessageTemplate, OutgoingHandler,
    PeerActions, QueueConfig, QueueLinks, ResendSchedule, ServiceMessages, Subtype, Transport,
    schedule::Band,
};
use parking_lot::Mutex;

pub const TRANSPORT_ID: &str = "test-if";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Resent until answered.
pub const RESEND: DispatchFlags = DispatchFlags::RESEND_IF_UNANSWERED;
/// Sent once, no timer.
pub const ONCE: DispatchFlags = DispatchFlags::empty();

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Transport that hands every sent frame to a channel.
///
/// `bursts` records, in send order, whether each frame went out in burst
/// mode. It is written before the frame reaches the channel.
pub struct RecordingTransport {
    id: String,
    auto_resend: bool,
    pub bursts: Mutex<Vec<bool>>,
    tx: Sender<Vec<u8>>,
}

impl RecordingTransport {
    pub fn new(id: &str) -> (Arc<Self>, Receiver<Vec<u8>>) {
        Self::with_auto_resend(id, false)
    }

    pub fn with_auto_resend(id: &str, auto_resend: bool) -> (Arc<Self>, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let transport = Arc::new(Self {
            id: id.to_owned(),
            auto_resend,
            bursts: Mutex::new(Vec::new()),
            tx,
        });
        (transport, rx)
    }
}

impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, packet: &Packet, _stealthy: bool) {
        self.bursts.lock().push(false);
        let _ = self.tx.send(packet.to_wire());
    }

    fn send_burst(&self, packet: &Packet, _stealthy: bool) {
        self.bursts.lock().push(true);
        let _ = self.tx.send(packet.to_wire());
    }

    fn auto_resend(&self) -> bool {
        self.auto_resend
    }

    fn response_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Handler that records the message types it was asked to send.
pub struct RecordingHandler {
    tx: Sender<(u8, Option<Vec<u8>>)>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, Receiver<(u8, Option<Vec<u8>>)>) {
        let (tx, rx) = unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl OutgoingHandler for RecordingHandler {
    fn invoke(&self, message: &MessageTemplate, packet: Option<&Packet>) {
        let _ = self
            .tx
            .send((message.message_type, packet.map(Packet::to_wire)));
    }
}

#[derive(Default)]
pub struct ServiceRecorder {
    pub config_pending: Mutex<Vec<bool>>,
    pub unreachable: Mutex<Vec<bool>>,
}

impl ServiceMessages for ServiceRecorder {
    fn set_config_pending(&self, pending: bool) {
        self.config_pending.lock().push(pending);
    }

    fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.lock().push(unreachable);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueReset {
    pub channel: u32,
    pub key: String,
    pub reset_value: u32,
    pub reset_at_secs: u32,
}

#[derive(Default)]
pub struct PeerRecorder {
    pub resets: Mutex<Vec<ValueReset>>,
}

impl PeerActions for PeerRecorder {
    fn schedule_value_reset(&self, channel: u32, key: &str, reset_value: u32, reset_at_secs: u32) {
        self.resets.lock().push(ValueReset {
            channel,
            key: key.to_owned(),
            reset_value,
            reset_at_secs,
        });
    }
}

/// Registry over a fixed list of templates, matched on direction, type and
/// exact subtypes.
pub struct Registry {
    pub messages: Vec<MessageRef>,
}

impl MessageRegistry for Registry {
    fn find(
        &self,
        direction: Direction,
        message_type: u8,
        subtypes: &[Subtype],
    ) -> Option<MessageRef> {
        self.messages
            .iter()
            .find(|m| {
                m.direction == direction && m.message_type == message_type && m.subtypes == subtypes
            })
            .cloned()
    }
}

/// Queue settings with millisecond-scale timers.
pub fn fast_config() -> QueueConfig {
    let band = Band::new(Duration::from_millis(40), Duration::from_millis(60));
    QueueConfig {
        resend: ResendSchedule {
            initial_delay: Duration::from_millis(10),
            early: band,
            middle: band,
            late: band,
            slice: Duration::from_millis(2),
        },
        pop_wait_slice: Duration::from_millis(2),
        ..QueueConfig::default()
    }
}

pub fn links(transport: Arc<RecordingTransport>) -> QueueLinks {
    QueueLinks::new(transport)
}

/// Data frame to `destination` from a fixed sender. The control byte is
/// generated from the frame fields.
pub fn frame(destination: u32, payload: &[u8]) -> Packet {
    Packet::builder(FrameKind::Data)
        .destination(destination)
        .sender(0x00FD_0001)
        .payload(payload.to_vec())
        .build()
        .expect("payload fits")
}

/// Next frame sent, or `None` after `timeout`.
pub fn recv(rx: &Receiver<Vec<u8>>, timeout: Duration) -> Option<Vec<u8>> {
    rx.recv_timeout(timeout).ok()
}

/// Every frame sent within `window`.
pub fn drain_for(rx: &Receiver<Vec<u8>>, window: Duration) -> Vec<Vec<u8>> {
    let deadline = std::time::Instant::now() + window;
    let mut out = Vec::new();
    while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(frame) => out.push(frame),
            Err(_) => break,
        }
    }
    out
}
