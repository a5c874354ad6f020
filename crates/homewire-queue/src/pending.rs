use std::{collections::VecDeque, fmt::Write as _, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    entry::QueueEntry,
    queue::{OutboundQueue, QueueKind},
};

#[derive(Clone)]
struct Slot {
    id: u32,
    queue: Arc<OutboundQueue>,
}

#[derive(Default)]
struct Inner {
    queues: VecDeque<Slot>,
    next_id: u32,
}

/// Backlog of queues waiting to become active for one peer.
///
/// Every pushed queue gets the next FIFO id. The lock here is independent of
/// any queue's own lock: methods copy what they need out of the FIFO before
/// looking into a queue.
#[derive(Default)]
pub struct PendingQueues {
    inner: Mutex<Inner>,
}

impl PendingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `queue` unless it has no entries. Returns its FIFO id.
    pub fn push(&self, queue: Arc<OutboundQueue>) -> Option<u32> {
        if !queue.has_entries() {
            return None;
        }
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);
        inner.queues.push_back(Slot { id, queue });
        Some(id)
    }

    pub fn pop(&self) -> Option<Arc<OutboundQueue>> {
        self.inner.lock().queues.pop_front().map(|slot| slot.queue)
    }

    /// Pop the front only if it still is the queue with FIFO id `id`.
    pub fn pop_id(&self, id: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.queues.front().is_some_and(|slot| slot.id == id) {
            inner.queues.pop_front();
            true
        } else {
            false
        }
    }

    pub fn front(&self) -> Option<(u32, Arc<OutboundQueue>)> {
        self.inner
            .lock()
            .queues
            .front()
            .map(|slot| (slot.id, slot.queue.clone()))
    }

    /// Front queue with entries, dropping empty ones on the way.
    pub(crate) fn front_non_empty(&self) -> Option<(u32, Arc<OutboundQueue>)> {
        loop {
            let (id, queue) = self.front()?;
            if queue.has_entries() {
                return Some((id, queue));
            }
            debug!(pending_id = id, "dropping empty pending queue");
            self.pop_id(id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queues.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().queues.clear();
    }

    fn queues(&self) -> Vec<Slot> {
        self.inner.lock().queues.iter().cloned().collect()
    }

    pub(crate) fn queues_with_ids(&self) -> Vec<(u32, Arc<OutboundQueue>)> {
        self.queues().into_iter().map(|s| (s.id, s.queue)).collect()
    }

    /// Whether a queue of `kind` is already waiting.
    pub fn find(&self, kind: QueueKind) -> bool {
        self.queues().iter().any(|slot| slot.queue.kind() == kind)
    }

    /// Drop every queue of `kind` writing `parameter_name` on `channel`.
    ///
    /// An empty `parameter_name` matches nothing.
    pub fn remove_queue(&self, kind: QueueKind, parameter_name: &str, channel: Option<u32>) {
        if parameter_name.is_empty() {
            return;
        }
        let doomed: Vec<u32> = self
            .queues()
            .into_iter()
            .filter(|slot| {
                slot.queue.kind() == kind
                    && slot.queue.channel() == channel
                    && slot.queue.parameter_name() == parameter_name
            })
            .map(|slot| slot.id)
            .collect();
        if doomed.is_empty() {
            return;
        }
        self.inner
            .lock()
            .queues
            .retain(|slot| !doomed.contains(&slot.id));
    }

    /// Ask the front queue to wake the device with its next packet.
    pub fn set_wake_on_radio_bit(&self) {
        if let Some((_, queue)) = self.front() {
            queue.set_wake_on_radio_bit();
        }
    }

    /// Human-readable dump of the backlog.
    pub fn info_string(&self) -> String {
        let slots = self.queues();
        let mut out = String::new();
        let _ = writeln!(out, "Number of pending queues: {}", slots.len());
        for (i, slot) in slots.iter().enumerate() {
            let entries = slot.queue.entries();
            let _ = writeln!(
                out,
                "Queue {} (id {}, {}):",
                i + 1,
                slot.id,
                slot.queue.kind()
            );
            let _ = writeln!(out, "  Number of entries: {}", entries.len());
            for (j, entry) in entries.iter().enumerate() {
                let _ = match entry {
                    QueueEntry::Packet { packet, .. } => {
                        writeln!(out, "  Entry {} (packet): {packet}", j + 1)
                    }
                    QueueEntry::Message { message, .. } => writeln!(
                        out,
                        "  Entry {} (message): {} type {:#04x}, {} subtypes",
                        j + 1,
                        message.direction,
                        message.message_type,
                        message.subtypes.len()
                    ),
                };
            }
        }
        out
    }
}

impl std::fmt::Debug for PendingQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingQueues")
            .field("len", &self.len())
            .finish()
    }
}
