//! One conversation with one peer.
//!
//! An [`OutboundQueue`] holds entries in send order. The front entry is sent
//! as soon as it reaches the front, a resend timer is armed when its dispatch
//! flags ask for one, and [`OutboundQueue::pop`] moves on once the peer
//! answered (or a pop-wait timer gave up waiting). When the last entry is
//! popped the next queue of the pending FIFO is spliced in.
//!
//! Background work runs on four task slots (send, resend, pop-wait, splice).
//! The entry lock is never held while a task is started, stopped or joined.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use homewire_proto::Packet;
use parking_lot::Mutex;
use strum::{Display, FromRepr};
use tracing::{debug, error, info, warn};

use crate::{
    action::ResetAction,
    config::QueueConfig,
    entry::QueueEntry,
    link::QueueLinks,
    message::MessageRef,
    pending::PendingQueues,
    schedule::DispatchFlags,
    worker::{StopToken, TaskSlot},
};

/// What a queue is for.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum QueueKind {
    Empty = 0,
    Default = 1,
    /// Writes configuration to the peer.
    Config = 2,
    Pairing = 3,
    PairingCentral = 4,
    Unpairing = 5,
    /// Ad hoc conversation with a peer.
    Peer = 6,
}

pub(crate) struct QueueState {
    pub(crate) kind: QueueKind,
    pub(crate) entries: VecDeque<QueueEntry>,
    pub(crate) retries: u32,
    pub(crate) pending: Option<Arc<PendingQueues>>,
    working_on_pending: bool,
    /// FIFO id of the pending queue currently spliced in.
    pending_id: Option<u32>,
    pub(crate) on_drained: Option<ResetAction>,
    pub(crate) parameter_name: String,
    pub(crate) channel: Option<u32>,
}

/// Copy of the parts of a pending queue that are spliced into the active one.
pub(crate) struct Snapshot {
    kind: QueueKind,
    retries: u32,
    on_drained: Option<ResetAction>,
    entries: Vec<QueueEntry>,
    wake_on_radio: bool,
}

enum Next {
    Fire(QueueEntry),
    Wait,
    Drained {
        action: Option<ResetAction>,
        pending: Option<Arc<PendingQueues>>,
        pending_id: Option<u32>,
        kind: QueueKind,
    },
}

pub struct OutboundQueue {
    me: Weak<OutboundQueue>,
    id: u32,
    config: QueueConfig,
    links: QueueLinks,
    pub(crate) state: Mutex<QueueState>,
    resend_counter: AtomicU32,
    no_sending: AtomicBool,
    disposing: AtomicBool,
    wake_on_radio: AtomicBool,
    last_pop: Mutex<Instant>,
    send_task: TaskSlot,
    resend_task: TaskSlot,
    pop_wait_task: TaskSlot,
    splice_task: TaskSlot,
}

impl OutboundQueue {
    pub fn new(links: QueueLinks, kind: QueueKind, id: u32, config: QueueConfig) -> Arc<Self> {
        let retries = config.retries;
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            config,
            links,
            state: Mutex::new(QueueState {
                kind,
                entries: VecDeque::new(),
                retries,
                pending: None,
                working_on_pending: false,
                pending_id: None,
                on_drained: None,
                parameter_name: String::new(),
                channel: None,
            }),
            resend_counter: AtomicU32::new(0),
            no_sending: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            wake_on_radio: AtomicBool::new(false),
            last_pop: Mutex::new(Instant::now()),
            send_task: TaskSlot::new("queue-send"),
            resend_task: TaskSlot::new("queue-resend"),
            pop_wait_task: TaskSlot::new("queue-pop-wait"),
            splice_task: TaskSlot::new("queue-splice"),
        })
    }

    /// A queue that only collects entries, to be handed to a pending FIFO.
    pub fn pending(links: QueueLinks, kind: QueueKind, config: QueueConfig) -> Arc<Self> {
        let queue = Self::new(links, kind, 0, config);
        queue.set_no_sending(true);
        queue
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn links(&self) -> &QueueLinks {
        &self.links
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn kind(&self) -> QueueKind {
        self.state.lock().kind
    }

    pub fn set_kind(&self, kind: QueueKind) {
        self.state.lock().kind = kind;
    }

    pub fn retries(&self) -> u32 {
        self.state.lock().retries
    }

    pub fn set_retries(&self, retries: u32) {
        if retries < 2 {
            warn!(queue = self.id, retries, "retry limit below 2 disables resends");
        }
        self.state.lock().retries = retries;
    }

    pub fn no_sending(&self) -> bool {
        self.no_sending.load(Ordering::Acquire)
    }

    /// Keep entries without ever sending them.
    pub fn set_no_sending(&self, no_sending: bool) {
        self.no_sending.store(no_sending, Ordering::Release);
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }

    pub fn parameter_name(&self) -> String {
        self.state.lock().parameter_name.clone()
    }

    pub fn set_parameter_name(&self, name: impl Into<String>) {
        self.state.lock().parameter_name = name.into();
    }

    pub fn channel(&self) -> Option<u32> {
        self.state.lock().channel
    }

    pub fn set_channel(&self, channel: Option<u32>) {
        self.state.lock().channel = channel;
    }

    pub fn drain_callback(&self) -> Option<ResetAction> {
        self.state.lock().on_drained.clone()
    }

    /// Run `action` on the peer once this queue drains.
    pub fn set_drain_callback(&self, action: Option<ResetAction>) {
        self.state.lock().on_drained = action;
    }

    pub fn resend_counter(&self) -> u32 {
        self.resend_counter.load(Ordering::Acquire)
    }

    /// Resend timers currently armed. Never more than one.
    pub fn armed_resend_timers(&self) -> usize {
        self.resend_task.live()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn has_entries(&self) -> bool {
        !self.state.lock().entries.is_empty()
    }

    pub fn front(&self) -> Option<QueueEntry> {
        self.state.lock().entries.front().cloned()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn pending_queues(&self) -> Option<Arc<PendingQueues>> {
        self.state.lock().pending.clone()
    }

    /// No entries left and no pending queue waiting.
    pub fn is_empty(&self) -> bool {
        let (empty, pending) = {
            let state = self.state.lock();
            (state.entries.is_empty(), state.pending.clone())
        };
        empty && pending.is_none_or(|fifo| fifo.is_empty())
    }

    pub fn keep_alive(&self) {
        if let Some(last_action) = &self.links.last_action {
            last_action.touch();
        }
    }

    pub fn long_keep_alive(&self) {
        if let Some(last_action) = &self.links.last_action {
            last_action.touch_with_slack(self.config.long_keep_alive_slack);
        }
    }

    /// The next packet sent by this queue goes out in burst mode, waking the
    /// device first. The request is used up by that one packet.
    pub fn set_wake_on_radio_bit(&self) {
        self.wake_on_radio.store(true, Ordering::Release);
    }

    // ==== Pushing ====

    pub fn push_packet(
        &self,
        packet: Packet,
        dispatch: DispatchFlags,
        stealthy: bool,
        force_resend: bool,
    ) {
        self.push_entry(QueueEntry::packet(packet, dispatch, stealthy, force_resend));
    }

    /// Queue a template for an expected incoming message.
    pub fn push_message(&self, message: MessageRef, force_resend: bool) {
        if message.is_outgoing() {
            error!(
                queue = self.id,
                message_type = message.message_type,
                "outgoing message queued without its packet"
            );
        }
        self.push_entry(QueueEntry::message(message, None, force_resend));
    }

    /// Queue an outgoing message together with the packet it answers.
    pub fn push_outgoing(&self, message: MessageRef, packet: Packet, force_resend: bool) {
        if !message.is_outgoing() {
            warn!(
                queue = self.id,
                message_type = message.message_type,
                "incoming message queued with a packet"
            );
        }
        self.push_entry(QueueEntry::message(message, Some(packet), force_resend));
    }

    fn push_entry(&self, entry: QueueEntry) {
        if self.is_disposing() {
            return;
        }
        let fire = {
            let mut state = self.state.lock();
            Self::enqueue(&mut state, entry, !self.no_sending())
        };
        if let Some(entry) = fire {
            self.fire(entry);
        }
    }

    /// Append `entry`. Returns a copy when it is to be sent right away: the
    /// queue was empty, or only held an incoming message waiting for its answer.
    fn enqueue(state: &mut QueueState, entry: QueueEntry, sending: bool) -> Option<QueueEntry> {
        let free = match state.entries.len() {
            0 => true,
            1 => state.entries[0].is_incoming_message(),
            _ => false,
        };
        let fire = (sending && free && entry.is_outgoing()).then(|| entry.clone());
        state.entries.push_back(entry);
        fire
    }

    /// Put a packet in front of everything else and send it.
    ///
    /// With `pop_first` the current front is dropped in the same step.
    pub fn push_front(
        &self,
        packet: Packet,
        dispatch: DispatchFlags,
        stealthy: bool,
        pop_first: bool,
        force_resend: bool,
    ) {
        if self.is_disposing() {
            return;
        }
        self.keep_alive();
        if pop_first {
            self.pop_wait_task.signal();
            self.resend_task.signal();
        }
        let entry = QueueEntry::packet(packet, dispatch, stealthy, force_resend);
        {
            let mut state = self.state.lock();
            if pop_first {
                state.entries.pop_front();
            }
            state.entries.push_front(entry.clone());
        }
        if !self.no_sending() {
            self.fire(entry);
        }
    }

    // ==== Pending queues ====

    /// Use `fifo` as this queue's backlog, splicing its front in right away when idle.
    pub fn set_pending_queues(&self, fifo: Arc<PendingQueues>) {
        if self.is_disposing() {
            return;
        }
        let idle = {
            let mut state = self.state.lock();
            state.pending = Some(fifo);
            state.entries.is_empty()
        };
        if idle {
            self.splice_pending();
        }
    }

    /// Append `queue` to the backlog and splice it in when this queue is idle.
    ///
    /// `clear_pending` drops the backlog first. `pop_immediately` removes the
    /// spliced queue from the backlog right away instead of when it drains.
    pub fn push_pending(
        &self,
        queue: Arc<OutboundQueue>,
        pop_immediately: bool,
        clear_pending: bool,
    ) {
        if self.is_disposing() {
            return;
        }
        let (fifo, idle) = {
            let mut state = self.state.lock();
            let fifo = state
                .pending
                .get_or_insert_with(|| Arc::new(PendingQueues::new()))
                .clone();
            (fifo, state.entries.is_empty())
        };
        if clear_pending {
            fifo.clear();
        }
        fifo.push(queue);
        if idle {
            self.splice_pending();
        }

        if pop_immediately {
            let id = {
                let mut state = self.state.lock();
                state.working_on_pending = false;
                state.pending_id.take()
            };
            if let Some(id) = id {
                fifo.pop_id(id);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            kind: state.kind,
            retries: state.retries,
            on_drained: state.on_drained.clone(),
            entries: state.entries.iter().cloned().collect(),
            wake_on_radio: self.wake_on_radio.swap(false, Ordering::AcqRel),
        }
    }

    /// Copy the front pending queue's entries in.
    fn splice_pending(&self) {
        if self.is_disposing() {
            return;
        }
        let Some(fifo) = self.state.lock().pending.clone() else {
            return;
        };
        let Some((pending_id, next)) = fifo.front_non_empty() else {
            return;
        };
        let snapshot = next.snapshot();
        if snapshot.wake_on_radio {
            self.set_wake_on_radio_bit();
        }

        let mut fire = None;
        {
            let mut state = self.state.lock();
            state.kind = snapshot.kind;
            state.retries = snapshot.retries;
            state.on_drained = snapshot.on_drained;
            state.pending_id = Some(pending_id);
            state.working_on_pending = true;
            let sending = !self.no_sending();
            for entry in snapshot.entries {
                if let Some(entry) = Self::enqueue(&mut state, entry, sending) {
                    fire.get_or_insert(entry);
                }
            }
        }
        debug!(queue = self.id, pending_id, kind = %snapshot.kind, "spliced pending queue");

        if let Some(entry) = fire {
            *self.last_pop.lock() = Instant::now();
            self.fire(entry);
        }
    }

    // ==== Advancing ====

    /// Drop the front entry and move on.
    pub fn pop(&self) {
        if self.is_disposing() {
            return;
        }
        self.keep_alive();
        self.pop_wait_task.signal();
        self.resend_task.signal();
        *self.last_pop.lock() = Instant::now();

        let popped = self.state.lock().entries.pop_front();
        if popped.is_none() {
            return;
        }
        debug!(queue = self.id, "popped queue entry");
        self.advance();
    }

    /// Pop after `timeout` unless something else pops or stops the timer first.
    pub fn pop_wait(&self, timeout: Duration) {
        if self.is_disposing() {
            return;
        }
        self.resend_task.stop();
        let me = self.me.clone();
        let slice = self.config.pop_wait_slice;
        self.pop_wait_task.start(move |stop| {
            if !stop.sleep(timeout, slice) {
                return;
            }
            if let Some(queue) = me.upgrade() {
                queue.pop();
            }
        });
    }

    fn advance(&self) {
        if self.is_disposing() {
            return;
        }
        let next = {
            let mut state = self.state.lock();
            if state.entries.is_empty() {
                Next::Drained {
                    action: state.on_drained.take(),
                    pending: state.pending.clone(),
                    pending_id: state.pending_id.filter(|_| state.working_on_pending),
                    kind: state.kind,
                }
            } else if state.entries[0].is_outgoing() {
                Next::Fire(state.entries[0].clone())
            } else {
                Next::Wait
            }
        };

        match next {
            Next::Fire(entry) => {
                if self.no_sending() {
                    self.resend_counter.store(0, Ordering::Release);
                } else {
                    self.fire(entry);
                }
            }
            Next::Wait => {}
            Next::Drained {
                action,
                pending,
                pending_id,
                kind,
            } => self.drained(action, pending, pending_id, kind),
        }
    }

    fn drained(
        &self,
        action: Option<ResetAction>,
        pending: Option<Arc<PendingQueues>>,
        pending_id: Option<u32>,
        kind: QueueKind,
    ) {
        if let Some(action) = action {
            match &self.links.peer {
                Some(peer) => action.dispatch(peer.as_ref()),
                None => warn!(queue = self.id, ?action, "drain callback without a peer to run on"),
            }
        }
        if let (Some(fifo), Some(id)) = (&pending, pending_id) {
            fifo.pop_id(id);
        }

        let more = pending.as_ref().is_some_and(|fifo| !fifo.is_empty());
        if !more {
            self.resend_task.signal();
            {
                let mut state = self.state.lock();
                state.working_on_pending = false;
                state.pending_id = None;
            }
            info!(queue = self.id, "queue is empty and there are no pending queues");
            if matches!(kind, QueueKind::Config | QueueKind::Unpairing) {
                if let Some(service) = &self.links.service {
                    service.set_config_pending(false);
                }
            }
            return;
        }

        debug!(queue = self.id, "queue is empty, pushing next pending queue");
        let me = self.me.clone();
        self.splice_task.start(move |stop| {
            if stop.is_stopped() {
                return;
            }
            if let Some(queue) = me.upgrade() {
                queue.splice_pending();
            }
        });
    }

    // ==== Sending ====

    /// Send `entry` and arm its resend timer, as two separate steps.
    fn fire(&self, entry: QueueEntry) {
        self.resend_counter.store(0, Ordering::Release);
        self.dispatch(entry);
        self.start_resend();
    }

    fn dispatch(&self, entry: QueueEntry) {
        if self.is_disposing() {
            return;
        }
        let me = self.me.clone();
        self.send_task.replace(move |stop| {
            if stop.is_stopped() {
                return;
            }
            if let Some(queue) = me.upgrade().filter(|q| !q.is_disposing()) {
                queue.deliver(entry);
            }
        });
    }

    fn deliver(&self, entry: QueueEntry) {
        match entry {
            QueueEntry::Packet {
                packet,
                dispatch,
                stealthy,
                ..
            } => self.send(&packet, dispatch, stealthy),
            QueueEntry::Message {
                message, packet, ..
            } => match &self.links.handler {
                Some(handler) => handler.invoke(&message, packet.as_ref()),
                None => error!(
                    queue = self.id,
                    message_type = message.message_type,
                    "no outgoing handler for queued message"
                ),
            },
        }
    }

    fn send(&self, packet: &Packet, dispatch: DispatchFlags, stealthy: bool) {
        if self.no_sending() || self.is_disposing() {
            return;
        }
        let woken = self.wake_on_radio.swap(false, Ordering::AcqRel);
        let burst = woken || dispatch.is_burst();
        if !stealthy {
            debug!(queue = self.id, packet = %packet, burst, "sending");
        }
        if burst {
            self.links.transport.send_burst(packet, stealthy);
        } else {
            self.links.transport.send(packet, stealthy);
        }
    }

    /// The entry being worked on: the front, or the one right behind an
    /// incoming message placeholder.
    fn active_entry(entries: &VecDeque<QueueEntry>) -> Option<&QueueEntry> {
        let front = entries.front()?;
        if front.is_outgoing() {
            return Some(front);
        }
        entries.get(1).filter(|e| front.is_incoming_message() && e.is_outgoing())
    }

    fn start_resend(&self) {
        if self.is_disposing() || self.no_sending() || self.links.transport.auto_resend() {
            return;
        }
        let dispatch = {
            let state = self.state.lock();
            match Self::active_entry(&state.entries) {
                Some(entry) if entry.dispatch().needs_resend(entry.force_resend()) => {
                    entry.dispatch()
                }
                _ => return,
            }
        };
        let burst = dispatch.is_burst();
        let me = self.me.clone();
        self.resend_task.start(move |stop| {
            if let Some(queue) = me.upgrade() {
                queue.run_resend(&stop, burst);
            }
        });
    }

    fn run_resend(self: Arc<Self>, stop: &StopToken, burst: bool) {
        let schedule = &self.config.resend;
        let attempt = self.resend_counter.load(Ordering::Acquire);

        if attempt == 0 {
            let since_pop = self.last_pop.lock().elapsed();
            let answer_window = self.links.transport.response_delay().saturating_sub(since_pop);
            if !stop.sleep(schedule.initial_delay.max(answer_window), schedule.slice) {
                return;
            }
        }
        if schedule.uses_long_keep_alive(attempt, burst) {
            self.long_keep_alive();
        } else {
            self.keep_alive();
        }
        if !stop.sleep(schedule.wait_for(attempt, burst), schedule.slice) {
            return;
        }

        let (entry, retries) = {
            let state = self.state.lock();
            if stop.is_stopped() || self.is_disposing() {
                return;
            }
            match Self::active_entry(&state.entries) {
                Some(entry) => (entry.clone(), state.retries),
                None => return,
            }
        };

        if attempt >= retries.saturating_sub(2) {
            debug!(queue = self.id, attempt, "no answer, giving up on resends");
            self.resend_counter.store(0, Ordering::Release);
            return;
        }

        if !self.no_sending() {
            debug!(queue = self.id, attempt, "resending");
            self.dispatch(entry);
        }
        self.resend_counter.fetch_add(1, Ordering::AcqRel);

        let me = self.me.clone();
        self.resend_task.rearm(stop, move |stop| {
            if let Some(queue) = me.upgrade() {
                queue.run_resend(&stop, burst);
            }
        });
    }

    // ==== Teardown ====

    /// Stop resending and drop every entry and the backlog.
    pub fn clear(&self) {
        self.resend_task.stop();
        let fifo = {
            let mut state = self.state.lock();
            state.entries.clear();
            state.working_on_pending = false;
            state.pending_id = None;
            state.pending.clone()
        };
        if let Some(fifo) = fifo {
            fifo.clear();
        }
    }

    /// Stop all background work. The queue ignores every later call.
    pub fn dispose(&self) {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.splice_task.stop();
        self.pop_wait_task.stop();
        self.resend_task.stop();
        self.send_task.stop();
        let mut state = self.state.lock();
        state.entries.clear();
        state.pending = None;
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("id", &self.id)
            .field("no_sending", &self.no_sending())
            .field("disposing", &self.is_disposing())
            .finish_non_exhaustive()
    }
}
