//! Registry of the active queue of every peer address.
//!
//! A background sweep drops queues that drained or stalled. Dropped queues are
//! disposed outside the registry lock.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    config::ManagerConfig,
    link::{LastAction, QueueLinks, now_millis},
    queue::{OutboundQueue, QueueKind},
    worker::TaskSlot,
};

struct Registered {
    queue: Arc<OutboundQueue>,
    last_action: LastAction,
}

struct ManagerInner {
    config: ManagerConfig,
    queues: Mutex<HashMap<u32, Registered>>,
    next_id: AtomicU32,
    sweeper: TaskSlot,
    disposing: AtomicBool,
}

pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

impl QueueManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                queues: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(0),
                sweeper: TaskSlot::new("queue-sweep"),
                disposing: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Register a fresh queue for `address`, replacing (and disposing) the
    /// previous one. Returns `None` once the manager is disposed.
    pub fn create_queue(
        &self,
        links: QueueLinks,
        kind: QueueKind,
        address: u32,
    ) -> Option<Arc<OutboundQueue>> {
        if self.inner.disposing.load(Ordering::Acquire) {
            return None;
        }
        self.ensure_sweeper();

        let last_action = LastAction::new();
        let id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let queue = OutboundQueue::new(
            links.with_last_action(last_action.clone()),
            kind,
            id,
            self.inner.config.queue.clone(),
        );
        let displaced = self.inner.queues.lock().insert(
            address,
            Registered {
                queue: queue.clone(),
                last_action,
            },
        );
        if let Some(old) = displaced {
            debug!(
                address = format_args!("{address:06X}"),
                old = old.queue.id(),
                "replacing queue"
            );
            old.queue.dispose();
        }
        Some(queue)
    }

    /// The queue of `address`, with its keep-alive refreshed.
    pub fn get(&self, address: u32) -> Option<Arc<OutboundQueue>> {
        let queue = self.inner.queues.lock().get(&address).map(|r| r.queue.clone())?;
        queue.keep_alive();
        Some(queue)
    }

    pub fn len(&self) -> usize {
        self.inner.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queues.lock().is_empty()
    }

    /// Drop the queue of `address` if it still is queue `id` and has drained
    /// or been idle past the timeout.
    pub fn reset_queue(&self, address: u32, id: u32) {
        self.inner.reset_queue(address, id);
    }

    /// Stop the sweep and dispose every registered queue.
    pub fn dispose(&self) {
        if self.inner.disposing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.sweeper.stop();
        let queues: Vec<_> = self.inner.queues.lock().drain().map(|(_, r)| r.queue).collect();
        for queue in queues {
            queue.dispose();
        }
    }

    fn ensure_sweeper(&self) {
        if self.inner.sweeper.live() > 0 {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        self.inner.sweeper.start(move |stop| {
            let (interval, slice) = match inner.upgrade() {
                Some(inner) => (inner.config.sweep_interval, inner.config.queue.resend.slice),
                None => return,
            };
            while stop.sleep(interval, slice) {
                if !ManagerInner::sweep(&inner) {
                    return;
                }
            }
        });
    }
}

impl ManagerInner {
    /// One pass over the registry. Returns `false` once the manager is gone.
    fn sweep(me: &Weak<ManagerInner>) -> bool {
        let Some(inner) = me.upgrade() else {
            return false;
        };
        if inner.disposing.load(Ordering::Acquire) {
            return false;
        }
        let registered: Vec<(u32, u32)> = inner
            .queues
            .lock()
            .iter()
            .map(|(&address, r)| (address, r.queue.id()))
            .collect();
        for (address, id) in registered {
            inner.reset_queue(address, id);
        }
        true
    }

    fn reset_queue(&self, address: u32, id: u32) {
        let removed = {
            let mut queues = self.queues.lock();
            let Some(registered) = queues.get(&address) else {
                return;
            };
            if registered.queue.id() != id {
                return;
            }
            let drained = registered.queue.is_empty();
            let idle_timeout =
                i64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(i64::MAX);
            let idle_until = registered.last_action.millis().saturating_add(idle_timeout);
            if !drained && now_millis() <= idle_until {
                return;
            }
            queues.remove(&address).map(|r| (r.queue, drained))
        };
        let Some((queue, drained)) = removed else {
            return;
        };

        let unreachable = !drained && queue.kind() != QueueKind::Pairing;
        queue.dispose();
        if unreachable {
            info!(
                address = format_args!("{address:06X}"),
                queue = id,
                "peer did not answer, dropping its queue"
            );
            if let Some(service) = &queue.links().service {
                service.set_unreachable(true);
            }
        } else {
            debug!(address = format_args!("{address:06X}"), queue = id, "dropped queue");
        }
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.len())
            .field("disposing", &self.inner.disposing.load(Ordering::Acquire))
            .finish()
    }
}
