//! Cancellable background tasks.
//!
//! Each queue runs its timers on plain threads held in [`TaskSlot`]s. A slot
//! holds at most one task; starting a new one stops (signals, then joins) the
//! previous one first. Slots never hold a lock while joining, and a task never
//! joins itself, so a task may freely restart or stop its own slot.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::error;

/// Handed to every task; tells it when to give up.
#[derive(Debug, Clone)]
pub(crate) struct StopToken {
    stop: Arc<AtomicBool>,
    counted: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl StopToken {
    #[inline]
    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep `total` in `slice` steps. Returns `false` as soon as a stop is seen.
    pub(crate) fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        let slice = slice.max(Duration::from_millis(1));
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }

    /// Stop counting this task as live. Idempotent.
    fn retire(&self) {
        if self.counted.swap(false, Ordering::AcqRel) {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

struct Task {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Task {
    fn signal(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn join(self) {
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!("background task panicked");
        }
    }
}

pub(crate) struct TaskSlot {
    name: &'static str,
    current: Mutex<Option<Task>>,
    live: Arc<AtomicUsize>,
}

impl TaskSlot {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stop the current task, then run `f` on a fresh thread.
    pub(crate) fn start<F>(&self, f: F)
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        self.stop();
        let Some(task) = self.spawn(f) else {
            return;
        };
        let displaced = self.current.lock().replace(task);
        if let Some(old) = displaced {
            old.signal();
            old.join();
        }
    }

    /// Run `f` on a fresh thread after signalling the current task, without
    /// waiting for it.
    pub(crate) fn replace<F>(&self, f: F)
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let Some(task) = self.spawn(f) else {
            return;
        };
        if let Some(old) = self.current.lock().replace(task) {
            old.signal();
        }
    }

    /// Hand the slot over from the calling task to a new one.
    ///
    /// Does nothing and returns `false` when `token` was stopped meanwhile.
    pub(crate) fn rearm<F>(&self, token: &StopToken, f: F) -> bool
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let mut current = self.current.lock();
        if token.is_stopped() {
            return false;
        }
        token.retire();
        match self.spawn(f) {
            Some(task) => {
                // The caller's own handle is dropped here; it exits right after.
                *current = Some(task);
                true
            }
            None => false,
        }
    }

    /// Signal the current task and wait for it to finish.
    pub(crate) fn stop(&self) {
        let old = self.current.lock().take();
        if let Some(old) = old {
            old.signal();
            old.join();
        }
    }

    /// Signal the current task without waiting for it.
    pub(crate) fn signal(&self) {
        if let Some(task) = self.current.lock().as_ref() {
            task.signal();
        }
    }

    /// Tasks of this slot that are armed and not yet finished.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn spawn<F>(&self, f: F) -> Option<Task>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let token = StopToken {
            stop: stop.clone(),
            counted: Arc::new(AtomicBool::new(true)),
            live: self.live.clone(),
        };
        self.live.fetch_add(1, Ordering::AcqRel);

        let guard = token.clone();
        let spawned = thread::Builder::new()
            .name(self.name.to_owned())
            .spawn(move || {
                let _retire = RetireOnExit(guard);
                f(token);
            });
        match spawned {
            Ok(handle) => Some(Task { stop, handle }),
            Err(err) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                error!(task = self.name, error = %err, "failed to spawn background task");
                None
            }
        }
    }
}

struct RetireOnExit(StopToken);

impl Drop for RetireOnExit {
    fn drop(&mut self) {
        self.0.retire();
    }
}
