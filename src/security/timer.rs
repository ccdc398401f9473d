// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Deadline timers for slow handshakes and teardown waits.
//!
//! All timers share one binary heap keyed by deadline and one sweeper task;
//! there is no thread per timer. Cancellation is a tombstone: the heap entry
//! stays behind, but its task is removed, so expiry of a cancelled handle is
//! a no-op. That makes expiry idempotent with the success path: whichever
//! side wins, the other does nothing.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one scheduled deadline. Cancelling an already-fired or
/// already-cancelled handle is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    tasks: HashMap<u64, TimerTask>,
}

pub struct DeadlineTimer {
    state: Mutex<TimerState>,
    next_id: AtomicU64,
    wakeup: Notify,
    cancel: CancellationToken,
}

impl DeadlineTimer {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            next_id: AtomicU64::new(1),
            wakeup: Notify::new(),
            cancel,
        })
    }

    /// Schedule `task` to run after `delay` on the sweeper task.
    pub fn schedule(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + delay;
        {
            let mut state = self.lock_state();
            state.heap.push(Reverse((deadline, id)));
            state.tasks.insert(id, Box::new(task));
        }
        self.wakeup.notify_one();
        TimerHandle(id)
    }

    /// Tombstone the handle. Returns true when the task had not fired yet.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let cancelled = self.lock_state().tasks.remove(&handle.0).is_some();
        if cancelled {
            debug!(id = handle.0, "timer cancelled");
        }
        cancelled
    }

    /// Run the sweeper until the cancellation token fires. Spawn once per
    /// process.
    pub async fn run(self: Arc<Self>) {
        loop {
            let next_deadline = {
                let mut state = self.lock_state();
                // Pop tombstones eagerly so they do not delay live entries.
                while let Some(Reverse((_, id))) = state.heap.peek() {
                    if state.tasks.contains_key(id) {
                        break;
                    }
                    state.heap.pop();
                }
                state.heap.peek().map(|Reverse((deadline, _))| *deadline)
            };

            match next_deadline {
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = self.wakeup.notified() => {},
                    }
                },
                Some(deadline) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = self.wakeup.notified() => {},
                        _ = tokio::time::sleep_until(deadline) => self.fire_due(),
                    }
                },
            }
        }
    }

    fn fire_due(&self) {
        loop {
            let task = {
                let mut state = self.lock_state();
                match state.heap.peek() {
                    Some(Reverse((deadline, _))) if *deadline <= Instant::now() => {
                        let Some(Reverse((_, id))) = state.heap.pop() else {
                            return;
                        };
                        state.tasks.remove(&id)
                    },
                    _ => return,
                }
            };
            // Run outside the lock; the task may schedule or cancel timers.
            if let Some(task) = task {
                task();
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TimerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
