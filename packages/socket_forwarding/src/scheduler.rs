//! Cancellable delayed tasks.
//!
//! Reconnect and liveness timers go through [`Scheduler`] so the connection
//! logic never touches wall-clock time directly. Production code uses
//! [`TokioScheduler`]; tests drive a [`ManualScheduler`] by hand.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lock;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay unless its handle is cancelled first.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancels a scheduled task. Dropping the handle does *not* cancel it.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancel: CancellationToken,
}

impl TimerHandle {
    fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Scheduler backed by `tokio::time::sleep` on a runtime handle.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime the caller is running on. Panics outside a runtime.
    pub fn from_current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let token = handle.cancel.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        task();
                    }
                }
            }
        });
        handle
    }
}

struct PendingTask {
    due: Duration,
    seq: u64,
    handle: TimerHandle,
    task: Task,
}

#[derive(Default)]
struct VirtualClock {
    now: Duration,
    next_seq: u64,
    pending: Vec<PendingTask>,
}

/// Deterministic scheduler with a virtual clock that only moves on
/// [`advance`](ManualScheduler::advance).
///
/// Tasks due at the same instant run in scheduling order. Tasks run without
/// the clock lock held, so they may schedule further work; anything that
/// falls due inside the advanced window runs in the same call.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    clock: Arc<Mutex<VirtualClock>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock.
    pub fn now(&self) -> Duration {
        lock(&self.clock).now
    }

    /// Number of scheduled tasks that have neither run nor been cancelled.
    pub fn pending(&self) -> usize {
        lock(&self.clock)
            .pending
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    pub fn advance(&self, by: Duration) {
        let target = lock(&self.clock).now + by;
        while let Some(task) = self.pop_due(target) {
            task();
        }
        lock(&self.clock).now = target;
    }

    fn pop_due(&self, target: Duration) -> Option<Task> {
        let mut clock = lock(&self.clock);
        clock.pending.retain(|t| !t.handle.is_cancelled());
        let index = clock
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let next = clock.pending.swap_remove(index);
        clock.now = next.due;
        Some(next.task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut clock = lock(&self.clock);
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now + delay;
        clock.pending.push(PendingTask {
            due,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}
