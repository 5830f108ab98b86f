//! Delayed task scheduling (retry re-invocation).
//!
//! - [`ThreadScheduler`]: one background thread draining a timer heap
//! - [`ManualScheduler`]: records tasks and runs them on demand (deterministic tests)

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

/// A fire-and-forget unit of work.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    ShutDown,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(String),
}

pub trait TaskScheduler: Send + Sync {
    /// Run `task` once, no earlier than `delay` from now.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), SchedulerError>;
}

impl<S> TaskScheduler for Arc<S>
where
    S: TaskScheduler + ?Sized,
{
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), SchedulerError> {
        (**self).schedule(delay, task)
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub executed: u64,
    pub panicked: u64,
    pub pending: usize,
}

enum Command {
    Schedule { due: Instant, task: ScheduledTask },
    Shutdown,
}

struct Timer {
    due: Instant,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: BinaryHeap is a max-heap and we want the earliest timer on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Background-thread scheduler.
///
/// Tasks run sequentially on the scheduler thread. A panicking task is logged and
/// does not take the thread down. Tasks still pending at shutdown are dropped.
pub struct ThreadScheduler {
    name: String,
    tx: mpsc::Sender<Command>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl ThreadScheduler {
    pub fn spawn(name: impl Into<String>) -> Result<Self, SchedulerError> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Command>();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let stats_clone = stats.clone();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || scheduler_loop(&thread_name, rx, stats_clone))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;

        Ok(Self {
            name,
            tx,
            join: Mutex::new(Some(join)),
            stats,
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the worker thread and wait for it (unless called from a task).
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);

        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), SchedulerError> {
        let due = Instant::now() + delay;
        self.tx
            .send(Command::Schedule { due, task })
            .map_err(|_| SchedulerError::ShutDown)?;

        let mut s = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        s.scheduled += 1;
        Ok(())
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn scheduler_loop(name: &str, rx: mpsc::Receiver<Command>, stats: Arc<Mutex<SchedulerStats>>) {
    info!(scheduler = %name, "task scheduler started");
    let mut timers: BinaryHeap<Timer> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while timers.peek().is_some_and(|t| t.due <= now) {
            let Some(timer) = timers.pop() else { break };
            run_task(name, timer, &stats);
        }

        {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.pending = timers.len();
        }

        let next = match timers.peek() {
            Some(t) => rx.recv_timeout(t.due.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match next {
            Ok(Command::Schedule { due, task }) => {
                timers.push(Timer { due, seq, task });
                seq += 1;
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!(scheduler = %name, dropped = timers.len(), "task scheduler stopped");
}

fn run_task(name: &str, timer: Timer, stats: &Mutex<SchedulerStats>) {
    debug!(scheduler = %name, seq = timer.seq, "running scheduled task");
    let outcome = catch_unwind(AssertUnwindSafe(timer.task));

    let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
    s.executed += 1;
    if outcome.is_err() {
        s.panicked += 1;
        error!(scheduler = %name, seq = timer.seq, "scheduled task panicked");
    }
}

/// Records scheduled tasks instead of running them; tests drive time by hand.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, ScheduledTask)>>,
    history: Mutex<Vec<Duration>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay ever passed to `schedule`, in call order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run the tasks queued right now. Tasks they schedule wait for the next call.
    pub fn run_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let n = tasks.len();
        for (_, task) in tasks {
            task();
        }
        n
    }

    /// Keep running rounds until nothing is queued or `max_rounds` is reached.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_rounds {
            let n = self.run_pending();
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .field("history", &self.scheduled_delays())
            .finish()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), SchedulerError> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((delay, task));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn thread_scheduler_runs_tasks_in_due_order() {
        let scheduler = ThreadScheduler::spawn("test-scheduler").unwrap();
        let (tx, rx) = mpsc::channel();

        for (label, delay_ms) in [("late", 60u64), ("early", 10)] {
            let tx = tx.clone();
            scheduler
                .schedule(
                    Duration::from_millis(delay_ms),
                    Box::new(move || {
                        let _ = tx.send(label);
                    }),
                )
                .unwrap();
        }

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((first, second), ("early", "late"));

        scheduler.shutdown();
        assert_eq!(scheduler.stats().executed, 2);
    }

    #[test]
    fn panicking_task_does_not_stop_the_scheduler() {
        let scheduler = ThreadScheduler::spawn("panic-scheduler").unwrap();
        let (tx, rx) = mpsc::channel();

        scheduler
            .schedule(Duration::ZERO, Box::new(|| panic!("boom")))
            .unwrap();
        scheduler
            .schedule(
                Duration::from_millis(5),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.shutdown();
        assert_eq!(scheduler.stats().panicked, 1);
    }

    #[test]
    fn schedule_after_shutdown_fails() {
        let scheduler = ThreadScheduler::spawn("closed-scheduler").unwrap();
        scheduler.shutdown();
        let err = scheduler
            .schedule(Duration::ZERO, Box::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ShutDown));
    }

    #[test]
    fn manual_scheduler_runs_only_on_demand() {
        let scheduler = Arc::new(ManualScheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let inner = scheduler.clone();
        let counter = runs.clone();
        scheduler
            .schedule(
                Duration::from_secs(5),
                Box::new(move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    let counter = counter.clone();
                    let _ = inner.schedule(
                        Duration::from_secs(10),
                        Box::new(move || {
                            counter.fetch_add(1, AtomicOrdering::SeqCst);
                        }),
                    );
                }),
            )
            .unwrap();

        assert_eq!(runs.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.run_until_idle(10), 1);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(
            scheduler.scheduled_delays(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }
}
