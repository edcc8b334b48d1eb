//! Fixed-rate periodic task scheduling on a bounded worker pool.
//!
//! One [`WorkerPool`] is constructed at startup and shared (via `Arc`) by
//! every graph of a domain. Each running graph owns one periodic task. All
//! workers pull from a single deadline-ordered queue; a task is present in
//! the queue at most once, so it never runs concurrently with itself, while
//! different tasks run in parallel on different workers.

use crate::config::SimulationConfig;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// The body of a periodic task.
pub type Job = Box<dyn FnMut() + Send>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool size must be nonzero")]
    ZeroWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag for one scheduled task.
///
/// The job closure keeps a clone so it can re-check the flag after acquiring
/// whatever lock guards its own state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Queue internals
// ---------------------------------------------------------------------------

struct Task {
    name: String,
    period: Duration,
    token: CancelToken,
    job: Mutex<Job>,
}

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Arc<Task>,
}

// BinaryHeap is a max-heap; invert so the earliest deadline is on top.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
    shutdown: bool,
}

impl Queue {
    fn push(&mut self, due: Instant, task: Arc<Task>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { due, seq, task });
    }
}

struct PoolShared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A bounded set of worker threads running fixed-rate periodic tasks.
///
/// Dropping the pool stops every worker and joins them; tasks still scheduled
/// are discarded without running again.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("scheduled", &self.scheduled_count())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `threads` workers.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("cellnet-worker-{index}"))
                .spawn(move || worker_loop(shared))?;
            workers.push(handle);
        }
        debug!(threads, "worker pool started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            size: threads,
        })
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self, PoolError> {
        Self::new(config.worker_threads)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of live (not cancelled) tasks currently waiting in the queue.
    /// A task that is executing right now is not counted.
    pub fn scheduled_count(&self) -> usize {
        self.shared
            .queue
            .lock()
            .heap
            .iter()
            .filter(|s| !s.task.token.is_cancelled())
            .count()
    }

    /// Schedule `job` to run every `period`, first run as soon as a worker is
    /// free. The task stops once `token` is cancelled.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        period: Duration,
        token: CancelToken,
        job: Job,
    ) -> TaskHandle {
        let task = Arc::new(Task {
            name: name.into(),
            period,
            token: token.clone(),
            job: Mutex::new(job),
        });
        let mut queue = self.shared.queue.lock();
        queue.push(Instant::now(), task);
        drop(queue);
        self.shared.wake.notify_one();
        TaskHandle {
            token,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop all workers and wait for them to exit. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
            queue.heap.clear();
        }
        self.shared.wake.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            // A job that drops the last pool reference would otherwise join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread terminated by panic");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Owner's handle to a scheduled task.
pub struct TaskHandle {
    token: CancelToken,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl TaskHandle {
    /// Prevent any future run. Does not wait for a run already in progress;
    /// callers that need that guarantee hold the lock their job takes.
    pub fn cancel(&self) {
        self.token.cancel();
        let _queue = self.shared.queue.lock();
        self.shared.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                let head = queue
                    .heap
                    .peek()
                    .map(|s| (s.due, s.task.token.is_cancelled()));
                match head {
                    None => shared.wake.wait(&mut queue),
                    Some((_, true)) => {
                        queue.heap.pop();
                    }
                    Some((due, false)) if due <= Instant::now() => {
                        if let Some(entry) = queue.heap.pop() {
                            break entry;
                        }
                    }
                    Some((due, false)) => {
                        shared.wake.wait_until(&mut queue, due);
                    }
                }
            }
        };

        let task = entry.task;
        if !task.token.is_cancelled() {
            let mut job = task.job.lock();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*job)())) {
                error!(task = %task.name, "periodic task panicked: {}", panic_message(&*payload));
            }
        }
        if task.token.is_cancelled() {
            continue;
        }

        // Fixed rate: the next slot follows the previous deadline, but an
        // overrun never produces a burst of catch-up runs.
        let now = Instant::now();
        let mut next_due = entry.due + task.period;
        if next_due < now {
            next_due = now;
        }
        let mut queue = shared.queue.lock();
        if queue.shutdown {
            return;
        }
        queue.push(next_due, task);
        drop(queue);
        shared.wake.notify_one();
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_job(counter: &Arc<AtomicU64>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        })
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(PoolError::ZeroWorkers)));
    }

    #[test]
    fn periodic_task_runs_repeatedly() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let handle = pool.schedule(
            "counter",
            Duration::from_millis(1),
            CancelToken::new(),
            counting_job(&counter),
        );
        assert!(wait_for(|| counter.load(AtomicOrdering::SeqCst) >= 3));
        handle.cancel();
    }

    #[test]
    fn cancelled_task_stops_running() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let handle = pool.schedule(
            "counter",
            Duration::from_millis(1),
            CancelToken::new(),
            counting_job(&counter),
        );
        assert!(wait_for(|| counter.load(AtomicOrdering::SeqCst) >= 1));
        handle.cancel();
        // Let any in-flight run finish.
        thread::sleep(Duration::from_millis(20));
        let after_cancel = counter.load(AtomicOrdering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(AtomicOrdering::SeqCst), after_cancel);
        assert!(handle.is_cancelled());
        assert!(wait_for(|| pool.scheduled_count() == 0));
    }

    #[test]
    fn panicking_job_keeps_its_schedule() {
        let pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&counter);
        let handle = pool.schedule(
            "flaky",
            Duration::from_millis(1),
            CancelToken::new(),
            Box::new(move || {
                let n = inner.fetch_add(1, AtomicOrdering::SeqCst);
                if n == 0 {
                    panic!("first run fails");
                }
            }),
        );
        assert!(wait_for(|| counter.load(AtomicOrdering::SeqCst) >= 3));
        handle.cancel();
    }

    #[test]
    fn independent_tasks_share_the_pool() {
        let pool = WorkerPool::new(2).unwrap();
        let a = Arc::new(AtomicU64::new(0));
        let b = Arc::new(AtomicU64::new(0));
        let ha = pool.schedule("a", Duration::from_millis(1), CancelToken::new(), counting_job(&a));
        let hb = pool.schedule("b", Duration::from_millis(1), CancelToken::new(), counting_job(&b));
        assert!(wait_for(|| {
            a.load(AtomicOrdering::SeqCst) >= 2 && b.load(AtomicOrdering::SeqCst) >= 2
        }));
        ha.cancel();
        hb.cancel();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = WorkerPool::new(3).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.scheduled_count(), 0);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
    }
}
