//! Worker pool for member requests.
//!
//! A pool of named threads drains a FIFO queue. Submission is refused once
//! the queue is full or the pool is shut down, so a burst of federated
//! requests cannot grow memory without bound.
//!
//! Member calls cannot be cancelled. When the control layer gives up on a
//! call that is already running it [detaches](FederationScheduler::detach)
//! the task: a replacement worker starts so the hung call no longer holds
//! pool capacity, and the worker stuck in the call retires once the call
//! returns. At most `max_detached` calls are covered at once.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

use cohort_core::{CohortError, CohortResult};

/// Error returned when a task cannot be queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The queue is at capacity
    #[error("federation scheduler queue is full")]
    Backpressure,
    /// The pool has been shut down
    #[error("federation scheduler is shut down")]
    ShutDown,
}

impl From<SubmitError> for CohortError {
    fn from(e: SubmitError) -> Self {
        CohortError::repository_error(e.to_string())
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Member requests queued but not yet picked up
    pub queue_depth: usize,
    /// Member requests a worker is running right now, detached ones excluded
    pub active_tasks: usize,
    /// Member requests finished, panicked ones included
    pub tasks_completed: u64,
    /// Detached member requests still running
    pub detached_tasks: usize,
    /// Configured size of the pool
    pub worker_count: usize,
    /// Worker threads alive, replacements included
    pub live_workers: usize,
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DETACHED: u8 = 2;
const DONE: u8 = 3;

#[derive(Debug)]
struct TaskState {
    phase: AtomicU8,
    worker: AtomicUsize,
}

/// Handle on one submitted task
#[derive(Debug, Clone)]
pub struct TaskTicket {
    state: Arc<TaskState>,
}

impl TaskTicket {
    /// True once a worker has picked the task up
    pub fn is_started(&self) -> bool {
        self.state.phase.load(Ordering::Acquire) != QUEUED
    }

    /// True once the task has returned
    pub fn is_done(&self) -> bool {
        self.state.phase.load(Ordering::Acquire) == DONE
    }
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolShared {
    queue: Mutex<VecDeque<(Task, Arc<TaskState>)>>,
    task_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    max_queue_depth: usize,
    tasks_completed: AtomicU64,
    num_threads: usize,
    max_detached: usize,
    detached: AtomicUsize,
    live_workers: AtomicUsize,
    next_worker: AtomicUsize,
}

impl PoolShared {
    /// Retire the calling worker if the pool holds more free workers than
    /// configured
    fn try_retire(&self) -> bool {
        self.live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                let wanted = self.num_threads + self.detached.load(Ordering::Acquire);
                (live > wanted).then_some(live - 1)
            })
            .is_ok()
    }

    fn notify_if_idle(&self) {
        if self.active_tasks.load(Ordering::Acquire) == 0
            && self.queue_depth.load(Ordering::Acquire) == 0
        {
            let _queue = self.queue.lock();
            self.idle.notify_all();
        }
    }
}

/// Pool of worker threads issuing member requests
pub struct FederationScheduler {
    inner: Arc<PoolShared>,
    workers: Mutex<Vec<(usize, JoinHandle<()>)>>,
}

impl std::fmt::Debug for FederationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl FederationScheduler {
    /// Start `num_threads` workers named `cohort-fed-0`, `cohort-fed-1`, ...
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for zero threads or a zero queue, and
    /// `RepositoryError` if a worker thread cannot be spawned.
    pub fn new(num_threads: usize, max_queue_depth: usize, max_detached: usize) -> CohortResult<Self> {
        if num_threads == 0 || max_queue_depth == 0 {
            return Err(CohortError::invalid_parameter(
                "federation scheduler needs at least one worker and one queue slot",
            ));
        }
        let inner = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            task_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            max_queue_depth,
            tasks_completed: AtomicU64::new(0),
            num_threads,
            max_detached,
            detached: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(0),
            next_worker: AtomicUsize::new(0),
        });

        let scheduler = Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(num_threads)),
        };
        for _ in 0..num_threads {
            if let Err(e) = scheduler.spawn_worker() {
                scheduler.shutdown();
                return Err(e);
            }
        }
        debug!(
            workers = num_threads,
            max_queue_depth, max_detached, "federation scheduler started"
        );
        Ok(scheduler)
    }

    fn spawn_worker(&self) -> CohortResult<()> {
        let index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        self.inner.live_workers.fetch_add(1, Ordering::AcqRel);
        let spawned = std::thread::Builder::new()
            .name(format!("cohort-fed-{}", index))
            .spawn(move || worker_loop(&inner, index));
        match spawned {
            Ok(handle) => {
                self.workers.lock().push((index, handle));
                Ok(())
            }
            Err(e) => {
                self.inner.live_workers.fetch_sub(1, Ordering::AcqRel);
                Err(CohortError::repository_error(format!(
                    "failed to spawn federation worker: {}",
                    e
                )))
            }
        }
    }

    /// Queue a task.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<TaskTicket, SubmitError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }
        let state = Arc::new(TaskState {
            phase: AtomicU8::new(QUEUED),
            worker: AtomicUsize::new(usize::MAX),
        });
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(SubmitError::Backpressure);
            }
            queue.push_back((Box::new(work), Arc::clone(&state)));
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
        }
        self.inner.task_ready.notify_one();
        Ok(TaskTicket { state })
    }

    /// Stop counting a running task against the pool.
    ///
    /// Starts a replacement worker and forgets the stuck worker's handle, so
    /// neither [`drain`](Self::drain) nor [`shutdown`](Self::shutdown) waits
    /// for the call. Returns false if the task is not running or the
    /// detach limit is reached.
    pub fn detach(&self, ticket: &TaskTicket) -> bool {
        let max = self.inner.max_detached;
        let reserved = self
            .inner
            .detached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1));
        if reserved.is_err() {
            warn!(
                max_detached = max,
                "detach limit reached; a stuck member call keeps its worker"
            );
            return false;
        }
        if ticket
            .state
            .phase
            .compare_exchange(RUNNING, DETACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.inner.detached.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        self.inner.active_tasks.fetch_sub(1, Ordering::AcqRel);
        self.inner.notify_if_idle();

        let worker = ticket.state.worker.load(Ordering::Acquire);
        self.workers.lock().retain(|(index, _)| *index != worker);
        if let Err(e) = self.spawn_worker() {
            error!("could not replace worker stuck in a member call: {}", e);
        } else {
            debug!(worker, "replaced worker stuck in a member call");
        }
        true
    }

    /// Wait for the pool to go idle: nothing queued, nothing running that
    /// has not been detached
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Stop accepting work, let workers finish the queue, then join them.
    ///
    /// Workers stuck in detached calls are not joined.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            // Held so a worker between its shutdown check and wait() cannot miss the notify
            let _queue = self.inner.queue.lock();
            self.inner.task_ready.notify_all();
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for (_, handle) in workers {
            let _ = handle.join();
        }
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            detached_tasks: self.inner.detached.load(Ordering::Relaxed),
            worker_count: self.inner.num_threads,
            live_workers: self.inner.live_workers.load(Ordering::Relaxed),
        }
    }
}

impl Drop for FederationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks a task finished when dropped, panicking tasks included
struct InFlight<'a> {
    inner: &'a PoolShared,
    state: &'a TaskState,
}

impl<'a> Drop for InFlight<'a> {
    fn drop(&mut self) {
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if self.state.phase.swap(DONE, Ordering::AcqRel) == DETACHED {
            self.inner.detached.fetch_sub(1, Ordering::AcqRel);
        } else {
            self.inner.active_tasks.fetch_sub(1, Ordering::AcqRel);
            self.inner.notify_if_idle();
        }
    }
}

fn worker_loop(inner: &PoolShared, index: usize) {
    loop {
        let (task, state) = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(next) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break next;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    inner.live_workers.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
                inner.task_ready.wait(&mut queue);
            }
        };
        state.worker.store(index, Ordering::Release);
        state.phase.store(RUNNING, Ordering::Release);

        {
            let _in_flight = InFlight {
                inner,
                state: &state,
            };
            // Member calls are already wrapped by the control layer; this keeps
            // the worker alive if anything else panics.
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
                error!(
                    "federation task panicked: {:?}",
                    e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
                );
            }
        }

        if inner.try_retire() {
            debug!(worker = index, "surplus federation worker retired");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    fn pool(threads: usize, queue: usize) -> FederationScheduler {
        FederationScheduler::new(threads, queue, 8).unwrap()
    }

    #[test]
    fn test_submit_and_drain() {
        let scheduler = pool(2, 4096);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            scheduler
                .submit(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        scheduler.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(scheduler.stats().worker_count, 2);
    }

    #[test]
    fn test_fifo_with_single_worker() {
        let scheduler = pool(1, 4096);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        scheduler
            .submit(move || {
                b.wait();
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            scheduler.submit(move || o.lock().push(i)).unwrap();
        }
        barrier.wait();
        scheduler.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_backpressure() {
        let scheduler = pool(1, 2);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        scheduler
            .submit(move || {
                b.wait();
            })
            .unwrap();
        // Let the worker take the blocking task off the queue
        std::thread::sleep(Duration::from_millis(50));

        scheduler.submit(|| {}).unwrap();
        scheduler.submit(|| {}).unwrap();
        assert_eq!(scheduler.submit(|| {}).unwrap_err(), SubmitError::Backpressure);

        barrier.wait();
        scheduler.drain();
    }

    #[test]
    fn test_panicking_task_does_not_kill_worker() {
        let scheduler = pool(1, 16);
        scheduler.submit(|| panic!("connector blew up")).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        scheduler.submit(move || r.store(true, Ordering::Release)).unwrap();
        scheduler.drain();
        assert!(ran.load(Ordering::Acquire));
    }

    #[test]
    fn test_submit_after_shutdown_is_refused() {
        let scheduler = pool(1, 16);
        scheduler.shutdown();
        assert_eq!(scheduler.submit(|| {}).unwrap_err(), SubmitError::ShutDown);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(FederationScheduler::new(0, 16, 8).is_err());
        assert!(FederationScheduler::new(1, 0, 8).is_err());
    }

    // ========================================================================
    // Detached tasks
    // ========================================================================

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_detached_task_frees_its_worker() {
        let scheduler = pool(1, 16);
        let release = Arc::new(Barrier::new(2));
        let r = Arc::clone(&release);
        let stuck = scheduler.submit(move || {
            r.wait();
        })
        .unwrap();
        wait_until(|| stuck.is_started());
        assert!(scheduler.detach(&stuck));
        assert_eq!(scheduler.stats().detached_tasks, 1);
        assert_eq!(scheduler.stats().live_workers, 2);

        // The replacement worker runs new work while the stuck one waits
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.submit(move || flag.store(true, Ordering::Release)).unwrap();
        scheduler.drain();
        assert!(ran.load(Ordering::Acquire));

        // Once the call returns the surplus worker retires
        release.wait();
        wait_until(|| stuck.is_done());
        wait_until(|| scheduler.stats().live_workers == 1);
        assert_eq!(scheduler.stats().detached_tasks, 0);
    }

    #[test]
    fn test_detach_needs_a_running_task() {
        let scheduler = pool(1, 16);
        let done = scheduler.submit(|| {}).unwrap();
        scheduler.drain();
        wait_until(|| done.is_done());
        assert!(!scheduler.detach(&done));
        assert_eq!(scheduler.stats().live_workers, 1);
    }

    #[test]
    fn test_detach_limit() {
        let scheduler = FederationScheduler::new(1, 16, 0).unwrap();
        let release = Arc::new(Barrier::new(2));
        let r = Arc::clone(&release);
        let stuck = scheduler.submit(move || {
            r.wait();
        })
        .unwrap();
        wait_until(|| stuck.is_started());
        assert!(!scheduler.detach(&stuck));
        assert_eq!(scheduler.stats().live_workers, 1);
        release.wait();
        scheduler.drain();
    }
}
