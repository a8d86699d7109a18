//! Serial background work queue
//!
//! All mutation of monitor state that does not happen on the hot path is
//! handed to one dedicated worker thread. Callers on arbitrary threads post
//! jobs through a channel, the worker runs them one at a time in due order.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ANY THREAD                                                   │
//! │   scheduler.post(job) / post_delayed(token, delay, job)      │
//! │   scheduler.remove(token)   (cancel pending jobs by token)   │
//! └──────────────────────────────────────────────────────────────┘
//!                          │
//!                          │ crossbeam channel (commands, in order)
//!                          ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ WORKER THREAD                                                │
//! │   loop {                                                     │
//! │     run every job whose deadline passed (FIFO on ties)       │
//! │     recv_timeout(until next deadline)                        │
//! │   }                                                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because `remove` and `post_delayed` travel through the same channel,
//! "remove then post" is atomic with respect to the worker. [`Debouncer`]
//! builds the restart-on-every-trigger cooling pattern on top of that.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Unit of work executed on the worker thread
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned by [`Scheduler`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler has shut down")]
    ShutDown,

    #[error("sync() called from the scheduler's own worker thread")]
    Reentrant,
}

/// Identifies a group of pending jobs that can be cancelled together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskToken(u64);

enum Command {
    Post {
        token: Option<TaskToken>,
        delay: Duration,
        job: Job,
    },
    Remove(TaskToken),
    Sync(Sender<()>),
    Shutdown,
}

struct Pending {
    due: Instant,
    seq: u64,
    token: Option<TaskToken>,
    job: Job,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct Counters {
    posted: AtomicU64,
    executed: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

struct SchedulerInner {
    name: String,
    tx: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: OnceLock<ThreadId>,
    next_token: AtomicU64,
    counters: Arc<Counters>,
}

/// Cloneable handle to a serial work queue backed by one thread
///
/// # Example
///
/// ```
/// use jiffies_ledger::scheduler::Scheduler;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let scheduler = Scheduler::new("example");
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
/// scheduler.post(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();
/// scheduler.sync().unwrap();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// scheduler.shutdown();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Scheduler {
    /// Spawn the worker thread and return a handle to it
    pub fn new(name: &str) -> Self {
        let (tx, rx) = channel::unbounded();
        let counters = Arc::new(Counters::default());
        let inner = Arc::new(SchedulerInner {
            name: name.to_string(),
            tx,
            worker: Mutex::new(None),
            worker_id: OnceLock::new(),
            next_token: AtomicU64::new(1),
            counters: counters.clone(),
        });

        let spawned = thread::Builder::new()
            .name(format!("ledger-{}", name))
            .spawn(move || Self::worker(rx, counters));
        match spawned {
            Ok(handle) => {
                let _ = inner.worker_id.set(handle.thread().id());
                *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(e) => {
                // Commands will fail with ShutDown once the receiver is gone
                tracing::warn!("failed to spawn scheduler thread {}: {}", name, e);
            }
        }

        Scheduler { inner }
    }

    /// Allocate a fresh token for grouping cancellable jobs
    pub fn new_token(&self) -> TaskToken {
        TaskToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Run `job` on the worker thread as soon as possible
    pub fn post<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Post {
            token: None,
            delay: Duration::ZERO,
            job: Box::new(job),
        })
    }

    /// Run `job` after `delay`, cancellable through `token`
    pub fn post_delayed<F>(
        &self,
        token: TaskToken,
        delay: Duration,
        job: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Post {
            token: Some(token),
            delay,
            job: Box::new(job),
        })
    }

    /// Cancel every pending job posted under `token`
    pub fn remove(&self, token: TaskToken) -> Result<(), SchedulerError> {
        self.send(Command::Remove(token))
    }

    /// Block until every job that was due when this call was made has run
    ///
    /// Delayed jobs whose deadline lies in the future are not waited for.
    pub fn sync(&self) -> Result<(), SchedulerError> {
        if self.is_worker_thread() {
            return Err(SchedulerError::Reentrant);
        }
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.send(Command::Sync(ack_tx))?;
        ack_rx.recv().map_err(|_| SchedulerError::ShutDown)
    }

    /// True when called from inside a job
    pub fn is_worker_thread(&self) -> bool {
        self.inner.worker_id.get() == Some(&thread::current().id())
    }

    /// Stop the worker; pending jobs are dropped without running
    pub fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown);
        self.inner.join_worker();
    }

    /// Snapshot of queue counters
    pub fn stats(&self) -> SchedulerStats {
        let c = &self.inner.counters;
        SchedulerStats {
            posted: c.posted.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        if matches!(command, Command::Post { .. }) {
            self.inner.counters.posted.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .tx
            .send(command)
            .map_err(|_| SchedulerError::ShutDown)
    }

    fn worker(rx: Receiver<Command>, counters: Arc<Counters>) {
        let mut queue: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
        let mut seq: u64 = 0;

        loop {
            Self::run_due(&mut queue, &counters);

            let command = match queue.peek() {
                Some(Reverse(next)) => {
                    let wait = next.due.saturating_duration_since(Instant::now());
                    rx.recv_timeout(wait)
                }
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match command {
                Ok(Command::Post { token, delay, job }) => {
                    seq += 1;
                    queue.push(Reverse(Pending {
                        due: Instant::now() + delay,
                        seq,
                        token,
                        job,
                    }));
                }
                Ok(Command::Remove(token)) => {
                    let before = queue.len();
                    queue.retain(|Reverse(p)| p.token != Some(token));
                    let removed = (before - queue.len()) as u64;
                    counters.cancelled.fetch_add(removed, Ordering::Relaxed);
                }
                Ok(Command::Sync(ack)) => {
                    Self::run_due(&mut queue, &counters);
                    let _ = ack.send(());
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        tracing::debug!("scheduler worker exiting, {} jobs dropped", queue.len());
    }

    fn run_due(queue: &mut BinaryHeap<Reverse<Pending>>, counters: &Counters) {
        let now = Instant::now();
        while queue.peek().is_some_and(|Reverse(p)| p.due <= now) {
            let Some(Reverse(pending)) = queue.pop() else {
                break;
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(pending.job));
            counters.executed.fetch_add(1, Ordering::Relaxed);
            if outcome.is_err() {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!("scheduled job panicked; worker keeps running");
            }
        }
    }
}

impl SchedulerInner {
    fn join_worker(&self) {
        // A job dropping the last handle would otherwise join itself
        if self.worker_id.get() == Some(&thread::current().id()) {
            return;
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        self.join_worker();
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub posted: u64,
    pub executed: u64,
    pub cancelled: u64,
    pub panicked: u64,
}

/// Delayed job that restarts its countdown on every trigger
///
/// Used for cooling: bursts of triggers collapse into a single run
/// `delay` after the last one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    scheduler: Scheduler,
    token: TaskToken,
    delay: Duration,
}

impl Debouncer {
    pub fn new(scheduler: Scheduler, delay: Duration) -> Self {
        let token = scheduler.new_token();
        Debouncer {
            scheduler,
            token,
            delay,
        }
    }

    /// Cancel the pending run (if any) and schedule `job` after the delay
    pub fn trigger<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.remove(self.token)?;
        self.scheduler.post_delayed(self.token, self.delay, job)
    }

    /// Drop the pending run without executing it
    pub fn cancel(&self) -> Result<(), SchedulerError> {
        self.scheduler.remove(self.token)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
