//! Batching Scheduler
//!
//! A single FIFO work queue with a re-entrancy guard. Every external
//! mutation (register set, array splice, record field application,
//! process invalidation) funnels its notification through a scheduler
//! job; derived cells then propagate synchronously inside the running
//! flush.
//!
//! # How a flush works
//!
//! 1. `enqueue` appends the job to the tail.
//!
//! 2. If a flush is already in progress, that is all: the enclosing
//!    flush loop will reach the job. This is what prevents unbounded
//!    call-stack growth from cascades of synchronous change propagation.
//!
//! 3. Otherwise the caller becomes the flush loop: run jobs from the
//!    front until the queue is empty. Jobs enqueued meanwhile are
//!    appended, never run out of band, so completion order is exactly
//!    enqueue order.
//!
//! The running flag is cleared on every exit path, including a panic in
//! a job, so a poisoned cascade cannot wedge the queue forever.
//!
//! # Ordering guarantee
//!
//! All effects caused transitively by one external mutation drain before
//! control returns to the caller of that mutation; a second mutation
//! issued from inside a queued job is appended and processed after the
//! first mutation's full cascade.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::trace;

type Job = Box<dyn FnOnce() + Send>;

struct SchedulerInner {
    queue: Mutex<VecDeque<Job>>,
    running: AtomicBool,
}

/// The FIFO batching queue. Cheap-clone handle; clones share the queue.
///
/// Constructors of source cells and processes hold one of these,
/// defaulting to [`Scheduler::global`]. There is no cancellation: once
/// enqueued, a job always runs, so job bodies re-check that their target
/// still exists.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Clears the running flag even when a job panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    /// Create an independent scheduler with its own queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide default instance used by constructors that are
    /// not given an explicit scheduler.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<Scheduler> = OnceLock::new();
        GLOBAL.get_or_init(Scheduler::new).clone()
    }

    /// Append a job. If no flush is in progress the caller becomes the
    /// flush loop and the job (and everything it transitively enqueues)
    /// completes before `enqueue` returns.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(Box::new(job));

        if self.inner.running.swap(true, Ordering::SeqCst) {
            // An enclosing flush loop is active; it will reach the job.
            trace!("job deferred to active flush");
            return;
        }

        let _guard = RunningGuard(&self.inner.running);
        loop {
            let job = self.inner.queue.lock().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
        trace!("flush complete");
    }

    /// Number of jobs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn jobs_run_before_enqueue_returns() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        scheduler.enqueue(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn nested_enqueues_append_in_fifo_order() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_outer = log.clone();
        let sched = scheduler.clone();
        scheduler.enqueue(move || {
            log_outer.lock().push("first");

            let log_a = log_outer.clone();
            sched.enqueue(move || log_a.lock().push("third"));

            // Enqueued during the flush: appended, not run inline.
            log_outer.lock().push("second");
        });

        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn cascades_complete_in_enqueue_order() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let sched = scheduler.clone();
        let log_root = log.clone();
        scheduler.enqueue(move || {
            for tag in [1, 2, 3] {
                let log_job = log_root.clone();
                let sched_job = sched.clone();
                sched.enqueue(move || {
                    log_job.lock().push(format!("job{tag}"));
                    let log_follow = log_job.clone();
                    sched_job.enqueue(move || {
                        log_follow.lock().push(format!("follow{tag}"));
                    });
                });
            }
        });

        assert_eq!(
            *log.lock(),
            vec!["job1", "job2", "job3", "follow1", "follow2", "follow3"]
        );
    }

    #[test]
    fn running_flag_clears_after_a_panicking_job() {
        let scheduler = Scheduler::new();

        let sched = scheduler.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            sched.enqueue(|| panic!("boom"));
        }));
        assert!(result.is_err());

        // The queue is usable again.
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        scheduler.enqueue(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
