//! Processes
//!
//! A Process is the incremental re-execution unit: a computation that
//! reads cells through a tracking handle, memoizing each read as an
//! ordered step, and on invalidation replays only what survives.
//!
//! # How Processes Work
//!
//! 1. The process function runs once at construction. Every
//!    `scope.track(thunk)` call evaluates its thunk, stores the
//!    resulting cell as the next step, and subscribes to its change
//!    channel.
//!
//! 2. On a later run, a `track` call whose index already has a step is
//!    a memoized hit: the thunk is not evaluated; the stored cell's
//!    current value is returned.
//!
//! 3. When a step's cell fires, a scheduler job tears down every step
//!    after it (latest first), then the fired step itself, truncates the
//!    step list there, and re-runs the function: the prefix replays as
//!    memoized hits, the tail is derived fresh. The process's own change
//!    event fires at most once per invalidation, gated by the re-fire
//!    policy.
//!
//! # Determinism contract
//!
//! Replay is sound only if the function performs the same ordered
//! sequence of tracked reads whenever upstream values are unchanged.
//! Deriving a tracked read from anything but tracked cell values (clock
//! time, ambient globals) breaks memoization in ways the runtime cannot
//! detect in general; the one cheaply detectable case — a step whose
//! value type changed between runs — fails loudly.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::dispose::Disposer;
use super::event::EventChannel;
use super::scheduler::Scheduler;
use super::sentinel::Sentinel;

/// One memoized tracked read.
struct Step {
    /// The cell produced by the thunk, erased (`Sentinel<A>`).
    cell: Box<dyn Any + Send + Sync>,
    /// Teardown for the cell's owned resources.
    teardown: Disposer,
    /// Subscription that invalidates this step when the cell fires.
    sub: Disposer,
    /// Distinguishes this step from a later step at the same index, so
    /// an already-queued invalidation job for a replaced step is a
    /// no-op.
    stamp: u64,
}

struct StepState {
    steps: Vec<Step>,
    /// Read position; reset at the start of each run.
    cursor: usize,
    next_stamp: u64,
}

struct ProcessInner<T> {
    func: Box<dyn Fn(&ProcessScope<T>) -> T + Send + Sync>,
    /// Whether a recomputed value should re-fire the change event.
    refire: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    state: Mutex<StepState>,
    value: RwLock<Option<T>>,
    changed: EventChannel<T>,
    scheduler: Scheduler,
    disposed: AtomicBool,
}

/// The tracking handle passed to a process function.
pub struct ProcessScope<T> {
    inner: Arc<ProcessInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> ProcessScope<T> {
    /// Record or replay one step.
    ///
    /// On the first run (and for every index past the memoized prefix)
    /// the thunk is evaluated, its cell stored, and the cell's change
    /// channel subscribed for invalidation. On a memoized hit the thunk
    /// is not evaluated and the stored cell's current value is
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics if the step at this index holds a different value type
    /// than the previous run produced (a determinism violation).
    pub fn track<A, F>(&self, thunk: F) -> A
    where
        A: Clone + Send + Sync + 'static,
        F: FnOnce() -> Sentinel<A>,
    {
        let index = {
            let mut state = self.inner.state.lock();
            let index = state.cursor;
            state.cursor += 1;
            index
        };

        {
            let state = self.inner.state.lock();
            if index < state.steps.len() {
                let cell = state.steps[index]
                    .cell
                    .downcast_ref::<Sentinel<A>>()
                    .unwrap_or_else(|| {
                        panic!(
                            "tracked read {index} changed value type between runs; \
                             a process function must perform the same reads in the same order"
                        )
                    });
                return cell.get();
            }
        }

        // Fresh step: evaluate outside the state lock.
        let cell = thunk();
        let value = cell.get();

        let mut state = self.inner.state.lock();
        assert_eq!(
            state.steps.len(),
            index,
            "tracked reads arrived out of order"
        );
        let stamp = state.next_stamp;
        state.next_stamp += 1;

        let sub = {
            let weak = Arc::downgrade(&self.inner);
            let scheduler = self.inner.scheduler.clone();
            cell.changed().subscribe(move |_| {
                let weak = weak.clone();
                scheduler.enqueue(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.invalidate_from(index, stamp);
                    }
                });
            })
        };

        state.steps.push(Step {
            teardown: cell.disposer(),
            cell: Box::new(cell),
            sub,
            stamp,
        });
        value
    }
}

impl<T: Clone + Send + Sync + 'static> ProcessInner<T> {
    fn run(self: &Arc<Self>) -> T {
        self.state.lock().cursor = 0;
        let scope = ProcessScope {
            inner: Arc::clone(self),
        };
        (self.func)(&scope)
    }

    /// Invalidation entry point, always reached through a scheduler
    /// job. `stamp` guards against jobs queued for a step that was
    /// truncated or replaced in the meantime — there is no job
    /// cancellation, so stale jobs must detect themselves.
    fn invalidate_from(self: &Arc<Self>, index: usize, stamp: u64) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            match state.steps.get(index) {
                Some(step) if step.stamp == stamp => {}
                _ => return,
            }

            // Tear down the suffix, latest first, then the fired step's
            // own subscription and value; the prefix stays memoized.
            while state.steps.len() > index {
                let step = state.steps.pop().expect("suffix step present");
                step.sub.dispose();
                step.teardown.dispose();
            }
        }
        debug!(step = index, "process step invalidated; re-deriving");

        let new_value = self.run();
        let should_fire = {
            let current = self.value.read();
            match current.as_ref() {
                Some(old) => (self.refire)(old, &new_value),
                None => true,
            }
        };
        *self.value.write() = Some(new_value.clone());
        if should_fire {
            self.changed.emit(&new_value);
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        while let Some(step) = state.steps.pop() {
            step.sub.dispose();
            step.teardown.dispose();
        }
        drop(state);
        self.changed.dispose();
    }
}

/// A memoized, incrementally-replayable computation. Cheap-clone
/// handle; clones share the same step list and value.
pub struct Process<T> {
    inner: Arc<ProcessInner<T>>,
}

impl<T> Clone for Process<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Process<T> {
    /// Distinctness-gated process on the process-wide scheduler: the
    /// change event re-fires only when recomputation produced a
    /// different value.
    pub fn new<F>(func: F) -> Self
    where
        T: PartialEq,
        F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
    {
        Self::new_in(&Scheduler::global(), func)
    }

    /// Distinctness-gated process on an explicit scheduler.
    pub fn new_in<F>(scheduler: &Scheduler, func: F) -> Self
    where
        T: PartialEq,
        F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
    {
        Self::with_policy(scheduler, func, |old: &T, new: &T| old != new)
    }

    /// Always-firing process on the process-wide scheduler: every
    /// invalidation re-fires, even when the recomputed value is equal.
    pub fn new_all<F>(func: F) -> Self
    where
        F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
    {
        Self::new_all_in(&Scheduler::global(), func)
    }

    /// Always-firing process on an explicit scheduler.
    pub fn new_all_in<F>(scheduler: &Scheduler, func: F) -> Self
    where
        F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
    {
        Self::with_policy(scheduler, func, |_: &T, _: &T| true)
    }

    fn with_policy<F, P>(scheduler: &Scheduler, func: F, refire: P) -> Self
    where
        F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
        P: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let inner = Arc::new(ProcessInner {
            func: Box::new(func),
            refire: Box::new(refire),
            state: Mutex::new(StepState {
                steps: Vec::new(),
                cursor: 0,
                next_stamp: 0,
            }),
            value: RwLock::new(None),
            changed: EventChannel::new(),
            scheduler: scheduler.clone(),
            disposed: AtomicBool::new(false),
        });

        let value = inner.run();
        *inner.value.write() = Some(value);
        Process { inner }
    }

    /// The last computed value.
    ///
    /// # Panics
    ///
    /// Panics if the process was disposed.
    pub fn get(&self) -> T {
        assert!(!self.is_disposed(), "process read after dispose");
        self.inner
            .value
            .read()
            .clone()
            .expect("process value is set after the first run")
    }

    /// The process's own change channel. Fires with the recomputed
    /// value, at most once per invalidation.
    pub fn changed(&self) -> EventChannel<T> {
        self.inner.changed.clone()
    }

    /// Subscribe to recomputations.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    /// An owning cell view of this process: the view's teardown
    /// disposes the process. Hand this to combinators, which take
    /// ownership of what they wrap.
    pub fn sentinel(&self) -> Sentinel<T> {
        let reader = self.clone();
        let owner = self.clone();
        Sentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            Disposer::new(move || owner.dispose()),
        )
    }

    /// A non-owning cell view: reads and fires like
    /// [`Process::sentinel`] but tears nothing down. This is the form a
    /// tracked read of a process owned elsewhere wants — invalidating
    /// the step must not dispose the producer.
    pub fn view(&self) -> Sentinel<T> {
        let reader = self.clone();
        Sentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            Disposer::noop(),
        )
    }

    /// Number of memoized steps. Exposed for inspection and tests.
    pub fn step_count(&self) -> usize {
        self.inner.state.lock().steps.len()
    }

    /// Tear down every step (latest first) and the change channel.
    /// Terminal and idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Process<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("steps", &self.step_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Distinctness-gated process. Shorthand for [`Process::new`].
pub fn process<T, F>(func: F) -> Process<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
{
    Process::new(func)
}

/// Always-firing process. Shorthand for [`Process::new_all`].
pub fn process_all<T, F>(func: F) -> Process<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
{
    Process::new_all(func)
}

/// The outermost, non-composable root of an application. The returned
/// process keeps re-deriving on invalidation like any other; callers
/// hold it for its side effects and disposal, not to track its changes
/// further.
pub fn toplevel<T, F>(func: F) -> Process<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&ProcessScope<T>) -> T + Send + Sync + 'static,
{
    Process::new(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::register::Register;
    use crate::reactive::sentinel::pure;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn runs_once_at_construction() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let process = Process::new(move |scope| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            scope.track(|| pure(21)) * 2
        });

        assert_eq!(process.get(), 42);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(process.step_count(), 1);
    }

    #[test]
    fn thunks_evaluate_at_most_once_until_invalidated() {
        let source = Register::new(1);
        let first_evals = Arc::new(AtomicI32::new(0));
        let second_evals = Arc::new(AtomicI32::new(0));

        let src = source.clone();
        let first = first_evals.clone();
        let second = second_evals.clone();
        let process = Process::new(move |scope| {
            let first = first.clone();
            let second = second.clone();
            let base = scope.track(move || {
                first.fetch_add(1, Ordering::SeqCst);
                pure(100)
            });
            let src = src.clone();
            let current = scope.track(move || {
                second.fetch_add(1, Ordering::SeqCst);
                src.view()
            });
            base + current
        });

        assert_eq!(process.get(), 101);
        assert_eq!(first_evals.load(Ordering::SeqCst), 1);
        assert_eq!(second_evals.load(Ordering::SeqCst), 1);

        // Invalidate the second step: the first replays memoized.
        source.set(2);
        assert_eq!(process.get(), 102);
        assert_eq!(first_evals.load(Ordering::SeqCst), 1);
        assert_eq!(second_evals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidation_fires_exactly_once() {
        let source = Register::new(1);

        let src = source.clone();
        let process = Process::new_all(move |scope| {
            let a = scope.track(|| pure(10));
            let src = src.clone();
            let b = scope.track(move || src.view());
            let c = scope.track(|| pure(1));
            a + b + c
        });

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = process.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(5);
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(process.get(), 16);
        assert_eq!(process.step_count(), 3);
    }

    #[test]
    fn distinct_policy_gates_refire() {
        let source = Register::new(1);

        let src = source.clone();
        let process = Process::new(move |scope| {
            let src = src.clone();
            scope.track(move || src.view()) % 2
        });

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = process.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(3); // result still 1: recomputed, not re-fired
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        source.set(4); // result 0: re-fired
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn always_policy_refires_on_equal_values() {
        let source = Register::new(1);

        let src = source.clone();
        let process = Process::new_all(move |scope| {
            let src = src.clone();
            scope.track(move || src.view()) % 2
        });

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = process.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(3); // result unchanged, fires anyway
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidated_suffix_is_torn_down_latest_first() {
        let source = Register::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let src = source.clone();
        let log_outer = log.clone();
        let process = Process::new_all(move |scope| {
            let src = src.clone();
            let trigger = scope.track(move || src.view());
            for tag in ["x", "y"] {
                let log = log_outer.clone();
                scope.track(move || {
                    let log = log.clone();
                    Sentinel::resource(Disposer::new(move || {
                        log.lock().push(format!("drop {tag}"));
                    }))
                });
            }
            trigger
        });

        assert_eq!(process.step_count(), 3);

        // Step 0 fires: steps 2 then 1 are disposed, then rebuilt.
        source.set(1);
        assert_eq!(*log.lock(), vec!["drop y", "drop x"]);
        assert_eq!(process.step_count(), 3);
    }

    #[test]
    fn steps_own_registers_created_inside() {
        let outer = Register::new(0);

        let out = outer.clone();
        let inner_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = inner_seen.clone();
        let process = Process::new_all(move |scope| {
            let out = out.clone();
            let trigger = scope.track(move || out.view());
            let inner = scope.track(|| Register::new(7).owned());
            seen.lock().push(inner.clone());
            trigger + inner.get()
        });

        assert_eq!(process.get(), 7);

        // Invalidating step 0 disposes the inner register and derives a
        // fresh one.
        outer.set(1);
        assert_eq!(process.get(), 8);

        let seen = inner_seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_disposed());
        assert!(!seen[1].is_disposed());
    }

    #[test]
    fn dispose_tears_down_all_steps_latest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_outer = log.clone();
        let process = Process::new_all(move |scope| {
            for tag in [1, 2, 3] {
                let log = log_outer.clone();
                scope.track(move || {
                    let log = log.clone();
                    Sentinel::resource(Disposer::new(move || {
                        log.lock().push(tag);
                    }))
                });
            }
        });

        process.dispose();
        assert!(process.is_disposed());
        assert_eq!(*log.lock(), vec![3, 2, 1]);
    }

    #[test]
    #[should_panic(expected = "process read after dispose")]
    fn get_after_dispose_panics() {
        let process = Process::new(|scope| scope.track(|| pure(1)));
        process.dispose();
        let _ = process.get();
    }

    #[test]
    fn processes_compose_as_cells() {
        let source = Register::new(2);

        let src = source.clone();
        let inner = Process::new(move |scope| {
            let src = src.clone();
            scope.track(move || src.view()) * 10
        });

        let outer = Process::new(move |scope| {
            let cell = inner.view();
            scope.track(move || cell) + 1
        });

        assert_eq!(outer.get(), 21);

        source.set(3);
        assert_eq!(outer.get(), 31);
    }
}
