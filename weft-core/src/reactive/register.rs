//! Mutable Registers
//!
//! A Register is the mutable scalar source of truth. Writes update the
//! value in place immediately; the change notification is coalesced
//! through the scheduler, so several synchronous writes inside one flush
//! produce a single fire carrying the final value.
//!
//! # Ownership
//!
//! A register is mutated only by its owner (the construction site or a
//! process holding it as a step). Downstream readers see it through
//! [`Register::sentinel`], which exposes reads and the change channel
//! but no mutators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::dispose::Disposer;
use super::event::EventChannel;
use super::scheduler::Scheduler;
use super::sentinel::Sentinel;
use crate::error::WeftError;

struct RegisterInner<T> {
    value: RwLock<T>,
    changed: EventChannel<T>,
    scheduler: Scheduler,
    /// Set while a change fire is queued but not yet delivered.
    pending: AtomicBool,
    disposed: AtomicBool,
}

/// A mutable cell. Cheap-clone handle; clones share the same value and
/// change channel.
pub struct Register<T> {
    inner: Arc<RegisterInner<T>>,
}

impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Register<T> {
    /// Create a register on the process-wide scheduler.
    pub fn new(value: T) -> Self {
        Self::new_in(&Scheduler::global(), value)
    }

    /// Create a register on an explicit scheduler.
    pub fn new_in(scheduler: &Scheduler, value: T) -> Self {
        Self {
            inner: Arc::new(RegisterInner {
                value: RwLock::new(value),
                changed: EventChannel::new(),
                scheduler: scheduler.clone(),
                pending: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Current value.
    ///
    /// # Panics
    ///
    /// Panics if the register was disposed.
    pub fn get(&self) -> T {
        assert!(!self.is_disposed(), "register read after dispose");
        self.inner.value.read().clone()
    }

    /// Replace the value and queue one change fire. Consecutive writes
    /// before the queued fire runs coalesce into a single fire carrying
    /// the value current at flush time.
    ///
    /// # Panics
    ///
    /// Panics if the register was disposed. Use [`Register::try_set`]
    /// for the fallible form.
    pub fn set(&self, value: T) {
        self.try_set(value)
            .expect("register written after dispose");
    }

    /// Fallible [`Register::set`].
    pub fn try_set(&self, value: T) -> Result<(), WeftError> {
        if self.is_disposed() {
            return Err(WeftError::Disposed);
        }
        *self.inner.value.write() = value;
        self.schedule_fire();
        Ok(())
    }

    /// Mutate the value in place, then queue a change fire.
    ///
    /// # Panics
    ///
    /// Panics if the register was disposed.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut T),
    {
        assert!(!self.is_disposed(), "register written after dispose");
        mutate(&mut *self.inner.value.write());
        self.schedule_fire();
    }

    /// Replace the value and return an undo handle that restores the
    /// previous value when disposed (a no-op once the register itself
    /// is gone).
    pub fn set_restoring(&self, value: T) -> Disposer {
        let previous = self.get();
        self.set(value);
        let register = self.clone();
        Disposer::new(move || {
            let _ = register.try_set(previous);
        })
    }

    fn schedule_fire(&self) {
        if self.inner.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!("register change queued");
        let register = self.clone();
        self.inner.scheduler.enqueue(move || {
            register.inner.pending.store(false, Ordering::SeqCst);
            if register.is_disposed() {
                return;
            }
            let value = register.inner.value.read().clone();
            register.inner.changed.emit(&value);
        });
    }

    /// The change channel. Fires with the new value, once per flush.
    pub fn changed(&self) -> EventChannel<T> {
        self.inner.changed.clone()
    }

    /// Subscribe to changes.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    /// An owning read-only view of this register: reads, the change
    /// channel, and a teardown that disposes the register. Hand this to
    /// combinators, which take ownership of what they wrap.
    pub fn sentinel(&self) -> Sentinel<T> {
        let reader = self.clone();
        let owner = self.clone();
        Sentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            Disposer::new(move || owner.dispose()),
        )
    }

    /// A non-owning view: reads and fires like [`Register::sentinel`]
    /// but tears nothing down. This is the form a tracked read of a
    /// register owned elsewhere wants — invalidating the step must not
    /// dispose the register itself.
    pub fn view(&self) -> Sentinel<T> {
        let reader = self.clone();
        Sentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            Disposer::noop(),
        )
    }

    /// Wrap this register in a constant cell whose teardown disposes the
    /// register. This is the shape a process step wants: the register
    /// handle is the step's value, and invalidating the step releases
    /// the register.
    pub fn owned(self) -> Sentinel<Register<T>> {
        let owner = self.clone();
        Sentinel::pure_owned(self, Disposer::new(move || owner.dispose()))
    }

    /// Dispose the register: the change channel is cleared and further
    /// reads and writes fail loudly. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.changed.dispose();
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Register<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Register")
            .field("value", &*self.inner.value.read())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shorthand for [`Register::new`].
pub fn cell<T: Clone + Send + Sync + 'static>(value: T) -> Register<T> {
    Register::new(value)
}
