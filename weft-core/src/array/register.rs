//! Array Registers
//!
//! The mutable source of truth for a sequence. Every structural
//! operation mutates the backing sequence in place, synthesizes exactly
//! one patch describing that edit, and appends it to a pending buffer.
//! The buffer flushes through the scheduler as a single change — one
//! patch fire carrying the edits in order, then one whole-value fire —
//! so several synchronous edits coalesce into one downstream
//! notification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use super::{ArrayChange, ArrayPatch, ArraySentinel};
use crate::error::WeftError;
use crate::reactive::{Disposer, EventChannel, Scheduler, Sentinel};

/// Pending edits per flush are almost always few.
type PatchBuffer<T> = SmallVec<[ArrayPatch<T>; 4]>;

struct ArrayRegisterInner<T> {
    value: RwLock<Vec<T>>,
    changed: EventChannel<Vec<T>>,
    patches: EventChannel<ArrayChange<T>>,
    pending: Mutex<PatchBuffer<T>>,
    scheduler: Scheduler,
    disposed: AtomicBool,
}

/// A mutable sequence cell. Cheap-clone handle; clones share the same
/// backing sequence and channels.
pub struct ArrayRegister<T> {
    inner: Arc<ArrayRegisterInner<T>>,
}

impl<T> Clone for ArrayRegister<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ArrayRegister<T> {
    /// Create an array register on the process-wide scheduler.
    pub fn new(initial: Vec<T>) -> Self {
        Self::new_in(&Scheduler::global(), initial)
    }

    /// Create an array register on an explicit scheduler.
    pub fn new_in(scheduler: &Scheduler, initial: Vec<T>) -> Self {
        Self {
            inner: Arc::new(ArrayRegisterInner {
                value: RwLock::new(initial),
                changed: EventChannel::new(),
                patches: EventChannel::new(),
                pending: Mutex::new(SmallVec::new()),
                scheduler: scheduler.clone(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Current materialized value.
    ///
    /// # Panics
    ///
    /// Panics if the register was disposed.
    pub fn get(&self) -> Vec<T> {
        assert!(!self.is_disposed(), "array register read after dispose");
        self.inner.value.read().clone()
    }

    /// Element at `index`, if present.
    pub fn get_index(&self, index: usize) -> Option<T> {
        self.inner.value.read().get(index).cloned()
    }

    /// Current length.
    pub fn len(&self) -> usize {
        self.inner.value.read().len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.value.read().is_empty()
    }

    /// Replace `start .. start + delete_count` with `items`, returning
    /// the removed run. Emits one `Splice` patch.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or the register was
    /// disposed. Use [`ArrayRegister::try_splice`] for the fallible
    /// form.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<T>) -> Vec<T> {
        self.try_splice(start, delete_count, items)
            .expect("array register splice")
    }

    /// Fallible [`ArrayRegister::splice`].
    pub fn try_splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<T>,
    ) -> Result<Vec<T>, WeftError> {
        if self.is_disposed() {
            return Err(WeftError::Disposed);
        }
        let removed = {
            let mut value = self.inner.value.write();
            if start + delete_count > value.len() {
                return Err(WeftError::SpliceOutOfBounds {
                    start,
                    delete_count,
                    len: value.len(),
                });
            }
            value
                .splice(start..start + delete_count, items.iter().cloned())
                .collect()
        };
        self.queue_patch(ArrayPatch::Splice {
            start,
            delete_count,
            inserted: items,
        });
        Ok(removed)
    }

    /// Replace the single slot at `index`. Emits one `Update` patch.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds or the register was disposed.
    pub fn set_index(&self, index: usize, value: T) {
        self.try_set_index(index, value)
            .expect("array register set_index")
    }

    /// Fallible [`ArrayRegister::set_index`].
    pub fn try_set_index(&self, index: usize, value: T) -> Result<(), WeftError> {
        if self.is_disposed() {
            return Err(WeftError::Disposed);
        }
        {
            let mut slot = self.inner.value.write();
            if index >= slot.len() {
                return Err(WeftError::IndexOutOfBounds {
                    index,
                    len: slot.len(),
                });
            }
            slot[index] = value.clone();
        }
        self.queue_patch(ArrayPatch::Update { index, value });
        Ok(())
    }

    /// Replace the whole sequence. Emits one `Splice` covering the old
    /// length.
    pub fn replace(&self, items: Vec<T>) {
        let old_len = self.len();
        let _ = self.splice(0, old_len, items);
    }

    /// Append one element.
    pub fn push(&self, value: T) {
        let len = self.len();
        let _ = self.splice(len, 0, vec![value]);
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.splice(len - 1, 1, Vec::new()).into_iter().next()
    }

    /// Prepend one element.
    pub fn unshift(&self, value: T) {
        let _ = self.splice(0, 0, vec![value]);
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        self.splice(0, 1, Vec::new()).into_iter().next()
    }

    fn queue_patch(&self, patch: ArrayPatch<T>) {
        let first = {
            let mut pending = self.inner.pending.lock();
            let first = pending.is_empty();
            pending.push(patch);
            first
        };
        if !first {
            return;
        }
        trace!("array change queued");
        let register = self.clone();
        self.inner.scheduler.enqueue(move || {
            let change: ArrayChange<T> = {
                let mut pending = register.inner.pending.lock();
                pending.drain(..).collect()
            };
            if change.is_empty() || register.is_disposed() {
                return;
            }
            register.inner.patches.emit(&change);
            let value = register.inner.value.read().clone();
            register.inner.changed.emit(&value);
        });
    }

    /// Whole-value change channel: one fire per flush.
    pub fn changed(&self) -> EventChannel<Vec<T>> {
        self.inner.changed.clone()
    }

    /// Structural patch channel: one fire per flush, patches in edit
    /// order.
    pub fn patches(&self) -> EventChannel<ArrayChange<T>> {
        self.inner.patches.clone()
    }

    /// Subscribe to whole-value changes.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&Vec<T>) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    /// An owning ordered-collection view of this register.
    pub fn array_sentinel(&self) -> ArraySentinel<T> {
        let reader = self.clone();
        let owner = self.clone();
        ArraySentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            self.inner.patches.clone(),
            Disposer::new(move || owner.dispose()),
        )
    }

    /// A non-owning ordered-collection view: reads and fires like
    /// [`ArrayRegister::array_sentinel`] but tears nothing down.
    pub fn array_view(&self) -> ArraySentinel<T> {
        let reader = self.clone();
        ArraySentinel::from_parts(
            move || reader.get(),
            self.inner.changed.clone(),
            self.inner.patches.clone(),
            Disposer::noop(),
        )
    }

    /// An owning plain cell view of the sequence (no patch channel).
    pub fn sentinel(&self) -> Sentinel<Vec<T>> {
        self.array_sentinel().sentinel()
    }

    /// A non-owning view wrapped for process tracking, like
    /// [`crate::reactive::Register::owned`]: the register handle is the
    /// step's value and invalidating the step disposes the register.
    pub fn owned(self) -> Sentinel<ArrayRegister<T>> {
        let owner = self.clone();
        Sentinel::pure_owned(self, Disposer::new(move || owner.dispose()))
    }

    /// Dispose the register: both channels are cleared and further
    /// reads and mutations fail loudly. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.patches.dispose();
        self.inner.changed.dispose();
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for ArrayRegister<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayRegister")
            .field("value", &*self.inner.value.read())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shorthand for [`ArrayRegister::new`].
pub fn array_cell<T: Clone + Send + Sync + 'static>(initial: Vec<T>) -> ArrayRegister<T> {
    ArrayRegister::new(initial)
}
