//! Ordered-Collection Cells
//!
//! Cells whose value is a sequence and which additionally emit
//! structural patches, so consumers can apply minimal edits instead of
//! rebuilding the whole sequence.
//!
//! # The patch model
//!
//! An [`ArrayPatch`] is either a `Splice` (replace a contiguous run) or
//! an `Update` (single-slot replace). An [`ArrayChange`] is an ordered
//! sequence of patches: applied in listed order to the previous
//! materialized value it yields exactly the new one. Patches and
//! whole-value fires are always consistent — the round-trip property is
//! what the [`apply_change`] helper exists to check and what consumers
//! rely on to keep mirrors (rendered structures, shadow copies) in sync.
//!
//! # Components
//!
//! - [`ArrayRegister`](register::ArrayRegister): the mutable source of
//!   truth.
//! - [`ArraySentinel`]: the erased handle every array combinator
//!   produces; adds a patch channel to the plain cell contract.
//! - `map_each` / `flat_map_each` / `concat_map_each` /
//!   `for_each_dispose`: per-element derivation, from pure projection to
//!   the offset-tracking flattening combinator.

mod dispose_each;
mod flatten;
mod map_each;
pub mod register;

pub use register::{array_cell, ArrayRegister};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::reactive::{Disposer, EventChannel, Sentinel};

/// One structural edit of an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArrayPatch<T> {
    /// Replace the run `start .. start + delete_count` with `inserted`.
    Splice {
        start: usize,
        delete_count: usize,
        inserted: Vec<T>,
    },
    /// Replace the single slot at `index`.
    Update { index: usize, value: T },
}

/// An ordered sequence of patches; apply in listed order.
pub type ArrayChange<T> = Vec<ArrayPatch<T>>;

/// Apply one patch to a materialized sequence.
///
/// # Panics
///
/// Panics if the patch does not fit `target`'s current length; emitters
/// guarantee their patches fit the value they fired alongside.
pub fn apply_patch<T: Clone>(target: &mut Vec<T>, patch: &ArrayPatch<T>) {
    match patch {
        ArrayPatch::Splice {
            start,
            delete_count,
            inserted,
        } => {
            let (start, delete_count) = (*start, *delete_count);
            assert!(
                start + delete_count <= target.len(),
                "splice patch out of bounds"
            );
            target.splice(start..start + delete_count, inserted.iter().cloned());
        }
        ArrayPatch::Update { index, value } => {
            target[*index] = value.clone();
        }
    }
}

/// Apply a whole change, in order.
pub fn apply_change<T: Clone>(target: &mut Vec<T>, change: &[ArrayPatch<T>]) {
    for patch in change {
        apply_patch(target, patch);
    }
}

/// An ordered-collection cell handle: a `Sentinel<Vec<T>>` with an
/// additional structural patch channel.
///
/// Cloning shares the underlying cell.
pub struct ArraySentinel<T> {
    read: Arc<dyn Fn() -> Vec<T> + Send + Sync>,
    changed: EventChannel<Vec<T>>,
    patches: EventChannel<ArrayChange<T>>,
    teardown: Disposer,
}

impl<T> Clone for ArraySentinel<T> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            changed: self.changed.clone(),
            patches: self.patches.clone(),
            teardown: self.teardown.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ArraySentinel<T> {
    /// Assemble an array cell handle from its parts.
    pub fn from_parts<R>(
        read: R,
        changed: EventChannel<Vec<T>>,
        patches: EventChannel<ArrayChange<T>>,
        teardown: Disposer,
    ) -> Self
    where
        R: Fn() -> Vec<T> + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
            changed,
            patches,
            teardown,
        }
    }

    /// Current materialized value.
    pub fn get(&self) -> Vec<T> {
        (self.read)()
    }

    /// Whole-value change channel: fires once per flush with the new
    /// materialized sequence.
    pub fn changed(&self) -> EventChannel<Vec<T>> {
        self.changed.clone()
    }

    /// Structural patch channel: fires once per flush with the ordered
    /// patches of that flush.
    pub fn patches(&self) -> EventChannel<ArrayChange<T>> {
        self.patches.clone()
    }

    /// Subscribe to whole-value changes.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&Vec<T>) + Send + Sync + 'static,
    {
        self.changed.subscribe(listener)
    }

    /// The teardown handle for this cell.
    pub fn disposer(&self) -> Disposer {
        self.teardown.clone()
    }

    /// Tear the cell down. Idempotent.
    pub fn dispose(&self) {
        self.teardown.dispose();
    }

    /// Forget patch granularity: a plain cell view of the sequence.
    /// Shares this cell's teardown.
    pub fn sentinel(&self) -> Sentinel<Vec<T>> {
        let read = Arc::clone(&self.read);
        Sentinel::from_parts(move || read(), self.changed.clone(), self.teardown.clone())
    }

    /// A non-owning plain cell view: reads and fires like
    /// [`ArraySentinel::sentinel`] but tears nothing down. This is the
    /// form a tracked read of a collection owned elsewhere wants.
    pub fn view(&self) -> Sentinel<Vec<T>> {
        let read = Arc::clone(&self.read);
        Sentinel::from_parts(move || read(), self.changed.clone(), Disposer::noop())
    }

    /// Derive an array cell by mapping each element through `func`.
    /// Every incoming patch translates to an equivalent outgoing patch.
    pub fn map_each<U, F>(self, func: F) -> ArraySentinel<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        map_each::map_each(self, func)
    }

    /// Derive an array cell by mapping each element through a
    /// cell-producing function; each element contributes one output
    /// slot that follows its cell's changes.
    pub fn flat_map_each<U, F>(self, func: F) -> ArraySentinel<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Sentinel<U> + Send + Sync + 'static,
    {
        flatten::flat_map_each(self, func)
    }

    /// Derive a flattened array cell: each element maps to a cell
    /// holding a sub-sequence, and the output is their concatenation,
    /// maintained incrementally through an offset table.
    pub fn concat_map_each<U, F>(self, func: F) -> ArraySentinel<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Sentinel<Vec<U>> + Send + Sync + 'static,
    {
        flatten::concat_map_each(self, func)
    }

    /// Bind a resource constructor to each element. Elements removed or
    /// replaced by a patch have their resources disposed in the index
    /// order the patch removed them.
    pub fn for_each_dispose<F>(self, func: F) -> Disposer
    where
        F: Fn(&T) -> Disposer + Send + Sync + 'static,
    {
        dispose_each::for_each_dispose(self, func)
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for ArraySentinel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArraySentinel")
            .field("value", &self.get())
            .field("disposed", &self.teardown.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_patch_splices() {
        let mut target = vec![1, 2, 3];
        apply_patch(
            &mut target,
            &ArrayPatch::Splice {
                start: 1,
                delete_count: 1,
                inserted: vec![9, 10],
            },
        );
        assert_eq!(target, vec![1, 9, 10, 3]);
    }

    #[test]
    fn apply_patch_updates() {
        let mut target = vec![1, 2, 3];
        apply_patch(&mut target, &ArrayPatch::Update { index: 2, value: 7 });
        assert_eq!(target, vec![1, 2, 7]);
    }

    #[test]
    fn apply_change_is_ordered() {
        let mut target = vec![1, 2, 3];
        apply_change(
            &mut target,
            &[
                ArrayPatch::Splice {
                    start: 0,
                    delete_count: 1,
                    inserted: vec![],
                },
                // Index 0 now refers to what was element 1.
                ArrayPatch::Update { index: 0, value: 5 },
            ],
        );
        assert_eq!(target, vec![5, 3]);
    }

    #[test]
    fn patch_serialization_is_tagged() {
        let patch = ArrayPatch::Splice {
            start: 1,
            delete_count: 0,
            inserted: vec![4],
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert!(json.contains("\"type\":\"splice\""));
    }
}
