//! Flattening Array Combinators
//!
//! Per-element derivation where each element is watched through a cell
//! of its own.
//!
//! # `flat_map_each`
//!
//! Each source element maps to one cell; the output has one slot per
//! element following that cell. Slots carry their *current* index in a
//! shared position marker that is renumbered on every splice, so a cell
//! firing after earlier elements were inserted or removed still updates
//! the right output slot.
//!
//! # `concat_map_each`
//!
//! Each source element maps to a cell holding a *sub-sequence*; the
//! output is their concatenation. The combinator maintains an offset
//! table of length N+1 — `offsets[i]` is the starting position of
//! element i's contribution, `offsets[N]` the flattened length. Every
//! edit (outer splice or update, or an inner cell firing on its own)
//! goes through the same motions:
//!
//! 1. translate the outer window into an output window via the table,
//! 2. splice the flattened value in that window,
//! 3. recompute the table for the affected region and shift everything
//!    after it by the length delta,
//! 4. emit one output `Splice` covering the exact replaced range.
//!
//! The table is the part worth being paranoid about: a wrong shift
//! corrupts the window of every later patch while whole values still
//! look right, so the invariant is re-checked after each edit in debug
//! builds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{ArrayChange, ArrayPatch, ArraySentinel};
use crate::reactive::{Disposer, EventChannel, Sentinel};

// ---------------------------------------------------------------------------
// flat_map_each
// ---------------------------------------------------------------------------

struct Slot<U> {
    cell: Sentinel<U>,
    sub: Disposer,
    /// Current index of this slot; renumbered on every splice.
    pos: Arc<AtomicUsize>,
}

struct SlotState<U> {
    slots: Mutex<Vec<Slot<U>>>,
    values: RwLock<Vec<U>>,
    out_changed: EventChannel<Vec<U>>,
    out_patches: EventChannel<ArrayChange<U>>,
}

fn watch_slot<U>(state: &Arc<SlotState<U>>, cell: &Sentinel<U>, pos: &Arc<AtomicUsize>) -> Disposer
where
    U: Clone + Send + Sync + 'static,
{
    let weak = Arc::downgrade(state);
    let pos = Arc::clone(pos);
    cell.changed().subscribe(move |value: &U| {
        let Some(state) = weak.upgrade() else { return };
        let index = pos.load(Ordering::SeqCst);
        let snapshot = {
            let mut values = state.values.write();
            values[index] = value.clone();
            values.clone()
        };
        state.out_patches.emit(&vec![ArrayPatch::Update {
            index,
            value: value.clone(),
        }]);
        state.out_changed.emit(&snapshot);
    })
}

pub(super) fn flat_map_each<T, U, F>(source: ArraySentinel<T>, func: F) -> ArraySentinel<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&T) -> Sentinel<U> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    let state = Arc::new(SlotState {
        slots: Mutex::new(Vec::new()),
        values: RwLock::new(Vec::new()),
        out_changed: EventChannel::new(),
        out_patches: EventChannel::new(),
    });

    {
        let mut slots = state.slots.lock();
        let mut values = state.values.write();
        for (index, item) in source.get().iter().enumerate() {
            let cell = func(item);
            let pos = Arc::new(AtomicUsize::new(index));
            values.push(cell.get());
            let sub = watch_slot(&state, &cell, &pos);
            slots.push(Slot { cell, sub, pos });
        }
    }

    let upstream_sub = {
        let state = Arc::clone(&state);
        let func = Arc::clone(&func);
        source.patches().subscribe(move |change: &ArrayChange<T>| {
            let mut translated: ArrayChange<U> = Vec::with_capacity(change.len());
            let mut retired: Vec<Slot<U>> = Vec::new();

            for patch in change {
                match patch {
                    ArrayPatch::Splice {
                        start,
                        delete_count,
                        inserted,
                    } => {
                        let (start, delete_count) = (*start, *delete_count);

                        let mut new_slots = Vec::with_capacity(inserted.len());
                        let mut new_values = Vec::with_capacity(inserted.len());
                        for (offset, item) in inserted.iter().enumerate() {
                            let cell = func(item);
                            let pos = Arc::new(AtomicUsize::new(start + offset));
                            new_values.push(cell.get());
                            let sub = watch_slot(&state, &cell, &pos);
                            new_slots.push(Slot { cell, sub, pos });
                        }

                        {
                            let mut slots = state.slots.lock();
                            retired.extend(slots.splice(start..start + delete_count, new_slots));
                            for (index, slot) in slots.iter().enumerate().skip(start) {
                                slot.pos.store(index, Ordering::SeqCst);
                            }
                        }
                        state
                            .values
                            .write()
                            .splice(start..start + delete_count, new_values.iter().cloned());

                        translated.push(ArrayPatch::Splice {
                            start,
                            delete_count,
                            inserted: new_values,
                        });
                    }
                    ArrayPatch::Update { index, value } => {
                        let index = *index;
                        let cell = func(value);
                        let new_value = cell.get();
                        let pos = Arc::new(AtomicUsize::new(index));
                        let sub = watch_slot(&state, &cell, &pos);

                        {
                            let mut slots = state.slots.lock();
                            retired.push(std::mem::replace(
                                &mut slots[index],
                                Slot { cell, sub, pos },
                            ));
                        }
                        state.values.write()[index] = new_value.clone();

                        translated.push(ArrayPatch::Update {
                            index,
                            value: new_value,
                        });
                    }
                }
            }

            // Element cells retire in the order the patches removed them.
            for slot in retired {
                slot.sub.dispose();
                slot.cell.dispose();
            }

            let snapshot = state.values.read().clone();
            state.out_patches.emit(&translated);
            state.out_changed.emit(&snapshot);
        })
    };

    let teardown = {
        let state = Arc::clone(&state);
        let upstream_sub = upstream_sub.clone();
        let upstream = source.disposer();
        Disposer::new(move || {
            upstream_sub.dispose();
            let slots = std::mem::take(&mut *state.slots.lock());
            for slot in slots.into_iter().rev() {
                slot.sub.dispose();
                slot.cell.dispose();
            }
            state.out_patches.dispose();
            state.out_changed.dispose();
            upstream.dispose();
        })
    };

    let read_state = Arc::clone(&state);
    ArraySentinel::from_parts(
        move || read_state.values.read().clone(),
        state.out_changed.clone(),
        state.out_patches.clone(),
        teardown,
    )
}

// ---------------------------------------------------------------------------
// concat_map_each
// ---------------------------------------------------------------------------

struct SeqSlot<U> {
    cell: Sentinel<Vec<U>>,
    sub: Disposer,
    pos: Arc<AtomicUsize>,
    /// Current length of this element's contribution.
    len: usize,
}

struct ConcatCore<U> {
    slots: Vec<SeqSlot<U>>,
    /// N+1 entries; `offsets[i]` is where element i's contribution
    /// starts in `flat`, `offsets[N]` is `flat.len()`.
    offsets: Vec<usize>,
    flat: Vec<U>,
}

struct ConcatState<U> {
    core: Mutex<ConcatCore<U>>,
    out_changed: EventChannel<Vec<U>>,
    out_patches: EventChannel<ArrayChange<U>>,
}

fn rebuild_offsets<U>(core: &mut ConcatCore<U>, from: usize) {
    for index in from..core.slots.len() {
        core.offsets[index + 1] = core.offsets[index] + core.slots[index].len;
    }
    check_offsets(core);
}

fn check_offsets<U>(core: &ConcatCore<U>) {
    debug_assert_eq!(core.offsets.len(), core.slots.len() + 1);
    debug_assert_eq!(core.offsets[0], 0);
    debug_assert_eq!(core.offsets[core.slots.len()], core.flat.len());
    for (index, slot) in core.slots.iter().enumerate() {
        debug_assert_eq!(
            core.offsets[index + 1] - core.offsets[index],
            slot.len,
            "offset table out of step at element {index}"
        );
    }
}

fn watch_seq<U>(
    state: &Arc<ConcatState<U>>,
    cell: &Sentinel<Vec<U>>,
    pos: &Arc<AtomicUsize>,
) -> Disposer
where
    U: Clone + Send + Sync + 'static,
{
    let weak = Arc::downgrade(state);
    let pos = Arc::clone(pos);
    cell.changed().subscribe(move |sequence: &Vec<U>| {
        let Some(state) = weak.upgrade() else { return };
        let (patch, snapshot) = {
            let mut core = state.core.lock();
            let index = pos.load(Ordering::SeqCst);
            let window_start = core.offsets[index];
            let window_end = core.offsets[index + 1];
            core.flat
                .splice(window_start..window_end, sequence.iter().cloned());
            core.slots[index].len = sequence.len();
            rebuild_offsets(&mut core, index);
            (
                ArrayPatch::Splice {
                    start: window_start,
                    delete_count: window_end - window_start,
                    inserted: sequence.clone(),
                },
                core.flat.clone(),
            )
        };
        state.out_patches.emit(&vec![patch]);
        state.out_changed.emit(&snapshot);
    })
}

pub(super) fn concat_map_each<T, U, F>(source: ArraySentinel<T>, func: F) -> ArraySentinel<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&T) -> Sentinel<Vec<U>> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    let state = Arc::new(ConcatState {
        core: Mutex::new(ConcatCore {
            slots: Vec::new(),
            offsets: vec![0],
            flat: Vec::new(),
        }),
        out_changed: EventChannel::new(),
        out_patches: EventChannel::new(),
    });

    {
        let mut core = state.core.lock();
        for (index, item) in source.get().iter().enumerate() {
            let cell = func(item);
            let sequence = cell.get();
            let pos = Arc::new(AtomicUsize::new(index));
            let sub = watch_seq(&state, &cell, &pos);
            core.slots.push(SeqSlot {
                cell,
                sub,
                pos,
                len: sequence.len(),
            });
            let next = core.offsets[index] + sequence.len();
            core.offsets.push(next);
            core.flat.extend(sequence);
        }
        check_offsets(&core);
    }

    let upstream_sub = {
        let state = Arc::clone(&state);
        let func = Arc::clone(&func);
        source.patches().subscribe(move |change: &ArrayChange<T>| {
            let mut translated: ArrayChange<U> = Vec::with_capacity(change.len());
            let mut retired: Vec<SeqSlot<U>> = Vec::new();

            for patch in change {
                // An outer update is a one-element splice on the
                // flattened output: the replacement sub-sequence may
                // have any length.
                let (start, delete_count, inserted) = match patch {
                    ArrayPatch::Splice {
                        start,
                        delete_count,
                        inserted,
                    } => (*start, *delete_count, inserted.clone()),
                    ArrayPatch::Update { index, value } => (*index, 1, vec![value.clone()]),
                };

                let mut new_slots = Vec::with_capacity(inserted.len());
                let mut new_flat = Vec::new();
                for (offset, item) in inserted.iter().enumerate() {
                    let cell = func(item);
                    let sequence = cell.get();
                    let pos = Arc::new(AtomicUsize::new(start + offset));
                    let sub = watch_seq(&state, &cell, &pos);
                    new_slots.push(SeqSlot {
                        cell,
                        sub,
                        pos,
                        len: sequence.len(),
                    });
                    new_flat.extend(sequence);
                }

                let out_patch = {
                    let mut core = state.core.lock();
                    let window_start = core.offsets[start];
                    let window_end = core.offsets[start + delete_count];

                    retired.extend(core.slots.splice(start..start + delete_count, new_slots));
                    for (index, slot) in core.slots.iter().enumerate().skip(start) {
                        slot.pos.store(index, Ordering::SeqCst);
                    }

                    core.flat
                        .splice(window_start..window_end, new_flat.iter().cloned());
                    let new_len = core.slots.len() + 1;
                    core.offsets.resize(new_len, 0);
                    rebuild_offsets(&mut core, start);

                    ArrayPatch::Splice {
                        start: window_start,
                        delete_count: window_end - window_start,
                        inserted: new_flat,
                    }
                };
                translated.push(out_patch);
            }

            for slot in retired {
                slot.sub.dispose();
                slot.cell.dispose();
            }

            let snapshot = state.core.lock().flat.clone();
            state.out_patches.emit(&translated);
            state.out_changed.emit(&snapshot);
        })
    };

    let teardown = {
        let state = Arc::clone(&state);
        let upstream_sub = upstream_sub.clone();
        let upstream = source.disposer();
        Disposer::new(move || {
            upstream_sub.dispose();
            let slots = std::mem::take(&mut state.core.lock().slots);
            for slot in slots.into_iter().rev() {
                slot.sub.dispose();
                slot.cell.dispose();
            }
            state.out_patches.dispose();
            state.out_changed.dispose();
            upstream.dispose();
        })
    };

    let read_state = Arc::clone(&state);
    ArraySentinel::from_parts(
        move || read_state.core.lock().flat.clone(),
        state.out_changed.clone(),
        state.out_patches.clone(),
        teardown,
    )
}
