//! Record Combination
//!
//! Builds one aggregate cell out of a record of mixed inputs: plain
//! values are copied verbatim, cell fields are read and watched. Field
//! changes are coalesced through the scheduler, so N fields changing in
//! one synchronous burst re-fire the aggregate exactly once.
//!
//! The combination takes ownership of cells passed by value: disposing
//! it tears down every field subscription and disposes the field cells.
//!
//! [`combine_list`] is the fixed-length sequence form: each slot change
//! surfaces as an `Update` patch on the aggregate's patch channel.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::dispose::Disposer;
use super::event::EventChannel;
use super::scheduler::Scheduler;
use super::sentinel::Sentinel;
use crate::array::{ArrayChange, ArrayPatch, ArraySentinel};

/// One field of a combination: either a plain value or a cell to watch.
///
/// The closed set of shapes a field can take is fixed here, at
/// construction time.
pub enum Input<V> {
    /// Copied into the aggregate verbatim; never changes.
    Plain(V),
    /// Read now and watched; ownership moves to the combination.
    Cell(Sentinel<V>),
}

/// Combine named fields into one aggregate cell on the process-wide
/// scheduler. See [`combine_record_in`].
pub fn combine_record<V>(fields: IndexMap<String, Input<V>>) -> Sentinel<IndexMap<String, V>>
where
    V: Clone + Send + Sync + 'static,
{
    combine_record_in(&Scheduler::global(), fields)
}

/// Combine named fields into one aggregate cell.
///
/// The aggregate value holds every field's current value. Each cell
/// field is subscribed; its changes are buffered and applied in one
/// scheduler job, so a synchronous burst of field changes yields one
/// aggregate fire.
pub fn combine_record_in<V>(
    scheduler: &Scheduler,
    fields: IndexMap<String, Input<V>>,
) -> Sentinel<IndexMap<String, V>>
where
    V: Clone + Send + Sync + 'static,
{
    let out: EventChannel<IndexMap<String, V>> = EventChannel::new();
    let store: Arc<RwLock<IndexMap<String, V>>> = Arc::new(RwLock::new(IndexMap::new()));
    let pending: Arc<Mutex<IndexMap<String, V>>> = Arc::new(Mutex::new(IndexMap::new()));
    let mut teardown_parts: Vec<Disposer> = Vec::new();

    for (key, input) in fields {
        match input {
            Input::Plain(value) => {
                store.write().insert(key, value);
            }
            Input::Cell(cell) => {
                store.write().insert(key.clone(), cell.get());

                let sub = {
                    let pending = Arc::clone(&pending);
                    let store = Arc::clone(&store);
                    let out = out.clone();
                    let scheduler = scheduler.clone();
                    cell.changed().subscribe(move |value: &V| {
                        let first = {
                            let mut updates = pending.lock();
                            let first = updates.is_empty();
                            updates.insert(key.clone(), value.clone());
                            first
                        };
                        if !first {
                            return;
                        }
                        let pending = Arc::clone(&pending);
                        let store = Arc::clone(&store);
                        let out = out.clone();
                        scheduler.enqueue(move || {
                            let updates = std::mem::take(&mut *pending.lock());
                            if updates.is_empty() {
                                return;
                            }
                            let snapshot = {
                                let mut aggregate = store.write();
                                for (key, value) in updates {
                                    aggregate.insert(key, value);
                                }
                                aggregate.clone()
                            };
                            out.emit(&snapshot);
                        });
                    })
                };

                teardown_parts.push(cell.disposer());
                teardown_parts.push(sub);
            }
        }
    }
    teardown_parts.push(out.disposer());

    let read_store = Arc::clone(&store);
    Sentinel::from_parts(
        move || read_store.read().clone(),
        out,
        Disposer::stacked(teardown_parts),
    )
}

/// Combine a fixed-length list of slots into an ordered-collection cell
/// on the process-wide scheduler. See [`combine_list_in`].
pub fn combine_list<V>(slots: Vec<Input<V>>) -> ArraySentinel<V>
where
    V: Clone + Send + Sync + 'static,
{
    combine_list_in(&Scheduler::global(), slots)
}

/// Combine a fixed-length list of slots into an ordered-collection
/// cell. A slot-cell change surfaces as an `Update` patch at the slot's
/// index; a burst of slot changes flushes as one change carrying the
/// patches in edit order plus one whole-value fire.
pub fn combine_list_in<V>(scheduler: &Scheduler, slots: Vec<Input<V>>) -> ArraySentinel<V>
where
    V: Clone + Send + Sync + 'static,
{
    let out_changed: EventChannel<Vec<V>> = EventChannel::new();
    let out_patches: EventChannel<ArrayChange<V>> = EventChannel::new();
    let store: Arc<RwLock<Vec<V>>> = Arc::new(RwLock::new(Vec::with_capacity(slots.len())));
    let pending: Arc<Mutex<Vec<(usize, V)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut teardown_parts: Vec<Disposer> = Vec::new();

    for (index, input) in slots.into_iter().enumerate() {
        match input {
            Input::Plain(value) => {
                store.write().push(value);
            }
            Input::Cell(cell) => {
                store.write().push(cell.get());

                let sub = {
                    let pending = Arc::clone(&pending);
                    let store = Arc::clone(&store);
                    let out_changed = out_changed.clone();
                    let out_patches = out_patches.clone();
                    let scheduler = scheduler.clone();
                    cell.changed().subscribe(move |value: &V| {
                        let first = {
                            let mut updates = pending.lock();
                            let first = updates.is_empty();
                            updates.push((index, value.clone()));
                            first
                        };
                        if !first {
                            return;
                        }
                        let pending = Arc::clone(&pending);
                        let store = Arc::clone(&store);
                        let out_changed = out_changed.clone();
                        let out_patches = out_patches.clone();
                        scheduler.enqueue(move || {
                            let updates = std::mem::take(&mut *pending.lock());
                            if updates.is_empty() {
                                return;
                            }
                            let mut change: ArrayChange<V> = Vec::with_capacity(updates.len());
                            let snapshot = {
                                let mut aggregate = store.write();
                                for (index, value) in updates {
                                    aggregate[index] = value.clone();
                                    change.push(ArrayPatch::Update { index, value });
                                }
                                aggregate.clone()
                            };
                            out_patches.emit(&change);
                            out_changed.emit(&snapshot);
                        });
                    })
                };

                teardown_parts.push(cell.disposer());
                teardown_parts.push(sub);
            }
        }
    }
    teardown_parts.push(out_patches.disposer());
    teardown_parts.push(out_changed.disposer());

    let read_store = Arc::clone(&store);
    ArraySentinel::from_parts(
        move || read_store.read().clone(),
        out_changed,
        out_patches,
        Disposer::stacked(teardown_parts),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::register::Register;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn record(entries: Vec<(&str, Input<i32>)>) -> IndexMap<String, Input<i32>> {
        entries
            .into_iter()
            .map(|(key, input)| (key.to_string(), input))
            .collect()
    }

    #[test]
    fn aggregate_holds_plain_and_cell_fields() {
        let width = Register::new(4);
        let combined = combine_record(record(vec![
            ("height", Input::Plain(3)),
            ("width", Input::Cell(width.sentinel())),
        ]));

        let value = combined.get();
        assert_eq!(value["height"], 3);
        assert_eq!(value["width"], 4);

        width.set(5);
        assert_eq!(combined.get()["width"], 5);
    }

    #[test]
    fn burst_of_field_changes_fires_once() {
        let scheduler = Scheduler::new();
        let a = Register::new_in(&scheduler, 1);
        let b = Register::new_in(&scheduler, 2);

        let combined = combine_record_in(
            &scheduler,
            record(vec![
                ("a", Input::Cell(a.sentinel())),
                ("b", Input::Cell(b.sentinel())),
            ]),
        );

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = combined.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        let (a_reg, b_reg) = (a.clone(), b.clone());
        scheduler.enqueue(move || {
            a_reg.set(10);
            b_reg.set(20);
        });

        assert_eq!(fires.load(Ordering::SeqCst), 1);
        let value = combined.get();
        assert_eq!(value["a"], 10);
        assert_eq!(value["b"], 20);
    }

    #[test]
    fn disposing_the_combination_disposes_cell_fields() {
        let field = Register::new(1);
        let combined = combine_record(record(vec![("f", Input::Cell(field.sentinel()))]));

        combined.dispose();
        assert!(field.is_disposed());
    }

    #[test]
    fn list_slots_emit_update_patches() {
        let scheduler = Scheduler::new();
        let slot = Register::new_in(&scheduler, 5);

        let combined = combine_list_in(
            &scheduler,
            vec![
                Input::Plain(1),
                Input::Cell(slot.sentinel()),
                Input::Plain(3),
            ],
        );
        assert_eq!(combined.get(), vec![1, 5, 3]);

        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes_clone = changes.clone();
        let _sub = combined.patches().subscribe(move |change: &ArrayChange<i32>| {
            changes_clone.lock().push(change.clone());
        });

        slot.set(9);

        assert_eq!(combined.get(), vec![1, 9, 3]);
        let seen = changes.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![ArrayPatch::Update { index: 1, value: 9 }]);
    }
}
