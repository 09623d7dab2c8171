//! Per-Element Projection
//!
//! Maps every element of an ordered collection through a pure function
//! and keeps the output aligned by translating patches instead of
//! re-mapping the whole sequence: a `Splice` keeps its window and maps
//! only the inserted run, an `Update` maps the one replaced value.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{ArrayChange, ArrayPatch, ArraySentinel};
use crate::reactive::{Disposer, EventChannel};

pub(super) fn map_each<T, U, F>(source: ArraySentinel<T>, func: F) -> ArraySentinel<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    let func = Arc::new(func);
    let values: Arc<RwLock<Vec<U>>> =
        Arc::new(RwLock::new(source.get().iter().map(|item| func(item)).collect()));
    let out_changed: EventChannel<Vec<U>> = EventChannel::new();
    let out_patches: EventChannel<ArrayChange<U>> = EventChannel::new();

    let sub = {
        let values = Arc::clone(&values);
        let func = Arc::clone(&func);
        let out_changed = out_changed.clone();
        let out_patches = out_patches.clone();
        source.patches().subscribe(move |change: &ArrayChange<T>| {
            let mut translated: ArrayChange<U> = Vec::with_capacity(change.len());
            let snapshot = {
                let mut cache = values.write();
                for patch in change {
                    match patch {
                        ArrayPatch::Splice {
                            start,
                            delete_count,
                            inserted,
                        } => {
                            let mapped: Vec<U> = inserted.iter().map(|item| func(item)).collect();
                            cache.splice(*start..*start + *delete_count, mapped.iter().cloned());
                            translated.push(ArrayPatch::Splice {
                                start: *start,
                                delete_count: *delete_count,
                                inserted: mapped,
                            });
                        }
                        ArrayPatch::Update { index, value } => {
                            let mapped = func(value);
                            cache[*index] = mapped.clone();
                            translated.push(ArrayPatch::Update {
                                index: *index,
                                value: mapped,
                            });
                        }
                    }
                }
                cache.clone()
            };
            out_patches.emit(&translated);
            out_changed.emit(&snapshot);
        })
    };

    let teardown = Disposer::stacked(vec![
        source.disposer(),
        out_changed.disposer(),
        out_patches.disposer(),
        sub,
    ]);

    let read_values = Arc::clone(&values);
    ArraySentinel::from_parts(
        move || read_values.read().clone(),
        out_changed,
        out_patches,
        teardown,
    )
}
