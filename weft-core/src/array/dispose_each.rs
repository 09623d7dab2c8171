//! Per-Element Resource Binding
//!
//! Runs a side-effecting constructor for every element of an ordered
//! collection and keeps the resulting resources in step with the
//! sequence: a patch that removes or replaces elements disposes the
//! corresponding resources in the index order the patch removed them.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{ArrayChange, ArrayPatch, ArraySentinel};
use crate::reactive::Disposer;

pub(super) fn for_each_dispose<T, F>(source: ArraySentinel<T>, func: F) -> Disposer
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> Disposer + Send + Sync + 'static,
{
    let func = Arc::new(func);
    let resources: Arc<Mutex<Vec<Disposer>>> =
        Arc::new(Mutex::new(source.get().iter().map(|item| func(item)).collect()));

    let sub = {
        let resources = Arc::clone(&resources);
        let func = Arc::clone(&func);
        source.patches().subscribe(move |change: &ArrayChange<T>| {
            let mut removed: Vec<Disposer> = Vec::new();
            {
                let mut live = resources.lock();
                for patch in change {
                    match patch {
                        ArrayPatch::Splice {
                            start,
                            delete_count,
                            inserted,
                        } => {
                            let fresh: Vec<Disposer> =
                                inserted.iter().map(|item| func(item)).collect();
                            removed.extend(
                                live.splice(*start..*start + *delete_count, fresh),
                            );
                        }
                        ArrayPatch::Update { index, value } => {
                            let fresh = func(value);
                            removed.push(std::mem::replace(&mut live[*index], fresh));
                        }
                    }
                }
            }
            for resource in removed {
                resource.dispose();
            }
        })
    };

    let upstream = source.disposer();
    Disposer::new(move || {
        sub.dispose();
        let live = std::mem::take(&mut *resources.lock());
        for resource in live {
            resource.dispose();
        }
        upstream.dispose();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::register::ArrayRegister;

    fn logged(log: &Arc<Mutex<Vec<String>>>, tag: String) -> Disposer {
        let log = Arc::clone(log);
        Disposer::new(move || log.lock().push(tag))
    }

    #[test]
    fn removed_elements_release_in_removal_order() {
        let source = ArrayRegister::new(vec!["a", "b", "c"]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_outer = log.clone();
        let _binding = source
            .array_view()
            .for_each_dispose(move |item: &&str| logged(&log_outer, format!("drop {item}")));

        source.splice(0, 2, vec!["x"]);
        assert_eq!(*log.lock(), vec!["drop a", "drop b"]);
    }

    #[test]
    fn updates_swap_the_resource() {
        let source = ArrayRegister::new(vec![1, 2]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_outer = log.clone();
        let _binding = source
            .array_view()
            .for_each_dispose(move |item: &i32| logged(&log_outer, format!("drop {item}")));

        source.set_index(1, 9);
        assert_eq!(*log.lock(), vec!["drop 2"]);

        source.set_index(1, 10);
        assert_eq!(*log.lock(), vec!["drop 2", "drop 9"]);
    }

    #[test]
    fn teardown_releases_every_live_resource() {
        let source = ArrayRegister::new(vec![1, 2, 3]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_outer = log.clone();
        let binding = source
            .array_view()
            .for_each_dispose(move |item: &i32| logged(&log_outer, format!("drop {item}")));

        binding.dispose();
        assert_eq!(*log.lock(), vec!["drop 1", "drop 2", "drop 3"]);
    }
}
