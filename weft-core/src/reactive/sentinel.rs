//! Sentinels
//!
//! A Sentinel is the fundamental reactive primitive: a value holder with
//! a change-notification channel. It is the contract every other
//! component speaks — registers produce one, combinators transform one
//! into another, processes both consume and produce them.
//!
//! # How Sentinels Work
//!
//! 1. `get` returns the current value. After a change event has fired,
//!    the value read here equals the value the event carried.
//!
//! 2. `changed` exposes the change channel. Constant cells use the inert
//!    channel, so subscribing to them costs nothing.
//!
//! 3. Combinators (`map`, `map_distinct`, `flat_map`, `for_each`) take
//!    the upstream handle by value: the derived cell owns its upstream
//!    and the subscriptions it created, and tears them down in reverse
//!    acquisition order.
//!
//! # Representation
//!
//! `Sentinel<T>` is type-erased: a read closure, a channel handle, and a
//! teardown handle. The closed set of value shapes a consumer can be
//! handed — plain value, scalar cell, ordered-collection cell — is
//! spelled out at construction time ([`crate::reactive::Input`] for
//! record fields, [`crate::array::ArraySentinel`] for collections), not
//! probed at runtime.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::dispose::Disposer;
use super::event::EventChannel;

/// A value holder with a change channel and a teardown handle.
///
/// Cloning shares the underlying cell; clones read the same value and
/// observe the same fires.
pub struct Sentinel<T> {
    read: Arc<dyn Fn() -> T + Send + Sync>,
    changed: EventChannel<T>,
    teardown: Disposer,
}

impl<T> Clone for Sentinel<T> {
    fn clone(&self) -> Self {
        Self {
            read: Arc::clone(&self.read),
            changed: self.changed.clone(),
            teardown: self.teardown.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Sentinel<T> {
    /// A constant cell. Its change channel is the inert channel and it
    /// has nothing to tear down.
    pub fn pure(value: T) -> Self {
        Self::pure_owned(value, Disposer::noop())
    }

    /// A constant cell that owns a disposable payload: the wrapped value
    /// never changes, but tearing down the cell releases the resource
    /// behind it. Process steps use this to hold mutable registers and
    /// other owned state.
    pub fn pure_owned(value: T, teardown: Disposer) -> Self {
        Self {
            read: Arc::new(move || value.clone()),
            changed: EventChannel::never(),
            teardown,
        }
    }

    /// Assemble a sentinel from its three parts. Source cells use this
    /// to hand out views of themselves.
    pub fn from_parts<R>(read: R, changed: EventChannel<T>, teardown: Disposer) -> Self
    where
        R: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
            changed,
            teardown,
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        (self.read)()
    }

    /// The change channel. Fires with the new value on every change.
    pub fn changed(&self) -> EventChannel<T> {
        self.changed.clone()
    }

    /// Subscribe to changes. Convenience for `changed().subscribe`.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.changed.subscribe(listener)
    }

    /// The teardown handle for this cell.
    pub fn disposer(&self) -> Disposer {
        self.teardown.clone()
    }

    /// Tear the cell down: releases its subscriptions and owned
    /// resources in reverse acquisition order. Idempotent.
    pub fn dispose(&self) {
        self.teardown.dispose();
    }

    /// Derive a cell that recomputes `func` on every upstream change and
    /// fires unconditionally, even when the mapped value is unchanged.
    /// Use [`Sentinel::map_distinct`] when consumers need
    /// distinctness-gated invalidation instead.
    pub fn map<U, F>(self, func: F) -> Sentinel<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let out = EventChannel::new();
        let value = Arc::new(RwLock::new(func(&self.get())));

        let sub = {
            let value = Arc::clone(&value);
            let out = out.clone();
            self.changed.subscribe(move |input: &T| {
                let mapped = func(input);
                *value.write() = mapped.clone();
                out.emit(&mapped);
            })
        };

        let teardown = Disposer::stacked(vec![self.teardown.clone(), out.disposer(), sub]);
        Sentinel {
            read: Arc::new(move || value.read().clone()),
            changed: out,
            teardown,
        }
    }

    /// Derive a cell that recomputes on every upstream change but fires
    /// only when the mapped value differs from the previous one.
    pub fn map_distinct<U, F>(self, func: F) -> Sentinel<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let out = EventChannel::new();
        let value = Arc::new(RwLock::new(func(&self.get())));

        let sub = {
            let value = Arc::clone(&value);
            let out = out.clone();
            self.changed.subscribe(move |input: &T| {
                let mapped = func(input);
                let is_new = {
                    let mut slot = value.write();
                    if *slot == mapped {
                        false
                    } else {
                        *slot = mapped.clone();
                        true
                    }
                };
                if is_new {
                    out.emit(&mapped);
                }
            })
        };

        let teardown = Disposer::stacked(vec![self.teardown.clone(), out.disposer(), sub]);
        Sentinel {
            read: Arc::new(move || value.read().clone()),
            changed: out,
            teardown,
        }
    }

    /// Derive a cell through a cell-producing function.
    ///
    /// Maintains a current inner cell `func(upstream value)`. Changes of
    /// the inner cell propagate upward directly; an upstream change
    /// retires the previous inner subscription, derives a new inner
    /// cell, adopts its value, fires, and only then resubscribes — so a
    /// stale inner cell can never reach this cell's listeners after the
    /// swap.
    pub fn flat_map<U, F>(self, func: F) -> Sentinel<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Sentinel<U> + Send + Sync + 'static,
    {
        struct FlatState<U> {
            value: RwLock<U>,
            /// Current inner cell and the subscription watching it.
            current: Mutex<(Sentinel<U>, Disposer)>,
            out: EventChannel<U>,
        }

        fn watch<U: Clone + Send + Sync + 'static>(
            state: &Arc<FlatState<U>>,
            cell: &Sentinel<U>,
        ) -> Disposer {
            let weak = Arc::downgrade(state);
            cell.changed().subscribe(move |inner_value: &U| {
                let Some(state) = weak.upgrade() else { return };
                *state.value.write() = inner_value.clone();
                state.out.emit(inner_value);
            })
        }

        let first = func(&self.get());
        let state = Arc::new(FlatState {
            value: RwLock::new(first.get()),
            current: Mutex::new((first.clone(), Disposer::noop())),
            out: EventChannel::new(),
        });
        state.current.lock().1 = watch(&state, &first);

        let outer_sub = {
            let state = Arc::clone(&state);
            self.changed.subscribe(move |input: &T| {
                // Retire the old subscription before anything else so a
                // notification from the stale inner cell cannot land
                // after the new one is installed.
                let old_sub = state.current.lock().1.clone();
                old_sub.dispose();

                let cell = func(input);
                let adopted = cell.get();
                *state.value.write() = adopted.clone();
                state.out.emit(&adopted);

                let sub = watch(&state, &cell);
                *state.current.lock() = (cell, sub);
            })
        };

        let teardown = {
            let state = Arc::clone(&state);
            let upstream = self.teardown.clone();
            let outer_sub = outer_sub.clone();
            Disposer::new(move || {
                let (cell, sub) = {
                    let current = state.current.lock();
                    (current.0.clone(), current.1.clone())
                };
                sub.dispose();
                cell.dispose();
                outer_sub.dispose();
                state.out.dispose();
                upstream.dispose();
            })
        };

        let read_state = Arc::clone(&state);
        Sentinel {
            read: Arc::new(move || read_state.value.read().clone()),
            changed: state.out.clone(),
            teardown,
        }
    }

    /// Bind a resource constructor to this cell: `func` runs on the
    /// current value and again on every change, disposing the previous
    /// resource first. The returned handle tears down the subscription,
    /// the live resource, and the upstream cell.
    pub fn for_each<F>(self, func: F) -> Disposer
    where
        F: Fn(&T) -> Disposer + Send + Sync + 'static,
    {
        let current = Arc::new(Mutex::new(func(&self.get())));

        let sub = {
            let current = Arc::clone(&current);
            self.changed.subscribe(move |input: &T| {
                let old = current.lock().clone();
                old.dispose();
                *current.lock() = func(input);
            })
        };

        let upstream = self.teardown.clone();
        Disposer::new(move || {
            sub.dispose();
            let live = current.lock().clone();
            live.dispose();
            upstream.dispose();
        })
    }
}

impl Sentinel<()> {
    /// A unit cell that only carries a teardown. Lets a process step
    /// acquire an undoable external effect (the teardown is the undo).
    pub fn resource(teardown: Disposer) -> Self {
        Self::pure_owned((), teardown)
    }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Sentinel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentinel")
            .field("value", &self.get())
            .field("disposed", &self.teardown.is_disposed())
            .finish()
    }
}

/// Shorthand for [`Sentinel::pure`].
pub fn pure<T: Clone + Send + Sync + 'static>(value: T) -> Sentinel<T> {
    Sentinel::pure(value)
}

/// Adapt an event channel into a cell caching the latest payload
/// (`None` until the first fire).
pub fn listen<T>(event: &EventChannel<T>) -> Sentinel<Option<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let value = Arc::new(RwLock::new(None));
    let out: EventChannel<Option<T>> = EventChannel::new();

    let sub = {
        let value = Arc::clone(&value);
        let out = out.clone();
        event.subscribe(move |payload: &T| {
            let latest = Some(payload.clone());
            *value.write() = latest.clone();
            out.emit(&latest);
        })
    };

    let read_value = Arc::clone(&value);
    Sentinel::from_parts(
        move || read_value.read().clone(),
        out.clone(),
        Disposer::stacked(vec![out.disposer(), sub]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::register::Register;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn pure_holds_a_constant() {
        let cell = Sentinel::pure(7);
        assert_eq!(cell.get(), 7);

        // The inert channel accepts and discards subscriptions.
        let sub = cell.subscribe(|_| panic!("pure cell fired"));
        assert!(sub.is_disposed());
    }

    #[test]
    fn map_recomputes_on_change() {
        let source = Register::new(2);
        let doubled = source.sentinel().map(|v| v * 2);
        assert_eq!(doubled.get(), 4);

        source.set(5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn map_fires_even_when_output_is_unchanged() {
        let source = Register::new(1);
        let parity = source.sentinel().map(|v| v % 2);

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = parity.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(3); // parity unchanged
        source.set(5); // parity unchanged
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_distinct_gates_on_output_change() {
        let source = Register::new(1);
        let parity = source.sentinel().map_distinct(|v| v % 2);

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = parity.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        source.set(3); // parity unchanged: no fire
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        source.set(4); // parity flips: one fire
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert_eq!(parity.get(), 0);
    }

    #[test]
    fn flat_map_follows_the_inner_cell() {
        let selector = Register::new(false);
        let low = Register::new(10);
        let high = Register::new(100);

        let low_cell = low.clone();
        let high_cell = high.clone();
        let chosen = selector.sentinel().flat_map(move |pick_high| {
            if *pick_high {
                high_cell.sentinel()
            } else {
                low_cell.sentinel()
            }
        });

        assert_eq!(chosen.get(), 10);

        // Inner changes propagate without re-derivation.
        low.set(11);
        assert_eq!(chosen.get(), 11);

        // Outer change swaps the inner cell.
        selector.set(true);
        assert_eq!(chosen.get(), 100);

        high.set(101);
        assert_eq!(chosen.get(), 101);
    }

    #[test]
    fn flat_map_ignores_the_previous_inner_cell() {
        let selector = Register::new(0);
        let a = Register::new(1);
        let b = Register::new(2);

        let a_cell = a.clone();
        let b_cell = b.clone();
        let chosen = selector.sentinel().flat_map(move |which| {
            if *which == 0 {
                a_cell.sentinel()
            } else {
                b_cell.sentinel()
            }
        });

        let fires = Arc::new(AtomicI32::new(0));
        let fires_clone = fires.clone();
        let _sub = chosen.subscribe(move |_| {
            fires_clone.fetch_add(1, Ordering::SeqCst);
        });

        selector.set(1);
        let after_switch = fires.load(Ordering::SeqCst);

        // `a` still exists independently; its fires must not reach us.
        a.set(99);
        assert_eq!(fires.load(Ordering::SeqCst), after_switch);
        assert_eq!(chosen.get(), 2);
    }

    #[test]
    fn for_each_swaps_the_resource_per_value() {
        let source = Register::new("a");
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        let binding = source.sentinel().for_each(move |value: &&str| {
            let log = log_clone.clone();
            let tag = *value;
            Disposer::new(move || log.lock().push(format!("drop {tag}")))
        });

        source.set("b");
        assert_eq!(*log.lock(), vec!["drop a"]);

        binding.dispose();
        assert_eq!(*log.lock(), vec!["drop a", "drop b"]);
    }

    #[test]
    fn listen_caches_the_latest_payload() {
        let events: EventChannel<i32> = EventChannel::new();
        let latest = listen(&events);

        assert_eq!(latest.get(), None);

        events.emit(&5);
        assert_eq!(latest.get(), Some(5));

        events.emit(&6);
        assert_eq!(latest.get(), Some(6));
    }
}
