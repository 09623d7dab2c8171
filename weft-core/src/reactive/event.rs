//! Event Channels
//!
//! The notification primitive everything else is built on. An
//! [`EventChannel`] holds an ordered table of listeners; firing invokes
//! every listener that was subscribed when the fire began, in
//! subscription order, synchronously.
//!
//! # Semantics
//!
//! 1. Subscribing during a fire is allowed; the new listener is not
//!    invoked for the in-progress fire.
//!
//! 2. A subscription owns exactly one listener entry plus any auxiliary
//!    disposables supplied at subscribe time; disposing it removes the
//!    listener and disposes the auxiliaries.
//!
//! 3. Disposing the channel disposes every remaining auxiliary set and
//!    clears the table; subsequent fires are no-ops.
//!
//! Cells whose value can never change use the inert channel from
//! [`EventChannel::never`]: subscribing to it returns an already-disposed
//! handle and it never fires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::dispose::Disposer;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerEntry<T> {
    callback: Callback<T>,
    auxiliaries: Vec<Disposer>,
}

struct ChannelInner<T> {
    /// Insertion-ordered so listeners fire in subscription order.
    listeners: Mutex<IndexMap<u64, ListenerEntry<T>>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
    /// Inert channels accept subscriptions without storing them and
    /// never fire.
    inert: bool,
}

/// A multi-listener notification channel.
///
/// Cloning shares the same listener table; both handles see the same
/// subscribers and fires.
pub struct EventChannel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> EventChannel<T> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// The inert channel for structurally constant cells. Never fires;
    /// subscriptions are accepted and immediately inert.
    pub fn never() -> Self {
        Self::build(true)
    }

    fn build(inert: bool) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                listeners: Mutex::new(IndexMap::new()),
                next_id: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                inert,
            }),
        }
    }

    /// Subscribe a listener. Returns the handle that owns the entry.
    ///
    /// # Panics
    ///
    /// Panics if the channel was already disposed; subscribing to a dead
    /// channel is a usage error and silently returning an inert handle
    /// would hide it.
    pub fn subscribe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_with(listener, Vec::new())
    }

    /// Subscribe a listener together with auxiliary disposables that are
    /// released when the subscription (or the whole channel) is disposed.
    pub fn subscribe_with<F>(&self, listener: F, auxiliaries: Vec<Disposer>) -> Disposer
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if self.inner.inert {
            return Disposer::noop();
        }
        assert!(
            !self.inner.disposed.load(Ordering::SeqCst),
            "subscribe on a disposed event channel"
        );

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(
            id,
            ListenerEntry {
                callback: Arc::new(listener),
                auxiliaries,
            },
        );

        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || Self::unsubscribe(&weak, id))
    }

    fn unsubscribe(weak: &Weak<ChannelInner<T>>, id: u64) {
        let Some(inner) = weak.upgrade() else { return };
        let entry = inner.listeners.lock().shift_remove(&id);
        if let Some(entry) = entry {
            for auxiliary in entry.auxiliaries {
                auxiliary.dispose();
            }
        }
    }

    /// Invoke every currently-subscribed listener with `value`, in
    /// subscription order. No-op after disposal.
    pub fn emit(&self, value: &T) {
        if self.inner.inert || self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }

        // Snapshot before calling out so listeners may subscribe or
        // unsubscribe without holding the table lock.
        let callbacks: Vec<Callback<T>> = {
            let listeners = self.inner.listeners.lock();
            listeners.values().map(|e| Arc::clone(&e.callback)).collect()
        };

        for callback in callbacks {
            callback(value);
        }
    }

    /// Dispose the channel: release every remaining auxiliary set and
    /// clear the listener table. Idempotent; later fires are no-ops.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<ListenerEntry<T>> = {
            let mut listeners = self.inner.listeners.lock();
            listeners.drain(..).map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            for auxiliary in entry.auxiliaries {
                auxiliary.dispose();
            }
        }
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of live listener entries.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// A disposer that tears down this channel.
    pub(crate) fn disposer(&self) -> Disposer {
        let channel = self.clone();
        Disposer::new(move || channel.dispose())
    }
}

impl<T: 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("listeners", &self.inner.listeners.lock().len())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .field("inert", &self.inner.inert)
            .finish()
    }
}
