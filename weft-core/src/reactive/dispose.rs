//! Teardown Handles
//!
//! Every resource in the reactive core (listener entries, derived cells,
//! process steps) tears down through a [`Disposer`]: an idempotent,
//! shareable handle around a run-at-most-once closure. Combinators hand
//! these out instead of relying on `Drop` because teardown must happen in
//! a prescribed order (later-acquired first), not whenever a particular
//! handle goes out of scope.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// An idempotent teardown handle.
///
/// Cloning shares the underlying slot: disposing any clone runs the
/// teardown once and marks every clone disposed.
#[derive(Clone)]
pub struct Disposer {
    slot: Arc<Mutex<Option<Teardown>>>,
}

impl Disposer {
    /// Wrap a teardown closure. The closure runs at most once, on the
    /// first `dispose` call across all clones.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// A handle with nothing to tear down. Already disposed.
    pub fn noop() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Compose several handles into one that disposes them in reverse
    /// order (last acquired, first released).
    pub fn stacked(mut parts: Vec<Disposer>) -> Self {
        Self::new(move || {
            while let Some(part) = parts.pop() {
                part.dispose();
            }
        })
    }

    /// Run the teardown if it has not run yet.
    pub fn dispose(&self) {
        let teardown = self.slot.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the teardown has already run (or there never was one).
    pub fn is_disposed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
