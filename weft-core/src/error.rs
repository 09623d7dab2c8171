//! Crate Error Type
//!
//! All fallible operations in the crate report through [`WeftError`].
//! The convenience mutators (`set`, `splice`, `set_index`) panic on the
//! same conditions and document it; the `try_` forms return these errors
//! instead.

use thiserror::Error;

/// Errors reported by the reactive core.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WeftError {
    /// The target cell, channel, or process was already disposed.
    #[error("target was already disposed")]
    Disposed,

    /// A splice range does not fit the current sequence length.
    #[error("splice at {start} deleting {delete_count} out of bounds for length {len}")]
    SpliceOutOfBounds {
        start: usize,
        delete_count: usize,
        len: usize,
    },

    /// A single-slot index does not fit the current sequence length.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}
