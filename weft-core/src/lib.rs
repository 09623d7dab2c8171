//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive UI
//! framework. It implements:
//!
//! - Reactive primitives (events, cells, registers, processes)
//! - A batching scheduler with a single FIFO flush loop
//! - Ordered-collection cells with structural patch propagation
//!
//! The rendering target is deliberately absent: consumers drive their
//! own trees from cells, processes, and patches.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: events, scheduler, scalar cells, record combination,
//!   and the incremental re-execution unit (`Process`)
//! - `array`: ordered-collection cells, the splice/update patch model,
//!   and the per-element combinators, including the offset-tracking
//!   flattening combinator
//!
//! # Example
//!
//! ```rust
//! use weft_core::reactive::{cell, process_all};
//!
//! let count = cell(1);
//!
//! let source = count.clone();
//! let label = process_all(move |scope| {
//!     let source = source.clone();
//!     let current = scope.track(move || source.view());
//!     format!("count: {current}")
//! });
//!
//! assert_eq!(label.get(), "count: 1");
//!
//! // Invalidate the tracked step; the process re-derives.
//! count.set(5);
//! assert_eq!(label.get(), "count: 5");
//! ```

pub mod array;
pub mod error;
pub mod reactive;

pub use error::WeftError;
