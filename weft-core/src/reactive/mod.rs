//! Reactive Primitives
//!
//! This module implements the scalar half of the reactive system:
//! events, the batching scheduler, cells, and processes.
//!
//! # Concepts
//!
//! ## Sentinels
//!
//! A Sentinel is a value holder with a change-notification channel. It
//! comes in a closed set of shapes fixed at construction time: constant
//! cells, mutable registers, derived cells built by combinators, and
//! process results.
//!
//! ## Registers
//!
//! A Register is the mutable source of truth. Writes land immediately;
//! notification is coalesced through the scheduler so one synchronous
//! burst of writes produces one fire.
//!
//! ## Processes
//!
//! A Process re-executes a computation incrementally: it memoizes every
//! tracked cell read as an ordered step and, when a step's cell fires,
//! tears down and replays only the invalidated suffix.
//!
//! # Scheduling discipline
//!
//! Every external mutation batches through the [`Scheduler`] exactly
//! once at its source; derived cells propagate synchronously inside the
//! running flush. One mutation's full cascade therefore completes
//! before the next queued mutation's cascade begins.

mod dispose;
mod event;
mod process;
mod record;
mod register;
mod scheduler;
mod sentinel;

pub use dispose::Disposer;
pub use event::EventChannel;
pub use process::{process, process_all, toplevel, Process, ProcessScope};
pub use record::{combine_list, combine_list_in, combine_record, combine_record_in, Input};
pub use register::{cell, Register};
pub use scheduler::Scheduler;
pub use sentinel::{listen, pure, Sentinel};
