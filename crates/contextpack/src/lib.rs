//! Deterministic prompt assembly: token estimation, history windowing,
//! knowledge rendering and budget enforcement.
//!
//! Everything in this crate is pure. I/O (loading history, fetching
//! memories) happens in the callers.

pub mod budget;
pub mod builder;
pub mod injection;
pub mod report;
pub mod tokens;
pub mod window;
