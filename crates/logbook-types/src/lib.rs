//! Core types and traits for the logbook approval workflow.
//!
//! Holds the record types shared by every crate, the pure transition table,
//! signature derivation, and the traits placed at the storage and I/O seams.

mod config;
mod lifecycle;
mod model;
mod signature;
mod traits;

pub use config::*;
pub use lifecycle::*;
pub use model::*;
pub use signature::*;
pub use traits::*;
