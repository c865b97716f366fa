//! `courier-core`: domain building blocks for the forwarding engine.
//!
//! This crate contains **pure domain** types (no I/O): the job being forwarded,
//! the dead-letter record it becomes when delivery gives up, and identifiers.

pub mod dead_letter;
pub mod error;
pub mod id;
pub mod job;

pub use dead_letter::DeadLetterEntry;
pub use error::{DomainError, DomainResult};
pub use id::EntryId;
pub use job::{IdempotencyKey, Job};
