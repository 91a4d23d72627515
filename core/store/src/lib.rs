//! Document store abstraction for MicroSync.
//!
//! The sync engine only depends on the conditional-write contract of
//! [`DocumentStore`]: read a document with its revision, then write new
//! content only if the revision has not moved in the meantime.
//!
//! # Design Principles
//! - Optimistic concurrency: writes carry the revision they were computed from
//! - Atomic commits: a write either fully lands or leaves the document untouched
//! - Async operations: all I/O operations are async

pub mod local;
pub mod memory;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::{DocumentStore, WriteOutcome};
