//! Common utilities and types shared across MicroSync crates.
//!
//! This module provides the identifiers and document types that flow between
//! the store, the transport and the sync engine, plus the shared error type.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Content, DocumentId, DocumentRevision, Payload, Revision, ServiceName};
