//! Transport abstraction for MicroSync.
//!
//! A [`Transport`] performs one request against a named micro-service and
//! returns the raw response body. Resolving the service name to a network
//! address is entirely the transport's job; the HTTP transport does it with
//! a [`ServiceDirectory`].
//!
//! Failures are reported as `TransientFetch` (worth retrying) or
//! `PermanentFetch` (will not improve on retry).

pub mod directory;
pub mod http;
pub mod memory;
pub mod transport;

pub use directory::ServiceDirectory;
pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use transport::Transport;
