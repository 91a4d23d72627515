//! Transport trait definition.

use async_trait::async_trait;
use std::time::Duration;

use microsync_common::{Result, ServiceName};

/// Network transport to named micro-services.
///
/// Implementations keep no per-service state between calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Fetch the current state of a service.
    ///
    /// # Postconditions
    /// - Returns the complete response body
    ///
    /// # Errors
    /// - `TransientFetch` for connection failures, timeouts, overloaded services
    /// - `PermanentFetch` for unknown services and rejected requests
    async fn request(&self, service: &ServiceName, timeout: Duration) -> Result<Vec<u8>>;
}
