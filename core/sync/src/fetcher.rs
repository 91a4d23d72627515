//! One-shot fetch of a service's current state.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use microsync_common::{Error, Payload, Result, ServiceName};
use microsync_transport::Transport;

/// Fetches and decodes service snapshots.
///
/// Holds no state between calls; every fetch is an independent round trip
/// bounded by the configured timeout.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Fetcher {
    /// Create a new fetcher.
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Fetch the current payload of `service`.
    ///
    /// # Errors
    /// - `TransientFetch` on transport failure or timeout expiry
    /// - `PermanentFetch` for unknown services and malformed responses
    pub async fn fetch(&self, service: &ServiceName) -> Result<Payload> {
        let body = timeout(self.timeout, self.transport.request(service, self.timeout))
            .await
            .map_err(|_| {
                Error::TransientFetch(format!(
                    "Fetch from {} timed out after {:?}",
                    service, self.timeout
                ))
            })??;

        debug!("Fetched {} bytes from {}", body.len(), service);
        Payload::decode(&body)
    }

    /// Get the per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
