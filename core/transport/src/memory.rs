//! In-memory transport for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::transport::Transport;
use microsync_common::{Error, Result, ServiceName};

/// In-memory transport.
///
/// Serves whatever body was last published for a service. Useful for
/// testing and for wiring services that live in the same process.
pub struct MemoryTransport {
    bodies: RwLock<HashMap<ServiceName, Vec<u8>>>,
}

impl MemoryTransport {
    /// Create a new transport with no services.
    pub fn new() -> Self {
        Self {
            bodies: RwLock::new(HashMap::new()),
        }
    }

    /// Publish the current state of a service.
    pub fn publish(&self, service: &ServiceName, body: impl Into<Vec<u8>>) {
        self.bodies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.clone(), body.into());
    }

    /// Remove a service; subsequent requests fail permanently.
    pub fn withdraw(&self, service: &ServiceName) {
        self.bodies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service);
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn request(&self, service: &ServiceName, _timeout: Duration) -> Result<Vec<u8>> {
        self.bodies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .cloned()
            .ok_or_else(|| Error::PermanentFetch(format!("Unknown service: {}", service)))
    }
}
