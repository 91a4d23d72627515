//! Service directory for resolving service names to endpoints.

use std::collections::HashMap;
use url::Url;

use microsync_common::{Error, Result, ServiceName};

/// Registry of known services and the endpoint serving their state.
///
/// Loaded from configuration; resolution failures are permanent because an
/// unknown name will not become known by retrying.
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    endpoints: HashMap<ServiceName, Url>,
}

impl ServiceDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self {
            endpoints: HashMap::new(),
        }
    }

    /// Register a service endpoint.
    ///
    /// # Preconditions
    /// - `service` must be unique within the directory
    /// - `endpoint` must be an http(s) URL
    ///
    /// # Errors
    /// - Returns error if the name is already registered or the URL is invalid
    pub fn register(&mut self, service: ServiceName, endpoint: &str) -> Result<()> {
        if self.endpoints.contains_key(&service) {
            return Err(Error::InvalidInput(format!(
                "Service '{}' is already registered",
                service
            )));
        }
        let url = Url::parse(endpoint)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint {}: {}", endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Unsupported endpoint scheme: {}",
                url.scheme()
            )));
        }
        self.endpoints.insert(service, url);
        Ok(())
    }

    /// Resolve a service to its endpoint.
    ///
    /// # Errors
    /// - `PermanentFetch` if the service is not registered
    pub fn resolve(&self, service: &ServiceName) -> Result<&Url> {
        self.endpoints.get(service).ok_or_else(|| {
            Error::PermanentFetch(format!("Service '{}' is not registered", service))
        })
    }

    /// Get list of registered service names.
    pub fn services(&self) -> Vec<ServiceName> {
        self.endpoints.keys().cloned().collect()
    }

    /// Check if a service is registered.
    pub fn has_service(&self, service: &ServiceName) -> bool {
        self.endpoints.contains_key(service)
    }

    /// Load a directory from a JSON object of `"name": "url"` pairs.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(json)?;
        let mut directory = Self::new();
        for (name, endpoint) in raw {
            directory.register(ServiceName::new(name)?, &endpoint)?;
        }
        Ok(directory)
    }
}
