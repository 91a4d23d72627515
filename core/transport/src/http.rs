//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::directory::ServiceDirectory;
use crate::transport::Transport;
use microsync_common::{Error, Result, ServiceName};

/// HTTP transport that GETs each service's state endpoint.
pub struct HttpTransport {
    http: Client,
    directory: ServiceDirectory,
}

impl HttpTransport {
    /// Create a new HTTP transport resolving names through `directory`.
    ///
    /// # Errors
    /// - The HTTP client could not be initialized
    pub fn new(directory: ServiceDirectory) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("microsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, directory })
    }

    /// Get the service directory.
    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    /// Classify a reqwest failure.
    fn classify_error(service: &ServiceName, err: reqwest::Error) -> Error {
        if err.is_builder() {
            Error::PermanentFetch(format!("Invalid request to {}: {}", service, err))
        } else if err.is_timeout() {
            Error::TransientFetch(format!("Request to {} timed out", service))
        } else {
            Error::TransientFetch(format!("Request to {} failed: {}", service, err))
        }
    }

    /// Classify a non-success status.
    fn classify_status(service: &ServiceName, status: StatusCode) -> Error {
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Error::TransientFetch(format!("Service {} returned {}", service, status))
        } else {
            Error::PermanentFetch(format!("Service {} returned {}", service, status))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn request(&self, service: &ServiceName, timeout: Duration) -> Result<Vec<u8>> {
        let url = self.directory.resolve(service)?.clone();
        debug!("GET {} for service {}", url, service);

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::classify_error(service, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(service, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify_error(service, e))?;
        Ok(body.to_vec())
    }
}
