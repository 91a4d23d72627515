//! Pull engine: configuration and session start-up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use microsync_common::{DocumentId, Error, Result, ServiceName};
use microsync_store::DocumentStore;
use microsync_transport::Transport;

use crate::fetcher::Fetcher;
use crate::merge::{MergeApplier, MergePolicy, ReplacePolicy};
use crate::registry::{SessionKey, SessionRegistry};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::session::{SyncHandle, SyncSession};
use crate::state::SessionId;

/// Configuration for pull sessions.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Timeout for a single fetch round trip.
    pub fetch_timeout: Duration,
    /// Delay between a committed merge and the next fetch.
    pub poll_interval: Duration,
    /// Backoff for transient fetch failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check the configuration for values no session can run with.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

/// Pulls named services into documents of one store.
///
/// Every session started through an engine shares its store, transport and
/// registry. Engines default to the process-wide registry, so two engines
/// over the same store still refuse duplicate sessions.
pub struct PullSync {
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn Transport>,
    registry: Arc<SessionRegistry>,
    merge_policy: Arc<dyn MergePolicy>,
    config: SyncConfig,
}

impl PullSync {
    /// Create a new engine.
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is invalid
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transport,
            registry: SessionRegistry::global(),
            merge_policy: Arc::new(ReplacePolicy),
            config,
        })
    }

    /// Use a dedicated registry instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a different merge policy.
    pub fn with_merge_policy(mut self, policy: Arc<dyn MergePolicy>) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Get the registry sessions are recorded in.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start pulling `service` into `document`.
    ///
    /// Must be called from within a tokio runtime; the session runs as its
    /// own task on that runtime.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session for the pair is live; no session is created
    /// - `Runtime` if there is no runtime to spawn the session on
    pub fn start(&self, service: ServiceName, document: DocumentId) -> Result<SyncHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("Cannot start sync session: {}", e)))?;

        let id = SessionId::new();
        let key = SessionKey::new(service, document);
        let registration = self.registry.register(key.clone(), id)?;

        let cancel = CancellationToken::new();
        let (report_tx, report_rx) = watch::channel(None);

        let session = SyncSession::new(
            registration,
            Fetcher::new(self.transport.clone(), self.config.fetch_timeout),
            MergeApplier::new(self.store.clone(), self.merge_policy.clone()),
            RetryPolicy::new(self.config.retry.clone()),
            self.config.poll_interval,
            cancel.clone(),
        );

        debug!(
            "Spawning session {} for {} (store: {}, transport: {}, policy: {})",
            id,
            key,
            self.store.name(),
            self.transport.name(),
            self.merge_policy.name()
        );
        runtime.spawn(async move {
            let report = session.run().await;
            report_tx.send_replace(Some(report));
        });

        info!("Started pull of {} into {}", key.service, key.document);
        Ok(SyncHandle::new(id, key, cancel, report_rx))
    }
}
