//! The pull loop of one sync session and the caller's handle to it.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use microsync_common::{DocumentId, Error, Payload, Result, ServiceName};

use crate::fetcher::Fetcher;
use crate::merge::{MergeApplier, MergeOutcome};
use crate::registry::{Registration, SessionKey};
use crate::retry::{FailureKind, RetryDecision, RetryPolicy};
use crate::state::{SessionId, SessionOutcome, SessionReport, SessionState};

/// One running pull loop.
///
/// Owned by the task driving it. Holds the registry entry for its key until
/// it reaches a terminal state.
pub(crate) struct SyncSession {
    registration: Registration,
    fetcher: Fetcher,
    applier: MergeApplier,
    policy: RetryPolicy,
    poll_interval: Duration,
    cancel: CancellationToken,
    state: SessionState,
    /// Consecutive counted failures since the last successful fetch.
    attempts: u32,
    merges: u64,
    last_error: Option<String>,
}

impl SyncSession {
    pub(crate) fn new(
        registration: Registration,
        fetcher: Fetcher,
        applier: MergeApplier,
        policy: RetryPolicy,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registration,
            fetcher,
            applier,
            policy,
            poll_interval,
            cancel,
            state: SessionState::Idle,
            attempts: 0,
            merges: 0,
            last_error: None,
        }
    }

    fn key(&self) -> &SessionKey {
        self.registration.key()
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(
                "Session {} ({}): {} -> {}",
                self.registration.id(),
                self.key(),
                self.state,
                next
            );
            self.state = next;
        }
    }

    /// Sleep for `delay` unless cancelled first. Returns false on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Drive the loop to a terminal state and release the registry entry.
    pub(crate) async fn run(mut self) -> SessionReport {
        let started_at = Utc::now();
        info!(
            "Starting pull session {} for {}",
            self.registration.id(),
            self.key()
        );

        let outcome = self.pull_loop().await;
        self.transition(outcome.into());

        let report = SessionReport {
            session_id: self.registration.id(),
            service: self.key().service.clone(),
            document: self.key().document.clone(),
            outcome,
            merges: self.merges,
            last_error: self.last_error.clone(),
            started_at,
            finished_at: Utc::now(),
        };

        match outcome {
            SessionOutcome::Stopped => info!(
                "Pull session {} for {} stopped after {} merges",
                report.session_id, self.key(), report.merges
            ),
            SessionOutcome::Failed => error!(
                "Pull session {} for {} failed after {} merges: {}",
                report.session_id,
                self.key(),
                report.merges,
                report.last_error.as_deref().unwrap_or("unknown error")
            ),
        }

        // Dropping the session releases the registry entry.
        drop(self);
        report
    }

    async fn pull_loop(&mut self) -> SessionOutcome {
        let service = self.key().service.clone();
        let document = self.key().document.clone();
        // Pacing delay taken before the next fetch.
        let mut pending_delay = Duration::ZERO;

        loop {
            if self.cancel.is_cancelled() || !self.pause(pending_delay).await {
                return SessionOutcome::Stopped;
            }
            pending_delay = Duration::ZERO;

            self.transition(SessionState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionOutcome::Stopped,
                result = self.fetcher.fetch(&service) => result,
            };

            let payload = match fetched {
                Ok(payload) => {
                    self.attempts = 0;
                    payload
                }
                Err(err) => match self.on_failure(err) {
                    Some(delay) => {
                        self.transition(SessionState::Waiting);
                        pending_delay = delay;
                        continue;
                    }
                    None => return SessionOutcome::Failed,
                },
            };

            self.transition(SessionState::Merging);
            match self.merge(&document, payload).await {
                Ok(Some(MergeOutcome::Committed(_))) => {
                    self.merges += 1;
                    pending_delay = self.poll_interval;
                }
                Ok(Some(MergeOutcome::ConflictRetry)) => {
                    match self.policy.next_delay(self.attempts, FailureKind::Conflict) {
                        RetryDecision::RetryAfter(delay) => pending_delay = delay,
                        RetryDecision::GiveUp => return SessionOutcome::Failed,
                    }
                    debug!("Retrying {} immediately after write conflict", self.key());
                }
                Ok(None) => return SessionOutcome::Stopped,
                Err(err) => match self.on_failure(err) {
                    Some(delay) => {
                        self.transition(SessionState::Waiting);
                        pending_delay = delay;
                    }
                    None => return SessionOutcome::Failed,
                },
            }
        }
    }

    /// Merge a payload unless cancellation arrives before the commit.
    async fn merge(
        &self,
        document: &DocumentId,
        payload: Payload,
    ) -> Result<Option<MergeOutcome>> {
        let prepared = self.applier.prepare(document, payload).await?;
        if self.cancel.is_cancelled() {
            debug!("Discarding merge for {}: session cancelled", self.key());
            return Ok(None);
        }
        self.applier.commit(document, prepared).await.map(Some)
    }

    /// Record a failure and return the backoff delay, or None to give up.
    fn on_failure(&mut self, err: Error) -> Option<Duration> {
        let kind = FailureKind::of(&err);
        if kind == FailureKind::Transient {
            self.attempts += 1;
        }
        let decision = self.policy.next_delay(self.attempts, kind);
        self.last_error = Some(err.to_string());

        match decision {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    "Attempt {} for {} failed: {}. Retrying in {:?}...",
                    self.attempts,
                    self.key(),
                    err,
                    delay
                );
                Some(delay)
            }
            RetryDecision::GiveUp => {
                warn!("Giving up on {} after {} attempts: {}", self.key(), self.attempts, err);
                None
            }
        }
    }
}

/// Caller's capability over a running session.
///
/// Cloning the handle is cheap. Dropping every handle does not stop the
/// session; call [`SyncHandle::stop`] for that.
#[derive(Clone)]
pub struct SyncHandle {
    id: SessionId,
    key: SessionKey,
    cancel: CancellationToken,
    report: watch::Receiver<Option<SessionReport>>,
}

impl SyncHandle {
    pub(crate) fn new(
        id: SessionId,
        key: SessionKey,
        cancel: CancellationToken,
        report: watch::Receiver<Option<SessionReport>>,
    ) -> Self {
        Self {
            id,
            key,
            cancel,
            report,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Service being pulled.
    pub fn service(&self) -> &ServiceName {
        &self.key.service
    }

    /// Document being written.
    pub fn document(&self) -> &DocumentId {
        &self.key.document
    }

    /// Stop the session and wait for it to finish.
    ///
    /// Idempotent. Once this returns the session performs no further store
    /// writes. A session that already failed keeps its `Failed` outcome.
    pub async fn stop(&self) -> SessionReport {
        if !self.cancel.is_cancelled() {
            debug!("Stop requested for session {} ({})", self.id, self.key);
            self.cancel.cancel();
        }
        self.wait().await
    }

    /// Wait for the session to reach a terminal state.
    pub async fn wait(&self) -> SessionReport {
        let mut report = self.report.clone();
        let finished = report
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| (*report).clone());

        finished.unwrap_or_else(|| SessionReport {
            session_id: self.id,
            service: self.key.service.clone(),
            document: self.key.document.clone(),
            outcome: SessionOutcome::Failed,
            merges: 0,
            last_error: Some("Session task ended without a report".to_string()),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        })
    }

    /// Check whether the session has finished, without waiting.
    pub fn is_finished(&self) -> bool {
        self.report.borrow().is_some()
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("finished", &self.is_finished())
            .finish()
    }
}
