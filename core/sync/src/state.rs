//! Session state machine states and terminal reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use microsync_common::{DocumentId, ServiceName};

/// Unique identifier of one sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a pull session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, first fetch not yet issued.
    Idle,
    /// Waiting on the remote service.
    Fetching,
    /// Applying a fetched payload to the store.
    Merging,
    /// Backing off after a transient failure.
    Waiting,
    /// Cancelled by the caller.
    Stopped,
    /// Gave up after a permanent failure or an exhausted retry budget.
    Failed,
}

impl SessionState {
    /// Returns true if no further transition can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Fetching => "fetching",
            SessionState::Merging => "merging",
            SessionState::Waiting => "waiting",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// The caller stopped the session.
    Stopped,
    /// The session gave up.
    Failed,
}

impl From<SessionOutcome> for SessionState {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Stopped => SessionState::Stopped,
            SessionOutcome::Failed => SessionState::Failed,
        }
    }
}

/// Final report of a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub service: ServiceName,
    pub document: DocumentId,
    pub outcome: SessionOutcome,
    /// Number of payloads committed to the store.
    pub merges: u64,
    /// Most recent failure, if the session saw one.
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    /// Whether the session ended because it gave up.
    pub fn is_failed(&self) -> bool {
        self.outcome == SessionOutcome::Failed
    }
}
