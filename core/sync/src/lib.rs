//! MicroSync pull engine
//!
//! Continuously pulls the state of a named micro-service into one local
//! document:
//! - One session per (service, document) pair, enforced by a registry
//! - Fetch, merge and store cycles with optimistic-concurrency writes
//! - Exponential backoff for transient failures
//! - Cancellation through a [`SyncHandle`] with a completion report

pub mod engine;
pub mod fetcher;
pub mod merge;
pub mod registry;
pub mod retry;
pub mod session;
pub mod state;

// Re-export main types
pub use engine::{PullSync, SyncConfig};
pub use fetcher::Fetcher;
pub use merge::{MergeApplier, MergeOutcome, MergePolicy, OverlayPolicy, PreparedWrite, ReplacePolicy};
pub use registry::{Registration, SessionKey, SessionRegistry};
pub use retry::{FailureKind, RetryConfig, RetryDecision, RetryPolicy};
pub use session::SyncHandle;
pub use state::{SessionId, SessionOutcome, SessionReport, SessionState};
