//! Applying fetched payloads to the local document.

use std::sync::Arc;
use tracing::debug;

use microsync_common::{Content, DocumentId, Error, Payload, Result, Revision};
use microsync_store::{DocumentStore, WriteOutcome};

/// Computes new document content from the current content and a payload.
///
/// Must be deterministic: the same inputs always produce the same content.
pub trait MergePolicy: Send + Sync {
    /// Policy name for logging.
    fn name(&self) -> &str;

    /// Produce the content to commit.
    fn merge(&self, current: &Content, payload: Payload) -> Result<Content>;
}

/// Replaces the whole document with the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacePolicy;

impl MergePolicy for ReplacePolicy {
    fn name(&self) -> &str {
        "replace"
    }

    fn merge(&self, _current: &Content, payload: Payload) -> Result<Content> {
        Ok(payload.into_content())
    }
}

/// Overlays the payload's top-level properties onto the current content.
///
/// Properties absent from the payload are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayPolicy;

impl MergePolicy for OverlayPolicy {
    fn name(&self) -> &str {
        "overlay"
    }

    fn merge(&self, current: &Content, payload: Payload) -> Result<Content> {
        let mut merged = current.clone();
        merged.extend(payload.into_content());
        Ok(merged)
    }
}

/// Result of a merge attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The new content was committed at this revision.
    Committed(Revision),
    /// Another writer moved the document first; nothing was written.
    ConflictRetry,
}

/// A computed write waiting to be committed.
#[derive(Debug, Clone)]
pub struct PreparedWrite {
    content: Content,
    expected: Revision,
}

impl PreparedWrite {
    /// Revision the content was computed against.
    pub fn expected(&self) -> Revision {
        self.expected
    }

    /// Content that will be committed.
    pub fn content(&self) -> &Content {
        &self.content
    }
}

/// Reads, merges and conditionally writes one document.
#[derive(Clone)]
pub struct MergeApplier {
    store: Arc<dyn DocumentStore>,
    policy: Arc<dyn MergePolicy>,
}

impl MergeApplier {
    /// Create a new applier.
    pub fn new(store: Arc<dyn DocumentStore>, policy: Arc<dyn MergePolicy>) -> Self {
        Self { store, policy }
    }

    /// Read the document and compute its new content.
    ///
    /// # Errors
    /// - `Merge` if the store cannot be read or the policy rejects the payload
    pub async fn prepare(&self, id: &DocumentId, payload: Payload) -> Result<PreparedWrite> {
        let current = self
            .store
            .read_document(id)
            .await
            .map_err(|e| Error::Merge(format!("Failed to read {}: {}", id, e)))?;

        let content = self.policy.merge(&current.content, payload).map_err(|e| {
            Error::Merge(format!(
                "{} policy failed for {}: {}",
                self.policy.name(),
                id,
                e
            ))
        })?;

        Ok(PreparedWrite {
            content,
            expected: current.revision,
        })
    }

    /// Commit a prepared write, conditioned on its expected revision.
    ///
    /// # Errors
    /// - `Merge` if the store fails the write
    pub async fn commit(&self, id: &DocumentId, prepared: PreparedWrite) -> Result<MergeOutcome> {
        let outcome = self
            .store
            .write_document(id, prepared.content, prepared.expected)
            .await
            .map_err(|e| Error::Merge(format!("Failed to write {}: {}", id, e)))?;

        match outcome {
            WriteOutcome::Committed(revision) => {
                debug!("Committed {} at revision {}", id, revision);
                Ok(MergeOutcome::Committed(revision))
            }
            WriteOutcome::RevisionMismatch { current } => {
                debug!(
                    "Lost write race on {}: expected revision {}, store has {}",
                    id, prepared.expected, current
                );
                Ok(MergeOutcome::ConflictRetry)
            }
        }
    }

    /// Prepare and commit in one step.
    pub async fn apply(&self, id: &DocumentId, payload: Payload) -> Result<MergeOutcome> {
        let prepared = self.prepare(id, payload).await?;
        self.commit(id, prepared).await
    }
}
