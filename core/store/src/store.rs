//! Document store trait definition.

use async_trait::async_trait;

use microsync_common::{Content, DocumentId, DocumentRevision, Result, Revision};

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write landed and produced this revision.
    Committed(Revision),
    /// The document moved past the expected revision; nothing was written.
    RevisionMismatch {
        /// Revision the store holds now.
        current: Revision,
    },
}

impl WriteOutcome {
    /// Whether the write landed.
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }
}

/// Local document store consumed by the sync engine.
///
/// Implementations own the revision counter of every document. A document
/// that was never written reads as empty content at [`Revision::INITIAL`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read a document's current content and revision.
    ///
    /// # Errors
    /// - Storage/I/O errors
    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision>;

    /// Replace a document's content if it is still at `expected`.
    ///
    /// # Postconditions
    /// - On `Committed(r)`, the document holds `content` at `r == expected.next()`
    /// - On `RevisionMismatch`, the document is unchanged
    ///
    /// # Errors
    /// - Storage/I/O errors (the document is left unchanged)
    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome>;
}
