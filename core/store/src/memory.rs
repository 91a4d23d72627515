//! In-memory document store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::store::{DocumentStore, WriteOutcome};
use microsync_common::{Content, DocumentId, DocumentRevision, Result, Revision};

/// In-memory document store.
///
/// Useful for testing and embedding. All data is stored in memory
/// and lost on drop.
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, DocumentRevision>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents that have been written at least once.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no document has been written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(id).cloned().unwrap_or_default())
    }

    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome> {
        // Compare and swap under one write lock.
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let current = documents
            .get(id)
            .map(|doc| doc.revision)
            .unwrap_or(Revision::INITIAL);

        if current != expected {
            return Ok(WriteOutcome::RevisionMismatch { current });
        }

        let revision = current.next();
        documents.insert(id.clone(), DocumentRevision { content, revision });
        Ok(WriteOutcome::Committed(revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(value: serde_json::Value) -> Content {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_document_reads_empty() {
        let store = MemoryStore::new();
        let id = DocumentId::new("doc1").unwrap();

        let doc = store.read_document(&id).await.unwrap();
        assert!(doc.content.is_empty());
        assert_eq!(doc.revision, Revision::INITIAL);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_write_advances_revision() {
        let store = MemoryStore::new();
        let id = DocumentId::new("doc1").unwrap();

        let outcome = store
            .write_document(&id, content(json!({"name": "tiger"})), Revision::INITIAL)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Committed(Revision::new(1)));

        let doc = store.read_document(&id).await.unwrap();
        assert_eq!(doc.revision, Revision::new(1));
        assert_eq!(doc.content["name"], "tiger");
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = MemoryStore::new();
        let id = DocumentId::new("doc1").unwrap();

        store
            .write_document(&id, content(json!({"name": "cat"})), Revision::INITIAL)
            .await
            .unwrap();

        let outcome = store
            .write_document(&id, content(json!({"name": "lion"})), Revision::INITIAL)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WriteOutcome::RevisionMismatch {
                current: Revision::new(1)
            }
        );

        let doc = store.read_document(&id).await.unwrap();
        assert_eq!(doc.content["name"], "cat");
    }
}
