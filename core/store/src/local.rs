//! Local filesystem document store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{DocumentStore, WriteOutcome};
use microsync_common::{Content, DocumentId, DocumentRevision, Error, Result, Revision};

/// Characters kept verbatim in document file names.
const FILE_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Write locks shared by every store opened on the same root.
static ROOT_LOCKS: OnceLock<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

fn root_lock(root: &Path) -> Arc<Mutex<()>> {
    let mut locks = ROOT_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks.entry(root.to_path_buf()).or_default().clone()
}

/// On-disk representation of one document.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    revision: Revision,
    updated_at: DateTime<Utc>,
    content: Content,
}

/// Local filesystem document store.
///
/// Keeps one JSON file per document under a root directory. Writes go to a
/// temporary file that is renamed over the previous version, so a reader
/// never observes a half-written document. Conditional writes are
/// serialized across every `LocalStore` in the process that shares the same
/// root directory.
pub struct LocalStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        let root = std::fs::canonicalize(&root)?;
        let write_lock = root_lock(&root);

        Ok(Self { root, write_lock })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &DocumentId) -> PathBuf {
        let file_name = utf8_percent_encode(id.as_str(), FILE_NAME_SET).to_string();
        self.root.join(format!("{}.json", file_name))
    }

    async fn load(&self, id: &DocumentId) -> Result<Option<StoredDocument>> {
        let path = self.document_path(id);
        match fs::read(&path).await {
            Ok(bytes) => {
                let stored = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Storage(format!("Corrupt document {}: {}", id, e))
                })?;
                Ok(Some(stored))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to a uniquely named sibling file and rename it over `path`.
/// The temporary file is removed if either step fails.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    let written = match fs::write(&tmp_path, bytes).await {
        Ok(()) => fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", tmp_path.display(), cleanup);
            }
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision> {
        Ok(self
            .load(id)
            .await?
            .map(|stored| DocumentRevision {
                content: stored.content,
                revision: stored.revision,
            })
            .unwrap_or_default())
    }

    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome> {
        let _guard = self.write_lock.lock().await;

        let current = self
            .load(id)
            .await?
            .map(|stored| stored.revision)
            .unwrap_or(Revision::INITIAL);
        if current != expected {
            return Ok(WriteOutcome::RevisionMismatch { current });
        }

        let revision = current.next();
        let stored = StoredDocument {
            revision,
            updated_at: Utc::now(),
            content,
        };
        let bytes = serde_json::to_vec_pretty(&stored)?;

        write_atomically(&self.document_path(id), &bytes).await?;

        debug!("Wrote document {} at revision {}", id, revision);
        Ok(WriteOutcome::Committed(revision))
    }
}
