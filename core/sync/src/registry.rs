//! Process-wide table of active sync sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

use microsync_common::{DocumentId, Error, Result, ServiceName};

use crate::state::SessionId;

/// Identity of a session: the (service, document) pair it syncs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub service: ServiceName,
    pub document: DocumentId,
}

impl SessionKey {
    /// Create a key for `service` pulled into `document`.
    pub fn new(service: ServiceName, document: DocumentId) -> Self {
        Self { service, document }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.service, self.document)
    }
}

/// Registry guaranteeing at most one live session per [`SessionKey`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashMap<SessionKey, SessionId>>,
}

static GLOBAL: OnceLock<Arc<SessionRegistry>> = OnceLock::new();

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The registry shared by every engine in the process.
    pub fn global() -> Arc<SessionRegistry> {
        GLOBAL.get_or_init(|| Arc::new(SessionRegistry::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, SessionId>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key` for session `id`.
    ///
    /// The check and the insert happen under one lock acquisition, so two
    /// racing claims for the same key cannot both succeed. The returned
    /// [`Registration`] releases the key when dropped.
    ///
    /// # Errors
    /// - `AlreadyRunning` if another session holds the key
    pub fn register(self: &Arc<Self>, key: SessionKey, id: SessionId) -> Result<Registration> {
        let mut active = self.lock();
        if active.contains_key(&key) {
            return Err(Error::AlreadyRunning {
                service: key.service.to_string(),
                document: key.document.to_string(),
            });
        }
        active.insert(key.clone(), id);
        debug!("Registered session {} for {}", id, key);

        Ok(Registration {
            registry: Arc::clone(self),
            key,
            id,
        })
    }

    /// Check if a live session holds `key`.
    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Session currently holding `key`, if any.
    pub fn session_for(&self, key: &SessionKey) -> Option<SessionId> {
        self.lock().get(key).copied()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &SessionKey, id: SessionId) {
        let mut active = self.lock();
        // Only the owning session may remove its entry.
        if active.get(key) == Some(&id) {
            active.remove(key);
            debug!("Released session {} for {}", id, key);
        }
    }
}

/// Ownership of a registry entry; releases it on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    key: SessionKey,
    id: SessionId,
}

impl Registration {
    /// Key this registration holds.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Session owning the entry.
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}
