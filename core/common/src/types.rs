//! Common types used throughout MicroSync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document content: a JSON object of top-level properties.
pub type Content = serde_json::Map<String, serde_json::Value>;

/// Name of a remote micro-service, resolved by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(String);

impl ServiceName {
    /// Create a new ServiceName from a string.
    ///
    /// # Errors
    /// - Returns error if name is empty
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ServiceName cannot be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a document in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new DocumentId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "DocumentId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing revision marker of a stored document.
///
/// Revision 0 means the document has never been written.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Revision(u64);

impl Revision {
    /// Revision of a document that does not exist yet.
    pub const INITIAL: Revision = Revision(0);

    /// Create a revision from its raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The revision a successful write on top of this one produces.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document's content together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentRevision {
    /// Current content.
    pub content: Content,
    /// Revision of `content`.
    pub revision: Revision,
}

impl DocumentRevision {
    /// State of a document that has never been written.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Full-state snapshot returned by a remote service.
///
/// Payloads are never deltas: each one describes the complete document.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(Content);

impl Payload {
    /// Wrap already decoded content.
    pub fn new(content: Content) -> Self {
        Self(content)
    }

    /// Decode a response body.
    ///
    /// # Errors
    /// - `PermanentFetch` if the body is not a JSON object; a malformed
    ///   response will not improve on retry
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            crate::Error::PermanentFetch(format!("Malformed response: {}", e))
        })?;
        match value {
            serde_json::Value::Object(content) => Ok(Self(content)),
            other => Err(crate::Error::PermanentFetch(format!(
                "Expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Borrow the snapshot content.
    pub fn content(&self) -> &Content {
        &self.0
    }

    /// Take the snapshot content.
    pub fn into_content(self) -> Content {
        self.0
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
