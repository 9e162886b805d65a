//! Domain types used throughout the testbox worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest prefix the Docker API puts in front of image and container ids.
const DIGEST_PREFIX: &str = "sha256:";

/// Opaque identifier of a container, as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Create a container ID from a string.
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first twelve characters, as `docker ps` prints them.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An immutable base image descriptor.
///
/// One backend image with several `repository:tag` references is represented
/// by one `Image` per reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    /// Repository the image belongs to (e.g. `travis`).
    pub repository: String,
    /// Tag within the repository, usually a language name (e.g. `ruby`).
    pub tag: String,
    /// Image id without the `sha256:` digest prefix.
    pub id: String,
}

impl Image {
    /// Create a new image descriptor, normalizing the id.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = id.strip_prefix(DIGEST_PREFIX).map(str::to_string).unwrap_or(id);
        Self {
            repository: repository.into(),
            tag: tag.into(),
            id,
        }
    }

    /// Parse a `repository:tag` reference into an image with the given id.
    ///
    /// Returns `None` for dangling references (`<none>:<none>`) and references
    /// without a tag.
    pub fn from_reference(reference: &str, id: &str) -> Option<Self> {
        let (repository, tag) = reference.rsplit_once(':')?;
        // A colon inside the last path segment's registry port is not a tag.
        if tag.contains('/') || repository.is_empty() || tag.is_empty() {
            return None;
        }
        if repository == "<none>" || tag == "<none>" {
            return None;
        }
        Some(Self::new(repository, tag, id))
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.repository, self.tag, self.id)
    }
}
