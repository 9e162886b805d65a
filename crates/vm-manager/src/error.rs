//! Error types reported by container backends.

use thiserror::Error;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that a container backend can report.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The container or image does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend answered with an error status
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status reported by the backend
        status: u16,
        /// Error message reported by the backend
        message: String,
    },

    /// The backend could not be reached
    #[error("backend unreachable: {0}")]
    Connection(String),

    /// Any other failure (malformed response, client-side error)
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Check if this error means the target is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    /// Check if the backend reported an error status.
    pub fn is_server_error(&self) -> bool {
        matches!(self, BackendError::Server { .. })
    }

    /// Check if the backend itself was unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BackendError::Connection(_))
    }
}
