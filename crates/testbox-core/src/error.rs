//! Error types for testbox-core.

use std::time::Duration;
use testbox_common::types::ContainerId;
use testbox_vm_manager::BackendError;
use thiserror::Error;

/// Result type alias for testbox-core operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during sandbox lifecycle operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Not even the default image is available; the catalog is broken
    #[error("no image tagged '{tag}' in repository '{repository}'")]
    ImageNotFound {
        /// Repository that was searched
        repository: String,
        /// Default tag that was expected
        tag: String,
    },

    /// The container was created but never reported running
    #[error("container {} did not boot within {waited:?}", .container_id.short())]
    BootTimeout {
        /// Container that failed to come up
        container_id: ContainerId,
        /// Length of the polling window
        waited: Duration,
    },

    /// Creating or starting the container failed
    #[error("failed to boot container: {0}")]
    Boot(#[source] BackendError),

    /// Stopping the container failed
    #[error("failed to stop container: {0}")]
    ContainerStop(#[source] BackendError),

    /// Removing the container failed
    #[error("failed to remove container: {0}")]
    ContainerRemove(#[source] BackendError),

    /// Listing images or inspecting a container failed outside of boot
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The container's SSH port is not published on the host
    #[error("container {} has no host port for 22/tcp", .0.short())]
    PortNotMapped(ContainerId),

    /// Opening or closing the shell session failed
    #[error("shell session error: {0}")]
    Session(String),

    /// Encoding a message for publishing failed
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The exchange rejected a message
    #[error("failed to publish to '{routing_key}': {message}")]
    Publish {
        /// Routing key of the rejected message
        routing_key: String,
        /// Reason reported by the exchange
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Check if the outer boot budget should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::BootTimeout { .. } | ProviderError::Boot(_)
        )
    }
}
