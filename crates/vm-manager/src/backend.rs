//! Container backend trait.

use crate::error::Result;
use crate::models::{ContainerInfo, ContainerSpec};
use async_trait::async_trait;
use std::time::Duration;
use testbox_common::types::{ContainerId, Image};

/// Result of waiting for a container to come up.
#[derive(Debug)]
pub enum BootOutcome {
    /// The container reported itself running
    Ready,
    /// The container never reported running within the window
    TimedOut,
    /// Inspecting the container failed
    Errored(crate::BackendError),
}

/// Trait for the remote container-management API.
///
/// This abstraction allows the Docker implementation to be swapped for
/// another backend (or a test double) without changing lifecycle logic.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create a container from the given spec.
    ///
    /// # Returns
    /// The backend id of the new (not yet started) container.
    async fn create_container(&self, spec: ContainerSpec) -> Result<ContainerId>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Get the running state and port mappings of a container.
    ///
    /// # Errors
    /// Returns [`BackendError::NotFound`](crate::BackendError::NotFound) if
    /// the container doesn't exist.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo>;

    /// Stop a running container.
    async fn stop_container(&self, id: &ContainerId) -> Result<()>;

    /// Remove a container and its anonymous volumes.
    async fn remove_container(&self, id: &ContainerId) -> Result<()>;

    /// List all images known to the backend.
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// Poll a container's running flag until it is set.
    ///
    /// # Arguments
    /// * `id` - Container to poll
    /// * `retries` - Number of polls before giving up
    /// * `interval` - Delay between polls
    async fn wait_until_running(
        &self,
        id: &ContainerId,
        retries: u32,
        interval: Duration,
    ) -> BootOutcome {
        for poll in 1..=retries.max(1) {
            match self.inspect_container(id).await {
                Ok(info) if info.running => return BootOutcome::Ready,
                Ok(_) => {
                    tracing::trace!(container_id = %id, poll, "Container not running yet");
                }
                Err(e) => return BootOutcome::Errored(e),
            }

            if poll < retries {
                tokio::time::sleep(interval).await;
            }
        }

        BootOutcome::TimedOut
    }
}
