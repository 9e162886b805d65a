use crate::backend::ContainerBackend;
use crate::docker::mapper;
use crate::error::{BackendError, Result};
use crate::models::{ContainerInfo, ContainerSpec};
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, ListImagesOptions,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use std::path::Path;
use testbox_common::types::{ContainerId, Image};

/// Timeout for requests to the Docker daemon, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Seconds the daemon waits for a graceful stop before killing.
const STOP_GRACE_SECS: i32 = 10;

/// Docker answers 304 when stopping a container that isn't running.
const NOT_MODIFIED: u16 = 304;

/// [`ContainerBackend`] talking to a Docker daemon through bollard.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect to the local daemon, or to the given socket path.
    pub fn connect(socket: Option<&Path>) -> Result<Self> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                &path.to_string_lossy(),
                DOCKER_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| BackendError::Connection(format!("failed to connect to Docker: {e}")))?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_container(&self, spec: ContainerSpec) -> Result<ContainerId> {
        let body = mapper::to_create_body(&spec);
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(mapper::from_bollard_error)?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, warning = %warning, "Docker create warning");
        }

        Ok(ContainerId::from_string(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions>)
            .await
            .map_err(mapper::from_bollard_error)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(mapper::from_bollard_error)?;

        mapper::from_inspect(response)
    }

    async fn stop_container(&self, id: &ContainerId) -> Result<()> {
        let options = StopContainerOptionsBuilder::new().t(STOP_GRACE_SECS).build();
        match self.docker.stop_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: NOT_MODIFIED,
                ..
            }) => {
                tracing::debug!(container_id = %id, "Container was already stopped");
                Ok(())
            }
            Err(e) => Err(mapper::from_bollard_error(e)),
        }
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::new()
            .force(true)
            .v(true)
            .build();

        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(mapper::from_bollard_error)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        let summaries = self
            .docker
            .list_images(None::<ListImagesOptions>)
            .await
            .map_err(mapper::from_bollard_error)?;

        Ok(summaries.iter().flat_map(mapper::from_image_summary).collect())
    }
}
