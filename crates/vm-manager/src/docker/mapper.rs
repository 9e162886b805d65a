//! Type conversion between backend models and bollard's Docker API types.

use crate::error::BackendError;
use crate::models::{ContainerInfo, ContainerSpec};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse, HostConfig, ImageSummary, PortMap};
use std::collections::HashMap;
use testbox_common::types::{ContainerId, Image};

/// Build the create request for `spec`, publishing its exposed ports.
pub fn to_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let exposed_ports = spec
        .exposed_ports
        .iter()
        .map(|port| (format!("{port}/tcp"), HashMap::new()))
        .collect();

    ContainerCreateBody {
        cmd: Some(spec.cmd.clone()),
        image: Some(spec.image.clone()),
        hostname: Some(spec.hostname.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            cpu_shares: Some(spec.cpu_shares),
            memory: Some(spec.memory_bytes),
            // Exposed ports get a random host port each
            publish_all_ports: Some(true),
            privileged: spec.privileged.then_some(true),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

/// Read the running flag and published TCP ports of a container.
pub fn from_inspect(response: ContainerInspectResponse) -> Result<ContainerInfo, BackendError> {
    let id = response
        .id
        .ok_or_else(|| BackendError::Other("missing id in inspect response".to_string()))?;

    let running = response
        .state
        .and_then(|state| state.running)
        .unwrap_or(false);

    let ports = response
        .network_settings
        .and_then(|settings| settings.ports)
        .map(|ports| from_port_map(&ports))
        .unwrap_or_default();

    Ok(ContainerInfo {
        id: ContainerId::from_string(id),
        running,
        ports,
    })
}

/// Collect `"22/tcp" -> [{HostPort: "49153"}]` entries into `22 -> 49153`.
fn from_port_map(ports: &PortMap) -> HashMap<u16, u16> {
    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let (port, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            if proto != "tcp" {
                return None;
            }
            let container_port = port.parse::<u16>().ok()?;
            let host_port = bindings
                .as_ref()?
                .iter()
                .find_map(|binding| binding.host_port.as_deref()?.parse::<u16>().ok())?;
            Some((container_port, host_port))
        })
        .collect()
}

/// One [`Image`] per `repo:tag` reference of a local image.
///
/// Untagged images yield nothing.
pub fn from_image_summary(summary: &ImageSummary) -> Vec<Image> {
    summary
        .repo_tags
        .iter()
        .filter_map(|reference| Image::from_reference(reference, &summary.id))
        .collect()
}

/// Classify a bollard error, mapping 404 to [`BackendError::NotFound`]
/// and transport failures to [`BackendError::Connection`].
pub fn from_bollard_error(error: BollardError) -> BackendError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BackendError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => BackendError::Server {
            status: status_code,
            message,
        },
        e @ (BollardError::IOError { .. }
        | BollardError::RequestTimeoutError
        | BollardError::SocketNotFoundError(_)
        | BollardError::HyperResponseError { .. }) => BackendError::Connection(e.to_string()),
        e => BackendError::Other(e.to_string()),
    }
}
