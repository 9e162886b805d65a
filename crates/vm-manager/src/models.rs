//! Models for container creation requests and inspection results.

use std::collections::HashMap;
use testbox_common::types::ContainerId;

/// Port the sandbox's SSH daemon listens on inside the container.
pub const SSH_PORT: u16 = 22;

/// Request for creating a new sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Command run as PID 1
    pub cmd: Vec<String>,
    /// Image id to create the container from
    pub image: String,
    /// Relative CPU share weight
    pub cpu_shares: i64,
    /// Memory ceiling in bytes
    pub memory_bytes: i64,
    /// Hostname inside the container
    pub hostname: String,
    /// Container ports to publish on the host (TCP)
    pub exposed_ports: Vec<u16>,
    /// Run with extended privileges
    pub privileged: bool,
}

impl ContainerSpec {
    /// Create a new container spec for the given image and hostname.
    ///
    /// Defaults: `/sbin/init` as PID 1, one CPU share, 2 GiB of memory and
    /// port 22 published.
    pub fn new(image: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            cmd: vec!["/sbin/init".to_string()],
            image: image.into(),
            cpu_shares: 1,
            memory_bytes: 2 * 1024 * 1024 * 1024,
            hostname: hostname.into(),
            exposed_ports: vec![SSH_PORT],
            privileged: false,
        }
    }

    /// Set the command run as PID 1.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Set the CPU share weight.
    pub fn with_cpu_shares(mut self, cpu_shares: i64) -> Self {
        self.cpu_shares = cpu_shares;
        self
    }

    /// Set the memory ceiling in bytes.
    pub fn with_memory_bytes(mut self, memory_bytes: i64) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }

    /// Run the container privileged.
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }
}

/// State of a created container as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Backend container id
    pub id: ContainerId,
    /// Whether the container's main process is running
    pub running: bool,
    /// Container TCP port -> host port
    pub ports: HashMap<u16, u16>,
}

impl ContainerInfo {
    /// Create a container info with no published ports.
    pub fn new(id: ContainerId, running: bool) -> Self {
        Self {
            id,
            running,
            ports: HashMap::new(),
        }
    }

    /// Add a published port mapping.
    pub fn with_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Host port the given container port is published on.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }

    /// Host port of the SSH daemon.
    pub fn ssh_port(&self) -> Option<u16> {
        self.host_port(SSH_PORT)
    }
}
