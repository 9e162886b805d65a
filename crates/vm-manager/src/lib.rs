//! Container backend abstraction layer for the testbox worker.
//!
//! This crate provides:
//! - `ContainerBackend` trait for container lifecycle operations
//! - Models for container creation requests and inspection results
//! - A Docker implementation built on bollard

pub mod backend;
pub mod docker;
pub mod error;
pub mod models;

// Re-export main types
pub use backend::{BootOutcome, ContainerBackend};
pub use docker::DockerBackend;
pub use error::{BackendError, Result};
pub use models::{ContainerInfo, ContainerSpec, SSH_PORT};
