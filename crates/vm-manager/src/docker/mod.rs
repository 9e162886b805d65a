//! Docker implementation of the container backend.

pub mod backend;
pub mod mapper;

pub use backend::DockerBackend;
