//! Common types and configuration shared across the testbox worker.
//!
//! This crate provides:
//! - Core domain types (ContainerId, Image)
//! - The worker configuration and its loader
//! - Configuration error types

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use config::WorkerConfig;
pub use error::{ConfigError, Result};
pub use types::{ContainerId, Image};
