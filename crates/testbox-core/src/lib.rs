//! # testbox-core
//!
//! Sandbox lifecycle management for a CI worker.
//!
//! Each job runs in a fresh container booted from an image picked by the
//! job's language. The job gets a shell session into the container, and the
//! container is torn down however the job ends.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   testbox-core (worker)                  │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │    Provider     │────▶│  ImageCatalog            │   │
//! │  │  - prepare()    │     │  - resolve(lang, over)   │   │
//! │  │  - vm()         │     └──────────────────────────┘   │
//! │  │  - pool()       │                                    │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ VirtualMachine  │────▶│  ContainerBackend        │   │
//! │  │ - create_server │     │  (from vm-manager)       │   │
//! │  │ - sandboxed()   │     └──────────────────────────┘   │
//! │  │ - destroy_server│                │ Docker API        │
//! │  └─────────────────┘                ▼                   │
//! │           │              ┌──────────────────────────┐   │
//! │  ┌─────────────────┐     │  Container, port 22      │   │
//! │  │ SessionFactory  │────▶│  published on 127.0.0.1  │   │
//! │  │  - open()       │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use testbox_core::{MetricsRegistry, Provider, TcpSessionFactory};
//! use testbox_vm_manager::DockerBackend;
//!
//! # async fn example(config: testbox_common::WorkerConfig) -> testbox_core::Result<()> {
//! let backend = Arc::new(DockerBackend::connect(None)?);
//! let provider = Provider::new(
//!     config,
//!     backend,
//!     Arc::new(TcpSessionFactory::new()),
//!     Arc::new(MetricsRegistry::new()),
//! )
//! .await?;
//! provider.prepare();
//!
//! let mut vm = provider.vm("worker-1");
//! let banner = vm
//!     .sandboxed(Some("python"), |session| async move {
//!         Ok::<_, testbox_core::ProviderError>(session.server_id().map(str::to_string))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Image Selection**: Override prefix, language tag, default fallback
//! - **Bounded Boot**: Retried boots that never leak containers
//! - **Guaranteed Teardown**: Session closed and container removed on every exit
//! - **Pooling**: Named slots, one task per slot

mod error;
mod hostname;
mod image;
mod machine;
mod metrics;
mod pool;
mod provider;
mod publisher;
mod retry;
mod session;

#[cfg(test)]
mod testing;

pub use error::{ProviderError, Result};
pub use hostname::sandbox_hostname;
pub use image::ImageCatalog;
pub use machine::{RemoveOutcome, VirtualMachine, VmState};
pub use metrics::{
    Meter, Metrics, MetricsRegistry, MetricsSnapshot, Timer, TimerSnapshot, BOOT_ERROR,
    BOOT_TIMEOUT, BOOT_TIMER, REMOVE_UNREACHABLE,
};
pub use pool::{vm_names, VmPool, VmSlot};
pub use provider::Provider;
pub use publisher::{
    Exchange, PublishOptions, Publisher, COMMANDS_ROUTING_KEY, JSON_CONTENT_TYPE,
    REPORTING_ROUTING_KEY,
};
pub use retry::RetryPolicy;
pub use session::{SessionFactory, SessionParams, SharedSession, ShellSession, TcpSessionFactory};
