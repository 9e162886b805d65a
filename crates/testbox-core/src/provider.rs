//! Provider: shared context for every sandbox of a worker.

use crate::error::Result;
use crate::image::ImageCatalog;
use crate::machine::VirtualMachine;
use crate::metrics::Metrics;
use crate::pool::VmPool;
use crate::session::SessionFactory;
use std::sync::{Arc, RwLock};
use testbox_common::WorkerConfig;
use testbox_vm_manager::ContainerBackend;

/// State shared by the provider and all sandboxes it hands out.
pub(crate) struct ProviderContext {
    pub(crate) backend: Arc<dyn ContainerBackend>,
    pub(crate) sessions: Arc<dyn SessionFactory>,
    pub(crate) metrics: Arc<dyn Metrics>,
    pub(crate) catalog: ImageCatalog,
    config: RwLock<Arc<WorkerConfig>>,
}

impl ProviderContext {
    /// Current configuration.
    pub(crate) fn config(&self) -> Arc<WorkerConfig> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&config)
    }
}

/// Hands out sandboxes backed by one container backend.
///
/// Cloning is cheap; clones share the backend, image catalog and
/// configuration.
#[derive(Clone)]
pub struct Provider {
    context: Arc<ProviderContext>,
}

impl Provider {
    /// Create a provider, loading the image catalog from the backend.
    ///
    /// # Errors
    /// Returns an error if the backend's images cannot be listed.
    pub async fn new(
        config: WorkerConfig,
        backend: Arc<dyn ContainerBackend>,
        sessions: Arc<dyn SessionFactory>,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Self> {
        let catalog = ImageCatalog::load(backend.as_ref(), &config).await?;
        Ok(Self::with_catalog(config, backend, sessions, metrics, catalog))
    }

    /// Create a provider around an already loaded image catalog.
    pub fn with_catalog(
        config: WorkerConfig,
        backend: Arc<dyn ContainerBackend>,
        sessions: Arc<dyn SessionFactory>,
        metrics: Arc<dyn Metrics>,
        catalog: ImageCatalog,
    ) -> Self {
        Self {
            context: Arc::new(ProviderContext {
                backend,
                sessions,
                metrics,
                catalog,
                config: RwLock::new(Arc::new(config)),
            }),
        }
    }

    /// Log the images jobs can run on.
    pub fn prepare(&self) {
        let config = self.config();

        for image in self.context.catalog.images() {
            tracing::info!(
                repository = %image.repository,
                tag = %image.tag,
                image_id = %image.id,
                "Image available"
            );
        }

        if let Err(e) = self.context.catalog.default_image() {
            tracing::warn!(error = %e, "Default image missing, unmatched jobs will fail");
        }

        if let Some(image_override) = config.image_override() {
            tracing::info!(image_override, "Image override set, ignoring language hints");
        }
    }

    /// Create an unprovisioned sandbox called `name`.
    pub fn vm(&self, name: impl Into<String>) -> VirtualMachine {
        VirtualMachine::new(name, Arc::clone(&self.context))
    }

    /// Create one sandbox per configured slot.
    pub fn pool(&self) -> VmPool {
        VmPool::new(self)
    }

    /// Image catalog loaded at construction.
    pub fn catalog(&self) -> &ImageCatalog {
        &self.context.catalog
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<WorkerConfig> {
        self.context.config()
    }

    /// Replace the configuration.
    ///
    /// Later operations use the new values. Sandboxes keep the hostname they
    /// were created with, and the image catalog is not reloaded.
    pub fn reload_config(&self, config: WorkerConfig) {
        let mut current = self.context.config.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(config);
        tracing::info!("Configuration reloaded");
    }
}
