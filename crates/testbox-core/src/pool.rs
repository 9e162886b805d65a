//! Fixed pool of named sandbox slots.

use crate::machine::{RemoveOutcome, VirtualMachine};
use crate::provider::Provider;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A sandbox slot, locked by whichever task is driving it.
pub type VmSlot = Arc<Mutex<VirtualMachine>>;

/// Names for `count` slots: `{prefix}-1` through `{prefix}-{count}`.
pub fn vm_names(count: usize, prefix: &str) -> Vec<String> {
    (1..=count).map(|n| format!("{prefix}-{n}")).collect()
}

/// One sandbox per configured slot.
///
/// Slots are independent; each is meant to be driven by its own task.
pub struct VmPool {
    slots: Vec<VmSlot>,
}

impl VmPool {
    /// Create `vms.count` slots named after `vms.name_prefix`.
    pub fn new(provider: &Provider) -> Self {
        let config = provider.config();
        Self::with_names(provider, vm_names(config.vms.count, &config.vms.name_prefix))
    }

    /// Create one slot per name.
    pub fn with_names(provider: &Provider, names: impl IntoIterator<Item = String>) -> Self {
        let slots: Vec<VmSlot> = names
            .into_iter()
            .map(|name| Arc::new(Mutex::new(provider.vm(name))))
            .collect();

        tracing::info!(slots = slots.len(), "Created sandbox pool");
        Self { slots }
    }

    /// All slots, in name order.
    pub fn slots(&self) -> &[VmSlot] {
        &self.slots
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Destroy every slot's container.
    ///
    /// Waits for each slot's current holder to release it.
    pub async fn shutdown(&self) {
        tracing::info!(slots = self.slots.len(), "Shutting down sandbox pool");

        let mut destroyed = 0usize;
        let mut failed = 0usize;
        for slot in &self.slots {
            let mut vm = slot.lock().await;
            if vm.container_id().is_none() {
                continue;
            }

            match vm.destroy_server().await {
                RemoveOutcome::Failed(e) => {
                    failed += 1;
                    tracing::error!(vm = %vm.name(), error = %e, "Failed to destroy sandbox during shutdown");
                }
                _ => destroyed += 1,
            }
        }

        tracing::info!(destroyed, failed, "Pool shutdown complete");
    }
}
