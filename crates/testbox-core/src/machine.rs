//! Sandbox instances and their container lifecycle.
//!
//! A [`VirtualMachine`] is one named sandbox slot. It boots a container on
//! demand, hands out a shell session into it and tears it down again:
//!
//! ```text
//! Unprovisioned ──create──> Booting ──running──> Ready ──sandboxed──> InUse
//!       ^                      │                   │                    │
//!       │                      └──failed attempt───┤<───────────────────┘
//!       │                                          v
//!       └──────────────────────────────────── Destroying
//! ```
//!
//! All methods take `&mut self`, so one task drives one sandbox at a time.

use crate::error::{ProviderError, Result};
use crate::hostname::sandbox_hostname;
use crate::metrics::{BOOT_ERROR, BOOT_TIMEOUT, BOOT_TIMER, REMOVE_UNREACHABLE};
use crate::provider::ProviderContext;
use crate::retry::RetryPolicy;
use crate::session::{SessionParams, SharedSession};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use testbox_common::types::{ContainerId, Image};
use testbox_common::WorkerConfig;
use testbox_vm_manager::{BackendError, BootOutcome, ContainerSpec};
use tokio::time::Instant;

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No container
    Unprovisioned,
    /// Container created, waiting for it to run
    Booting,
    /// Container running
    Ready,
    /// Container running a job
    InUse,
    /// Container being stopped and removed
    Destroying,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmState::Unprovisioned => "unprovisioned",
            VmState::Booting => "booting",
            VmState::Ready => "ready",
            VmState::InUse => "in_use",
            VmState::Destroying => "destroying",
        };
        f.write_str(s)
    }
}

/// How removing a container ended.
#[derive(Debug)]
pub enum RemoveOutcome {
    /// The backend removed the container
    Removed,
    /// There was nothing to remove
    AlreadyAbsent,
    /// Every attempt failed; the container may still exist
    Failed(BackendError),
}

impl RemoveOutcome {
    /// Check if the container is known to be gone.
    pub fn is_gone(&self) -> bool {
        !matches!(self, RemoveOutcome::Failed(_))
    }
}

/// A named sandbox slot.
pub struct VirtualMachine {
    name: String,
    hostname: String,
    context: Arc<ProviderContext>,
    container: Option<ContainerId>,
    session: Option<SharedSession>,
    state: VmState,
    booted_at: Option<DateTime<Utc>>,
}

impl VirtualMachine {
    pub(crate) fn new(name: impl Into<String>, context: Arc<ProviderContext>) -> Self {
        let name = name.into();
        let hostname = sandbox_hostname(&name, &context.config().host, std::process::id());

        Self {
            name,
            hostname,
            context,
            container: None,
            session: None,
            state: VmState::Unprovisioned,
            booted_at: None,
        }
    }

    /// Logical name of the slot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `{host}:travis-{name}`, as it appears in logs.
    pub fn full_name(&self) -> String {
        format!("{}:travis-{}", self.context.config().host, self.name)
    }

    /// Hostname containers of this slot run under.
    ///
    /// Fixed when the slot is created.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Id of the current container, if any.
    pub fn container_id(&self) -> Option<&ContainerId> {
        self.container.as_ref()
    }

    /// When the current container finished booting.
    pub fn booted_at(&self) -> Option<DateTime<Utc>> {
        self.booted_at
    }

    /// Boot a container for a job in `language`.
    ///
    /// The image is resolved from the catalog, then up to `boot.attempts`
    /// boots are tried. A failed attempt removes whatever container it
    /// created before the next one starts.
    ///
    /// # Errors
    /// [`ProviderError::ImageNotFound`] if no image can be selected, otherwise
    /// the error of the last boot attempt.
    pub async fn create_server(&mut self, language: Option<&str>) -> Result<()> {
        if self.container.is_some() {
            tracing::warn!(vm = %self.name, "Sandbox already provisioned, destroying first");
            self.destroy_server().await;
        }

        let config = self.context.config();
        let image = self
            .context
            .catalog
            .resolve(language, config.image_override())?
            .clone();

        tracing::info!(
            vm = %self.full_name(),
            language,
            image = %image,
            "Creating sandbox"
        );

        let operation = format!("boot {}", self.name);
        let result = RetryPolicy::immediate(config.boot.attempts)
            .run_on(&operation, &mut *self, ProviderError::is_retryable, |vm, _attempt| {
                let image = image.clone();
                let config = Arc::clone(&config);
                async move { vm.boot(&image, &config).await }.boxed()
            })
            .await;

        if let Err(e) = &result {
            tracing::error!(vm = %self.name, error = %e, "Could not boot sandbox");
        }
        result
    }

    /// One create, start and wait cycle.
    async fn boot(&mut self, image: &Image, config: &WorkerConfig) -> Result<()> {
        let backend = Arc::clone(&self.context.backend);
        let metrics = Arc::clone(&self.context.metrics);

        let spec = ContainerSpec::new(image.id.clone(), self.hostname.clone())
            .with_cmd(config.docker.command.clone())
            .with_cpu_shares(config.docker.cpu_shares)
            .with_memory_bytes(config.docker.memory_bytes)
            .with_privileged(config.docker.privileged_support);

        let id = match backend.create_container(spec).await {
            Ok(id) => id,
            Err(e) => {
                metrics.mark(BOOT_ERROR);
                tracing::error!(vm = %self.name, error = %e, "Container creation failed");
                return Err(ProviderError::Boot(e));
            }
        };

        self.container = Some(id.clone());
        self.state = VmState::Booting;
        tracing::debug!(vm = %self.name, container_id = %id, "Container created, starting");

        let started = Instant::now();
        let outcome = match backend.start_container(&id).await {
            Ok(()) => {
                backend
                    .wait_until_running(&id, config.boot.poll_retries, config.boot.poll_interval())
                    .await
            }
            Err(e) => BootOutcome::Errored(e),
        };
        let elapsed = started.elapsed();

        match outcome {
            BootOutcome::Ready => {
                metrics.update(BOOT_TIMER, elapsed);
                self.state = VmState::Ready;
                self.booted_at = Some(Utc::now());
                tracing::info!(
                    vm = %self.name,
                    container_id = %id,
                    hostname = %self.hostname,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Sandbox booted"
                );
                Ok(())
            }
            BootOutcome::TimedOut => {
                metrics.mark(BOOT_TIMEOUT);
                tracing::error!(
                    vm = %self.name,
                    container_id = %id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Container did not start in time"
                );
                self.discard(&id).await;
                Err(ProviderError::BootTimeout {
                    container_id: id,
                    waited: elapsed,
                })
            }
            BootOutcome::Errored(e) => {
                metrics.mark(BOOT_ERROR);
                tracing::error!(vm = %self.name, container_id = %id, error = %e, "Container failed to start");
                self.discard(&id).await;
                Err(ProviderError::Boot(e))
            }
        }
    }

    /// Force-remove a container from a failed boot, once.
    async fn discard(&mut self, id: &ContainerId) {
        if let Err(e) = self.context.backend.remove_container(id).await {
            if !e.is_not_found() {
                tracing::warn!(vm = %self.name, container_id = %id, error = %e, "Failed to discard container");
            }
        }
        self.container = None;
        self.session = None;
        self.state = VmState::Unprovisioned;
    }

    /// Stop and remove the current container.
    ///
    /// Does nothing without a container. Failures are logged, never
    /// returned: once this returns the slot is unprovisioned, even if the
    /// backend still holds the container.
    pub async fn destroy_server(&mut self) -> RemoveOutcome {
        let Some(id) = self.container.clone() else {
            tracing::debug!(vm = %self.name, "No container to destroy");
            return RemoveOutcome::AlreadyAbsent;
        };

        self.state = VmState::Destroying;
        tracing::info!(vm = %self.full_name(), container_id = %id, "Destroying sandbox");

        let teardown = AssertUnwindSafe(self.stop_and_remove(&id))
            .catch_unwind()
            .await;

        self.container = None;
        self.session = None;
        self.state = VmState::Unprovisioned;

        match teardown {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn stop_and_remove(&self, id: &ContainerId) -> RemoveOutcome {
        let config = self.context.config();

        self.stop(id).await;
        let outcome = self.remove(id, &config).await;

        match &outcome {
            RemoveOutcome::Removed => {
                tracing::info!(vm = %self.name, container_id = %id, "Sandbox destroyed");
            }
            RemoveOutcome::AlreadyAbsent => {
                tracing::info!(vm = %self.name, container_id = %id, "Container already gone");
            }
            RemoveOutcome::Failed(e) if e.is_unreachable() => {
                self.context.metrics.mark(REMOVE_UNREACHABLE);
                tracing::error!(
                    vm = %self.name,
                    container_id = %id,
                    error = %ProviderError::ContainerRemove(e.clone()),
                    "Backend unreachable, container may be leaked"
                );
            }
            RemoveOutcome::Failed(e) => {
                tracing::warn!(
                    vm = %self.name,
                    container_id = %id,
                    error = %ProviderError::ContainerRemove(e.clone()),
                    "Giving up on container removal"
                );
            }
        }

        outcome
    }

    async fn stop(&self, id: &ContainerId) {
        tracing::debug!(vm = %self.name, container_id = %id, "Stopping container");
        match self.context.backend.stop_container(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(vm = %self.name, container_id = %id, "Container already gone before stop");
            }
            Err(e) => {
                tracing::warn!(
                    vm = %self.name,
                    container_id = %id,
                    error = %ProviderError::ContainerStop(e),
                    "Ignoring stop failure"
                );
            }
        }
    }

    async fn remove(&self, id: &ContainerId, config: &WorkerConfig) -> RemoveOutcome {
        let backend = &self.context.backend;
        let policy = RetryPolicy::new(config.boot.remove_attempts, config.boot.remove_delay());

        let result = policy
            .run_if(
                "remove container",
                |e: &BackendError| !e.is_not_found(),
                move |attempt| {
                    tracing::debug!(container_id = %id, attempt, "Removing container");
                    backend.remove_container(id)
                },
            )
            .await;

        match result {
            Ok(()) => RemoveOutcome::Removed,
            Err(e) if e.is_not_found() => RemoveOutcome::AlreadyAbsent,
            Err(e) => RemoveOutcome::Failed(e),
        }
    }

    /// Get the shell session into the sandbox, booting one if needed.
    ///
    /// The session is opened once per container and reused until the
    /// container is destroyed.
    ///
    /// # Errors
    /// Returns an error if booting fails, the SSH port isn't published or the
    /// session can't be opened.
    pub async fn session(&mut self) -> Result<SharedSession> {
        let id = match &self.container {
            Some(id) => id.clone(),
            None => {
                self.create_server(None).await?;
                self.container
                    .clone()
                    .ok_or_else(|| ProviderError::Session("no container after boot".into()))?
            }
        };

        if let Some(session) = &self.session {
            return Ok(Arc::clone(session));
        }

        let info = self.context.backend.inspect_container(&id).await?;
        let port = info
            .ssh_port()
            .ok_or_else(|| ProviderError::PortNotMapped(id.clone()))?;

        let params = SessionParams::from_config(&self.context.config(), port);
        tracing::debug!(vm = %self.name, container_id = %id, endpoint = %params.endpoint(), "Opening shell session");

        let session = self.context.sessions.open(params).await?;
        self.session = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Close the current session, if any.
    pub async fn close_session(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    /// Run `work` inside a fresh sandbox and always tear it down.
    ///
    /// A container is booted for `language` and `work` gets a session into
    /// it. However `work` ends (value, error or panic) the session is closed
    /// and the container destroyed before this returns. Teardown failures are
    /// logged; the result is always the one of `work`, or the boot error if
    /// `work` never ran.
    pub async fn sandboxed<F, Fut, R, E>(
        &mut self,
        language: Option<&str>,
        work: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(SharedSession) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<ProviderError>,
    {
        self.create_server(language).await?;

        let result = match self.session().await {
            Ok(session) => {
                self.state = VmState::InUse;
                AssertUnwindSafe(async move { work(session).await })
                    .catch_unwind()
                    .await
            }
            Err(e) => Ok(Err(E::from(e))),
        };

        match AssertUnwindSafe(self.close_session()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(vm = %self.name, error = %e, "Failed to close shell session");
            }
            Err(_) => {
                tracing::error!(vm = %self.name, "Shell session close panicked");
            }
        }

        self.destroy_server().await;

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("container", &self.container)
            .field("state", &self.state)
            .field("booted_at", &self.booted_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::testing::{capture_logs, provider, MockBackend, MockSessions};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Harness {
        backend: Arc<MockBackend>,
        sessions: Arc<MockSessions>,
        metrics: Arc<MetricsRegistry>,
        provider: crate::Provider,
    }

    fn harness() -> Harness {
        harness_with(WorkerConfig::default())
    }

    fn harness_with(mut config: WorkerConfig) -> Harness {
        config.host = "worker.example.org".into();
        let backend = Arc::new(MockBackend::new());
        let sessions = Arc::new(MockSessions::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let provider = provider(config, &backend, &sessions, &metrics);
        Harness {
            backend,
            sessions,
            metrics,
            provider,
        }
    }

    #[derive(Debug)]
    enum JobError {
        Provider(ProviderError),
        Failed(&'static str),
    }

    impl From<ProviderError> for JobError {
        fn from(e: ProviderError) -> Self {
            JobError::Provider(e)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_server_boots_container() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");

        vm.create_server(Some("python")).await.unwrap();

        assert_eq!(vm.state(), VmState::Ready);
        assert!(vm.container_id().is_some());
        assert!(vm.booted_at().is_some());

        let state = h.backend.state();
        assert_eq!(state.created.len(), 1);
        let spec = &state.created[0];
        assert_eq!(spec.image, "3333cccc");
        assert_eq!(spec.cmd, vec!["/sbin/init".to_string()]);
        assert_eq!(spec.cpu_shares, 1);
        assert_eq!(spec.memory_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(spec.exposed_ports, vec![22]);
        assert_eq!(spec.hostname, vm.hostname());
        assert!(!spec.privileged);

        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_server_privileged() {
        let mut config = WorkerConfig::default();
        config.docker.privileged_support = true;
        let h = harness_with(config);

        h.provider.vm("ci-1").create_server(None).await.unwrap();

        let state = h.backend.state();
        assert!(state.created[0].privileged);
        assert_eq!(state.created[0].image, "1111aaaa");
    }

    #[tokio::test(start_paused = true)]
    async fn test_creation_log_names_requested_language() {
        let h = harness();
        let (logs, _guard) = capture_logs();

        h.provider.vm("ci-1").create_server(Some("python")).await.unwrap();
        h.provider.vm("ci-2").create_server(None).await.unwrap();

        let creating: Vec<String> = logs
            .contents()
            .lines()
            .filter(|line| line.contains("Creating sandbox"))
            .map(str::to_string)
            .collect();
        assert_eq!(creating.len(), 2);
        assert!(creating[0].contains("language=\"python\""), "{}", creating[0]);
        // No language requested, so none is logged
        assert!(!creating[1].contains("language"), "{}", creating[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_override_beats_language() {
        let mut config = WorkerConfig::default();
        config.image_override = Some("3333".into());
        let h = harness_with(config);

        h.provider.vm("ci-1").create_server(Some("ruby")).await.unwrap();
        assert_eq!(h.backend.state().created[0].image, "3333cccc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_retries_after_creation_failures() {
        let h = harness();
        h.backend.state().create_failures = 2;
        let mut vm = h.provider.vm("ci-1");

        vm.create_server(None).await.unwrap();

        assert_eq!(vm.state(), VmState::Ready);
        assert_eq!(h.backend.state().created.len(), 1);
        assert_eq!(h.metrics.meter(BOOT_ERROR).count(), 2);
        // Only the successful boot is timed
        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_retries_after_start_failures() {
        let h = harness();
        h.backend.state().start_failures = 2;
        let mut vm = h.provider.vm("ci-1");

        vm.create_server(None).await.unwrap();

        assert_eq!(vm.state(), VmState::Ready);
        let state = h.backend.state();
        assert_eq!(state.created.len(), 3);
        assert_eq!(state.remove_calls.len(), 2);
        assert_eq!(state.live.len(), 1);
        drop(state);

        assert_eq!(h.metrics.meter(BOOT_ERROR).count(), 2);
        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_recovers_after_timeouts() {
        let h = harness();
        h.backend.state().timeouts_remaining = 2;
        let mut vm = h.provider.vm("ci-1");

        let start = Instant::now();
        vm.create_server(None).await.unwrap();

        assert_eq!(vm.state(), VmState::Ready);
        let id = vm.container_id().cloned().unwrap();
        let state = h.backend.state();
        assert_eq!(state.created.len(), 3);
        assert_eq!(state.remove_calls.len(), 2);
        assert!(!state.remove_calls.contains(&id));
        assert_eq!(state.live.len(), 1);
        assert!(state.live.contains(&id));
        drop(state);

        assert_eq!(h.metrics.meter(BOOT_TIMEOUT).count(), 2);
        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 1);
        // Two full waits of 10 polls, 2s apart
        assert_eq!(start.elapsed(), Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_timeout_exhausts_attempts() {
        let h = harness();
        h.backend.state().timeouts_remaining = 3;
        let mut vm = h.provider.vm("ci-1");

        let start = Instant::now();
        let result = vm.create_server(None).await;

        assert!(matches!(result, Err(ProviderError::BootTimeout { .. })));
        assert_eq!(vm.state(), VmState::Unprovisioned);
        assert!(vm.container_id().is_none());

        let state = h.backend.state();
        assert_eq!(state.created.len(), 3);
        // Every timed out container is discarded
        assert_eq!(state.remove_calls.len(), 3);
        assert!(state.live.is_empty());
        drop(state);

        assert_eq!(h.metrics.meter(BOOT_TIMEOUT).count(), 3);
        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 0);
        // 10 polls, 2s apart, three times
        assert_eq!(start.elapsed(), Duration::from_secs(54));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_start_failure_is_boot_error() {
        let h = harness();
        h.backend.state().start_failures = 3;
        let mut vm = h.provider.vm("ci-1");

        let result = vm.create_server(None).await;

        assert!(matches!(result, Err(ProviderError::Boot(BackendError::Server { .. }))));
        assert_eq!(h.metrics.meter(BOOT_ERROR).count(), 3);
        assert_eq!(h.metrics.timer(BOOT_TIMER).count(), 0);
        assert!(h.backend.state().live.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_default_image_is_not_retried() {
        let h = harness();
        let mut catalog_images = h.provider.catalog().images().to_vec();
        catalog_images.retain(|image| image.tag != "ruby");
        let catalog = crate::ImageCatalog::new("travis", "ruby", catalog_images);
        let provider = crate::Provider::with_catalog(
            WorkerConfig::default(),
            h.backend.clone(),
            h.sessions.clone(),
            h.metrics.clone(),
            catalog,
        );

        let result = provider.vm("ci-1").create_server(Some("haskell")).await;

        assert!(matches!(result, Err(ProviderError::ImageNotFound { .. })));
        assert!(h.backend.state().created.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();

        assert!(matches!(vm.destroy_server().await, RemoveOutcome::Removed));
        assert!(matches!(vm.destroy_server().await, RemoveOutcome::AlreadyAbsent));

        assert_eq!(vm.state(), VmState::Unprovisioned);
        let state = h.backend.state();
        assert_eq!(state.stopped.len(), 1);
        assert_eq!(state.remove_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_without_container_is_noop() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");

        assert!(matches!(vm.destroy_server().await, RemoveOutcome::AlreadyAbsent));

        let state = h.backend.state();
        assert!(state.stopped.is_empty());
        assert!(state.remove_calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_succeeds_on_last_attempt() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();
        h.backend.state().remove_failures = 4;

        let start = Instant::now();
        let outcome = vm.destroy_server().await;

        assert!(matches!(outcome, RemoveOutcome::Removed));
        assert_eq!(h.backend.state().remove_calls.len(), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_failure_still_clears_container() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();
        h.backend.state().remove_failures = 5;

        let outcome = vm.destroy_server().await;

        assert!(matches!(outcome, RemoveOutcome::Failed(BackendError::Server { .. })));
        assert!(!outcome.is_gone());
        assert!(vm.container_id().is_none());
        assert_eq!(vm.state(), VmState::Unprovisioned);
        assert_eq!(h.backend.state().remove_calls.len(), 5);
        assert_eq!(h.metrics.meter(REMOVE_UNREACHABLE).count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unreachable_is_counted() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();
        {
            let mut state = h.backend.state();
            state.remove_failures = 5;
            state.remove_error = Some(BackendError::Connection("connection refused".into()));
        }

        let outcome = vm.destroy_server().await;

        assert!(matches!(outcome, RemoveOutcome::Failed(BackendError::Connection(_))));
        assert_eq!(h.metrics.meter(REMOVE_UNREACHABLE).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_not_found_stops_retrying() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();
        {
            let mut state = h.backend.state();
            state.remove_failures = 5;
            state.remove_error = Some(BackendError::NotFound("no such container".into()));
        }

        let outcome = vm.destroy_server().await;

        assert!(matches!(outcome, RemoveOutcome::AlreadyAbsent));
        assert_eq!(h.backend.state().remove_calls.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_failure_is_swallowed() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        vm.create_server(None).await.unwrap();
        h.backend.state().stop_error = Some(BackendError::Server {
            status: 500,
            message: "cannot stop".into(),
        });

        assert!(matches!(vm.destroy_server().await, RemoveOutcome::Removed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_boots_lazily_and_is_memoized() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");

        let first = vm.session().await.unwrap();
        let second = vm.session().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.backend.state().created.len(), 1);

        let opened = h.sessions.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].host, "127.0.0.1");
        assert_eq!(opened[0].port, crate::testing::SSH_HOST_PORT);
        assert_eq!(opened[0].username, "travis");
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_requires_published_port() {
        let h = harness();
        h.backend.state().missing_port = true;
        let mut vm = h.provider.vm("ci-1");

        let result = vm.session().await;
        assert!(matches!(result, Err(ProviderError::PortNotMapped(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandboxed_returns_work_result_and_tears_down() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");

        let result: std::result::Result<u16, ProviderError> = vm
            .sandboxed(Some("python"), |session| async move { Ok(session.params().port) })
            .await;

        assert_eq!(result.unwrap(), crate::testing::SSH_HOST_PORT);
        assert_eq!(h.sessions.closed(), 1);
        assert_eq!(h.backend.state().remove_calls.len(), 1);
        assert!(vm.container_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandboxed_propagates_work_error() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        // Teardown fails too, but the job's error wins
        h.sessions.fail_close.store(true, Ordering::SeqCst);

        let result: std::result::Result<(), JobError> = vm
            .sandboxed(None, |_session| async { Err(JobError::Failed("tests failed")) })
            .await;

        assert!(matches!(result, Err(JobError::Failed("tests failed"))));
        assert_eq!(h.sessions.closed(), 1);
        assert_eq!(h.backend.state().remove_calls.len(), 1);
        assert_eq!(vm.state(), VmState::Unprovisioned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandboxed_cleans_up_after_panic() {
        let h = harness();
        let mut vm = h.provider.vm("ci-1");
        let explode = true;

        let outcome = AssertUnwindSafe(vm.sandboxed(None, |_session| async move {
            if explode {
                panic!("job exploded");
            }
            Ok::<(), ProviderError>(())
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(h.sessions.closed(), 1);
        assert_eq!(h.backend.state().remove_calls.len(), 1);
        assert!(vm.container_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandboxed_skips_work_when_boot_fails() {
        let h = harness();
        h.backend.state().create_failures = 3;
        let mut vm = h.provider.vm("ci-1");
        let ran = AtomicBool::new(false);

        let result: std::result::Result<(), JobError> = vm
            .sandboxed(None, |_session| {
                ran.store(true, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(JobError::Provider(ProviderError::Boot(_)))));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(h.sessions.opened().is_empty());
    }

    #[tokio::test]
    async fn test_hostname_survives_config_reload() {
        let h = harness();
        let vm = h.provider.vm("ci-1");
        let pid = std::process::id();
        assert_eq!(vm.hostname(), format!("testing-worker-{pid}-ci-1.example.org"));
        assert_eq!(vm.full_name(), "worker.example.org:travis-ci-1");

        let mut config = WorkerConfig::default();
        config.host = "other.example.net".into();
        h.provider.reload_config(config);

        assert_eq!(vm.hostname(), format!("testing-worker-{pid}-ci-1.example.org"));
        assert_eq!(
            h.provider.vm("ci-1").hostname(),
            format!("testing-other-{pid}-ci-1.example.net")
        );
    }
}
