//! Test doubles for the backend and session seams.

use crate::error::{ProviderError, Result};
use crate::image::ImageCatalog;
use crate::metrics::MetricsRegistry;
use crate::provider::Provider;
use crate::session::{SessionFactory, SessionParams, SharedSession, ShellSession};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use testbox_common::types::{ContainerId, Image};
use testbox_common::WorkerConfig;
use testbox_vm_manager::{BackendError, ContainerBackend, ContainerInfo, ContainerSpec, SSH_PORT};
use tracing::subscriber::DefaultGuard;

/// Host port the mock backend publishes port 22 on.
pub(crate) const SSH_HOST_PORT: u16 = 49153;

/// Scripted behavior and recorded calls of [`MockBackend`].
#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub created: Vec<ContainerSpec>,
    pub started: Vec<ContainerId>,
    pub stopped: Vec<ContainerId>,
    pub remove_calls: Vec<ContainerId>,
    pub live: HashSet<ContainerId>,
    /// Fail the next N creates
    pub create_failures: u32,
    /// Fail the next N starts
    pub start_failures: u32,
    /// The next N started containers never report running
    pub timeouts_remaining: u32,
    stuck: HashSet<ContainerId>,
    /// Fail the next N removes with `remove_error`
    pub remove_failures: u32,
    pub remove_error: Option<BackendError>,
    pub stop_error: Option<BackendError>,
    /// Don't publish port 22
    pub missing_port: bool,
    next_id: u32,
}

pub(crate) struct MockBackend {
    state: Mutex<MockState>,
    images: Vec<Image>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            images: vec![
                Image::new("travis", "ruby", "1111aaaa"),
                Image::new("travis", "node_js", "2222bbbb"),
                Image::new("travis", "python", "3333cccc"),
                Image::new("library", "postgres", "9999ffff"),
            ],
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn create_container(&self, spec: ContainerSpec) -> testbox_vm_manager::Result<ContainerId> {
        let mut state = self.state();
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(BackendError::Connection("connection refused".into()));
        }

        state.next_id += 1;
        let id = ContainerId::from(format!("{:064x}", state.next_id));
        state.created.push(spec);
        state.live.insert(id.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> testbox_vm_manager::Result<()> {
        let mut state = self.state();
        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(BackendError::Server {
                status: 500,
                message: "cannot start container".into(),
            });
        }
        state.started.push(id.clone());
        if state.timeouts_remaining > 0 {
            state.timeouts_remaining -= 1;
            state.stuck.insert(id.clone());
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> testbox_vm_manager::Result<ContainerInfo> {
        let state = self.state();
        if !state.live.contains(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }

        let running = state.started.contains(id) && !state.stuck.contains(id);
        let info = ContainerInfo::new(id.clone(), running);
        if state.missing_port {
            Ok(info)
        } else {
            Ok(info.with_port(SSH_PORT, SSH_HOST_PORT))
        }
    }

    async fn stop_container(&self, id: &ContainerId) -> testbox_vm_manager::Result<()> {
        let mut state = self.state();
        state.stopped.push(id.clone());
        match state.stop_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn remove_container(&self, id: &ContainerId) -> testbox_vm_manager::Result<()> {
        let mut state = self.state();
        state.remove_calls.push(id.clone());
        if state.remove_failures > 0 {
            state.remove_failures -= 1;
            return Err(state.remove_error.clone().unwrap_or(BackendError::Server {
                status: 409,
                message: "removal already in progress".into(),
            }));
        }

        if state.live.remove(id) {
            Ok(())
        } else {
            Err(BackendError::NotFound(id.to_string()))
        }
    }

    async fn list_images(&self) -> testbox_vm_manager::Result<Vec<Image>> {
        Ok(self.images.clone())
    }
}

/// Session factory recording opens and closes.
#[derive(Default)]
pub(crate) struct MockSessions {
    opened: Mutex<Vec<SessionParams>>,
    closed: Arc<AtomicU32>,
    pub fail_close: Arc<AtomicBool>,
}

impl MockSessions {
    pub(crate) fn opened(&self) -> Vec<SessionParams> {
        self.opened.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockSessions {
    async fn open(&self, params: SessionParams) -> Result<SharedSession> {
        self.opened.lock().unwrap().push(params.clone());
        Ok(Arc::new(MockSession {
            params,
            closed: Arc::clone(&self.closed),
            fail_close: Arc::clone(&self.fail_close),
        }))
    }
}

struct MockSession {
    params: SessionParams,
    closed: Arc<AtomicU32>,
    fail_close: Arc<AtomicBool>,
}

#[async_trait]
impl ShellSession for MockSession {
    fn params(&self) -> &SessionParams {
        &self.params
    }

    fn server_id(&self) -> Option<&str> {
        Some("SSH-2.0-mock")
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProviderError::Session("broken pipe".into()));
        }
        Ok(())
    }
}

/// Provider over the mocks, with the mock backend's images in its catalog.
pub(crate) fn provider(
    config: WorkerConfig,
    backend: &Arc<MockBackend>,
    sessions: &Arc<MockSessions>,
    metrics: &Arc<MetricsRegistry>,
) -> Provider {
    let catalog = ImageCatalog::new(
        config.docker.image_repository.clone(),
        config.docker.default_image_tag.clone(),
        backend.images.clone(),
    );
    Provider::with_catalog(
        config,
        backend.clone(),
        sessions.clone(),
        metrics.clone(),
        catalog,
    )
}

/// Log output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collect plain-text logs of the current thread until the guard drops.
pub(crate) fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
