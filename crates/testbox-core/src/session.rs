//! Remote shell sessions into sandboxes.
//!
//! The lifecycle code only needs to open a session against a published SSH
//! port and close it again; what happens on the wire in between belongs to
//! the shell implementation. [`TcpSessionFactory`] connects to the endpoint
//! and waits for the server's identification line, which is enough to know
//! the sandbox's SSH daemon is up.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testbox_common::WorkerConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

/// Interval between connection attempts while the daemon comes up.
const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// A session handle, shared between the sandbox and the job using it.
pub type SharedSession = Arc<dyn ShellSession>;

/// Everything needed to log into a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Host the SSH port is published on
    pub host: String,
    /// Published host port
    pub port: u16,
    /// Login identity
    pub username: String,
    /// Private key for the login
    pub private_key_path: PathBuf,
    /// Read buffer size in bytes
    pub buffer: usize,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Hard limit for a whole job
    pub hard_limit: Duration,
    /// Maximum time without output
    pub log_silence: Duration,
}

impl SessionParams {
    /// Build session parameters for a port published on the configured host.
    pub fn from_config(config: &WorkerConfig, port: u16) -> Self {
        Self {
            host: config.ssh.host.clone(),
            port,
            username: config.ssh.username.clone(),
            private_key_path: config.docker.private_key_path.clone(),
            buffer: config.shell.buffer,
            connect_timeout: config.timeouts.connect(),
            hard_limit: config.timeouts.hard_limit(),
            log_silence: config.timeouts.log_silence(),
        }
    }

    /// `host:port` of the endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An open shell session.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Parameters the session was opened with.
    fn params(&self) -> &SessionParams;

    /// Identification line the server sent, if any.
    fn server_id(&self) -> Option<&str>;

    /// Close the session. Closing a closed session is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Opens shell sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a session to the given endpoint.
    async fn open(&self, params: SessionParams) -> Result<SharedSession>;
}

/// Session factory that connects over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpSessionFactory;

impl TcpSessionFactory {
    /// Create a new factory.
    pub fn new() -> Self {
        Self
    }

    /// Connect, retrying until the connect timeout runs out.
    async fn connect(params: &SessionParams) -> Result<TcpStream> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match TcpStream::connect((params.host.as_str(), params.port)).await {
                Ok(stream) => {
                    tracing::debug!(
                        endpoint = %params.endpoint(),
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Connected to sandbox"
                    );
                    return Ok(stream);
                }
                Err(e) if start.elapsed() >= params.connect_timeout => {
                    tracing::warn!(
                        endpoint = %params.endpoint(),
                        attempts,
                        error = %e,
                        "Sandbox connection timeout"
                    );
                    return Err(ProviderError::Session(format!(
                        "could not connect to {} within {:?}: {e}",
                        params.endpoint(),
                        params.connect_timeout
                    )));
                }
                Err(e) => {
                    tracing::trace!(error = %e, attempt = attempts, "Connection attempt failed, retrying...");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }
}

#[async_trait]
impl SessionFactory for TcpSessionFactory {
    async fn open(&self, params: SessionParams) -> Result<SharedSession> {
        let stream = Self::connect(&params).await?;
        let mut reader = BufReader::with_capacity(params.buffer.max(1), stream);

        let mut line = String::new();
        let read = timeout(params.connect_timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| {
                ProviderError::Session(format!(
                    "no identification from {} within {:?}",
                    params.endpoint(),
                    params.connect_timeout
                ))
            })??;

        let server_id = line.trim_end().to_string();
        if read == 0 || !server_id.starts_with("SSH-") {
            return Err(ProviderError::Session(format!(
                "unexpected identification from {}: {server_id:?}",
                params.endpoint()
            )));
        }

        tracing::info!(
            endpoint = %params.endpoint(),
            user = %params.username,
            server_id = %server_id,
            "Shell session opened"
        );

        Ok(Arc::new(TcpSession {
            params,
            server_id,
            stream: Mutex::new(Some(reader)),
        }))
    }
}

/// Session over a plain TCP connection.
struct TcpSession {
    params: SessionParams,
    server_id: String,
    stream: Mutex<Option<BufReader<TcpStream>>>,
}

#[async_trait]
impl ShellSession for TcpSession {
    fn params(&self) -> &SessionParams {
        &self.params
    }

    fn server_id(&self) -> Option<&str> {
        Some(&self.server_id)
    }

    async fn close(&self) -> Result<()> {
        let Some(mut reader) = self.stream.lock().await.take() else {
            return Ok(());
        };

        reader.get_mut().shutdown().await?;
        tracing::debug!(endpoint = %self.params.endpoint(), "Shell session closed");
        Ok(())
    }
}
