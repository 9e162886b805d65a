//! Configuration structures for the testbox worker.
//!
//! The configuration is an explicit value handed to the VM provider at
//! construction. It is loaded from a TOML/YAML/JSON file through the `config`
//! crate, with `TESTBOX_`-prefixed environment variables layered on top
//! (`TESTBOX_VMS__COUNT=4`, `TESTBOX_DOCKER__PRIVILEGED_SUPPORT=true`).

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TESTBOX";

/// Complete configuration for a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fully-qualified host name of the worker machine.
    #[serde(default = "default_host")]
    pub host: String,
    /// Sandbox pool sizing
    #[serde(default)]
    pub vms: VmsConfig,
    /// Docker backend and container settings
    #[serde(default)]
    pub docker: DockerConfig,
    /// Remote shell endpoint settings
    #[serde(default)]
    pub ssh: SshConfig,
    /// Shell session buffering
    #[serde(default)]
    pub shell: ShellConfig,
    /// Job timeouts handed to shell sessions
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Boot and teardown retry policy
    #[serde(default)]
    pub boot: BootConfig,
    /// Image id prefix that overrides language-based selection.
    #[serde(default)]
    pub image_override: Option<String>,
    /// Language aliases consulted when a hint matches no image tag
    /// (e.g. `javascript = "node_js"`).
    #[serde(default)]
    pub language_mappings: HashMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Number and naming of sandbox slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmsConfig {
    /// Number of parallel sandbox slots
    #[serde(default = "default_vm_count")]
    pub count: usize,
    /// Prefix for slot names (`{prefix}-1` .. `{prefix}-count`)
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_vm_count() -> usize {
    1
}

fn default_name_prefix() -> String {
    "testbox".to_string()
}

impl Default for VmsConfig {
    fn default() -> Self {
        Self {
            count: default_vm_count(),
            name_prefix: default_name_prefix(),
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker daemon socket (local defaults when unset)
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// Run containers with `--privileged`
    #[serde(default)]
    pub privileged_support: bool,
    /// Private key used to log into sandboxes
    #[serde(default = "default_private_key_path")]
    pub private_key_path: PathBuf,
    /// Repository namespace that sandbox images live in
    #[serde(default = "default_image_repository")]
    pub image_repository: String,
    /// Tag of the image used when no language matches
    #[serde(default = "default_image_tag")]
    pub default_image_tag: String,
    /// Command run as PID 1 inside the container
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Relative CPU share weight
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,
    /// Memory ceiling in bytes
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,
}

fn default_private_key_path() -> PathBuf {
    PathBuf::from("/etc/testbox/id_rsa")
}

fn default_image_repository() -> String {
    "travis".to_string()
}

fn default_image_tag() -> String {
    "ruby".to_string()
}

fn default_command() -> Vec<String> {
    vec!["/sbin/init".to_string()]
}

fn default_cpu_shares() -> i64 {
    1
}

fn default_memory_bytes() -> i64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            privileged_support: false,
            private_key_path: default_private_key_path(),
            image_repository: default_image_repository(),
            default_image_tag: default_image_tag(),
            command: default_command(),
            cpu_shares: default_cpu_shares(),
            memory_bytes: default_memory_bytes(),
        }
    }
}

/// Where and as whom shell sessions log in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Host the container's port 22 is published on
    #[serde(default = "default_ssh_host")]
    pub host: String,
    /// Login identity inside the sandbox
    #[serde(default = "default_ssh_username")]
    pub username: String,
}

fn default_ssh_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ssh_username() -> String {
    "travis".to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: default_ssh_host(),
            username: default_ssh_username(),
        }
    }
}

/// Shell buffering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Read buffer size in bytes
    #[serde(default = "default_shell_buffer")]
    pub buffer: usize,
}

fn default_shell_buffer() -> usize {
    64 * 1024
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            buffer: default_shell_buffer(),
        }
    }
}

/// Timeouts handed to shell sessions, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Establishing the shell connection
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,
    /// Hard limit for a whole job
    #[serde(default = "default_hard_limit")]
    pub hard_limit: u64,
    /// Maximum time without output
    #[serde(default = "default_log_silence")]
    pub log_silence: u64,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_hard_limit() -> u64 {
    3000
}

fn default_log_silence() -> u64 {
    600
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            hard_limit: default_hard_limit(),
            log_silence: default_log_silence(),
        }
    }
}

impl TimeoutsConfig {
    /// Get the connect timeout as a Duration.
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    /// Get the hard limit as a Duration.
    pub fn hard_limit(&self) -> Duration {
        Duration::from_secs(self.hard_limit)
    }

    /// Get the log silence timeout as a Duration.
    pub fn log_silence(&self) -> Duration {
        Duration::from_secs(self.log_silence)
    }
}

/// Retry policy for container boot and removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// Boot attempts per `create`
    #[serde(default = "default_boot_attempts")]
    pub attempts: u32,
    /// Number of running-state polls before declaring a timeout
    #[serde(default = "default_poll_retries")]
    pub poll_retries: u32,
    /// Seconds between running-state polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Removal attempts per `destroy`
    #[serde(default = "default_remove_attempts")]
    pub remove_attempts: u32,
    /// Seconds between removal attempts
    #[serde(default = "default_remove_delay")]
    pub remove_delay_secs: u64,
}

fn default_boot_attempts() -> u32 {
    3
}

fn default_poll_retries() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_remove_attempts() -> u32 {
    5
}

fn default_remove_delay() -> u64 {
    3
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            attempts: default_boot_attempts(),
            poll_retries: default_poll_retries(),
            poll_interval_secs: default_poll_interval(),
            remove_attempts: default_remove_attempts(),
            remove_delay_secs: default_remove_delay(),
        }
    }
}

impl BootConfig {
    /// Get the poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get the removal delay as a Duration.
    pub fn remove_delay(&self) -> Duration {
        Duration::from_secs(self.remove_delay_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            vms: VmsConfig::default(),
            docker: DockerConfig::default(),
            ssh: SshConfig::default(),
            shell: ShellConfig::default(),
            timeouts: TimeoutsConfig::default(),
            boot: BootConfig::default(),
            image_override: None,
            language_mappings: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a file, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults and environment overrides only.
    pub fn from_env() -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the provider misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.host.split('.').next().unwrap_or_default().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.vms.count == 0 {
            return Err(ConfigError::Invalid("vms.count must be > 0".into()));
        }
        if self.vms.name_prefix.is_empty() {
            return Err(ConfigError::Invalid("vms.name_prefix is required".into()));
        }
        if self.docker.command.is_empty() {
            return Err(ConfigError::Invalid("docker.command is required".into()));
        }
        if self.docker.private_key_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "docker.private_key_path is required".into(),
            ));
        }
        if self.boot.attempts == 0 || self.boot.remove_attempts == 0 {
            return Err(ConfigError::Invalid(
                "boot.attempts and boot.remove_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The image override, ignoring blank values.
    pub fn image_override(&self) -> Option<&str> {
        self.image_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
