//! Configuration management for incognide-sessions.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::supervisor::{ReadinessPolicy, SupervisorConfig, TimeoutAction};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Python backend configuration.
    pub backend: BackendSection,
    /// Session lifecycle configuration.
    pub sessions: SessionsSection,
    /// Kernel startup configuration.
    pub kernel: KernelSection,
    /// Workspace environment store.
    pub workspace: WorkspaceSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
        }
    }
}

/// Python backend section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Base URL; auto-detected when absent.
    pub url: Option<String>,
    /// Timeout for one-shot JSON requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: 30,
        }
    }
}

/// Session lifecycle section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    /// Delay between a close request and the kill, in milliseconds.
    pub close_grace_ms: u64,
    /// Capacity of each connection's event channel.
    pub event_buffer: usize,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            close_grace_ms: 100,
            event_buffer: 1024,
        }
    }
}

/// Kernel startup section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSection {
    /// Interval between readiness checks, in milliseconds.
    pub readiness_interval_ms: u64,
    /// Number of readiness checks before giving up.
    pub readiness_attempts: u32,
    /// What to do when the kernel never reports ready.
    pub on_timeout: TimeoutAction,
    /// Directory for kernel connection files.
    pub runtime_dir: Option<PathBuf>,
    /// Interpreter used when neither the request nor the workspace names one.
    pub default_runtime: Option<String>,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            readiness_interval_ms: 500,
            readiness_attempts: 30,
            on_timeout: TimeoutAction::Warn,
            runtime_dir: None,
            default_runtime: None,
        }
    }
}

/// Workspace environment store section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSection {
    /// JSON file mapping workspace paths to Python environments.
    pub environments_file: Option<PathBuf>,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KernelSection {
    /// Connection file directory, defaulting to the system temp dir.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("incognide-kernels"))
    }

    /// Interpreter fallback for the current platform.
    pub fn default_runtime(&self) -> String {
        self.default_runtime.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                "python".to_string()
            } else {
                "python3".to_string()
            }
        })
    }

    pub fn readiness(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(self.readiness_interval_ms),
            attempts: self.readiness_attempts,
            on_timeout: self.on_timeout,
        }
    }
}

impl WorkspaceSection {
    /// Store location, defaulting to `~/.incognide/workspace-environments.json`.
    pub fn environments_file(&self) -> PathBuf {
        if let Some(path) = &self.environments_file {
            return path.clone();
        }
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        home.join(".incognide").join("workspace-environments.json")
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("INCOGNIDE_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("INCOGNIDE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(url) = std::env::var("INCOGNIDE_BACKEND_URL") {
            if !url.is_empty() {
                self.backend.url = Some(url);
            }
        }

        if let Ok(level) = std::env::var("INCOGNIDE_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref url) = args.backend_url {
            self.backend.url = Some(url.clone());
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_args(args);
        Ok(config)
    }

    /// Address to bind the server to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;
        Ok(SocketAddr::new(host, self.server.port))
    }

    /// Lifecycle settings for the supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            close_grace: Duration::from_millis(self.sessions.close_grace_ms),
            readiness: self.kernel.readiness(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
        }
    }
}

impl std::error::Error for ConfigError {}
