//! Configuration management for the WebShell daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webshell/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::TerminalSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::classifier::DEFAULT_ERROR_PATTERNS;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("shell does not exist: {0}")]
    InvalidShellPath(String),

    #[error("terminal size must be non-zero, got {cols}x{rows}")]
    InvalidTerminalSize { cols: u16, rows: u16 },

    #[error("output_queue must be greater than 0")]
    InvalidOutputQueue,

    #[error("https_addr requires both tls_cert and tls_key")]
    MissingTlsMaterial,

    #[error("invalid error pattern {pattern:?}: {reason}")]
    InvalidErrorPattern { pattern: String, reason: String },

    #[error("max_depth must be greater than 0")]
    InvalidMaxDepth,

    #[error("allowed origin must be an http(s) origin, got {0}")]
    InvalidOrigin(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebShell daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Shell session configuration.
    pub session: SessionConfig,

    /// Output classification cues.
    pub classifier: ClassifierConfig,

    /// File endpoint configuration.
    pub files: FilesConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,

    /// Working directory for shells and base directory for file paths.
    /// Unset means the daemon's current directory.
    pub home_dir: Option<PathBuf>,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the plain HTTP/WebSocket listener.
    pub http_addr: SocketAddr,

    /// Address of the TLS listener. Disabled when unset.
    pub https_addr: Option<SocketAddr>,

    /// PEM certificate chain for the TLS listener.
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS listener.
    pub tls_key: Option<PathBuf>,

    /// Directory of static client assets served at `/`.
    pub static_dir: PathBuf,

    /// Origins allowed by the CORS policy.
    pub allowed_origins: Vec<String>,
}

/// Shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell executable.
    pub shell: String,

    /// Arguments passed to the shell.
    pub shell_args: Vec<String>,

    /// Value of `TERM` inside the pty.
    pub term: String,

    /// Initial terminal columns.
    pub cols: u16,

    /// Initial terminal rows.
    pub rows: u16,

    /// Capacity, in chunks, of the queue between the pty reader and the session.
    pub output_queue: usize,

    /// How long a terminating session waits for its second close event.
    pub teardown_timeout_ms: u64,

    /// Send an `exit` frame to the client before closing the channel.
    pub notify_exit: bool,

    /// The complete environment of the spawned shell.
    pub env: BTreeMap<String, String>,
}

/// Output classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Case-insensitive regular expressions that mark a chunk as an error.
    pub error_patterns: Vec<String>,
}

/// File endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilesConfig {
    /// Maximum depth of a directory listing.
    pub max_depth: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            home_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            https_addr: None,
            tls_cert: None,
            tls_key: None,
            static_dir: PathBuf::from("dist/client"),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string());
        env.insert("LANG".to_string(), "en_US.UTF-8".to_string());

        Self {
            shell: "bash".to_string(),
            shell_args: vec!["--login".to_string()],
            term: "xterm-color".to_string(),
            cols: protocol::DEFAULT_COLS,
            rows: protocol::DEFAULT_ROWS,
            output_queue: 64,
            teardown_timeout_ms: 5000,
            notify_exit: false,
            env,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            error_patterns: DEFAULT_ERROR_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl SessionConfig {
    /// Returns the initial terminal size.
    pub fn initial_size(&self) -> TerminalSize {
        TerminalSize::new(self.cols, self.rows)
    }

    /// Returns the teardown timeout as a duration.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webshell")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBSHELL_HTTP_ADDR: Override the plain listener address
    /// - WEBSHELL_HOME_DIR: Override the shell working directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("WEBSHELL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(addr) = std::env::var("WEBSHELL_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    tracing::info!("Overriding http_addr from environment: {}", addr);
                    self.server.http_addr = addr;
                }
                Err(e) if !addr.is_empty() => {
                    tracing::warn!("Ignoring invalid WEBSHELL_HTTP_ADDR {:?}: {}", addr, e);
                }
                Err(_) => {}
            }
        }

        if let Ok(dir) = std::env::var("WEBSHELL_HOME_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding home_dir from environment: {}", dir);
                self.daemon.home_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        let shell_path = Path::new(&self.session.shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
            }
        } else if which::which(&self.session.shell).is_err() {
            return Err(ConfigError::InvalidShellPath(self.session.shell.clone()));
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidTerminalSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if self.session.output_queue == 0 {
            return Err(ConfigError::InvalidOutputQueue);
        }

        if self.server.https_addr.is_some()
            && (self.server.tls_cert.is_none() || self.server.tls_key.is_none())
        {
            return Err(ConfigError::MissingTlsMaterial);
        }

        for origin in &self.server.allowed_origins {
            let well_formed = (origin.starts_with("http://") || origin.starts_with("https://"))
                && axum::http::HeaderValue::from_str(origin).is_ok();
            if !well_formed {
                return Err(ConfigError::InvalidOrigin(origin.clone()));
            }
        }

        for pattern in &self.classifier.error_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::InvalidErrorPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if self.files.max_depth == 0 {
            return Err(ConfigError::InvalidMaxDepth);
        }

        Ok(())
    }

    /// Returns the directory shells start in and file paths are joined onto.
    pub fn home_dir(&self) -> PathBuf {
        self.daemon
            .home_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
