//! Configuration module for foldsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for foldsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub folders: Vec<FolderConfig>,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
    pub ipc: IpcConfig,
    pub journal: JournalConfig,
    pub logging: LoggingConfig,
}

/// One local/remote folder pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderConfig {
    /// Unique label used by the CLI and the IPC protocol.
    pub name: String,
    /// Absolute local directory.
    pub local_root: PathBuf,
    /// Remote directory, starting with `/`.
    pub remote_root: String,
}

/// Remote transfer API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the server, e.g. `https://nas.local:8443`.
    pub base_url: String,
    /// Bearer token. Credential storage is handled outside the engine.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

/// Scanning and change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between remote scans.
    pub scan_interval_secs: u64,
    /// Quiet period after the last local change before planning.
    pub debounce_ms: u64,
    /// Glob patterns (matched against relative paths and file names) never synced.
    pub ignore_patterns: Vec<String>,
}

/// Transfer worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Simultaneous transfers per synced folder.
    pub max_concurrent_per_folder: usize,
    /// Deadline for one whole operation, in seconds.
    pub operation_timeout_secs: u64,
}

/// Retry policy parameters, shared by every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed (0.0 - <1.0).
    pub jitter: f64,
    /// Attempts before an operation is marked failed.
    pub max_attempts: u32,
    /// Ceiling for the computed delay, in seconds.
    pub max_delay_secs: u64,
}

/// Local control socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Unix domain socket path.
    pub socket_path: PathBuf,
}

/// Journal database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Days to keep resolved conflicts before pruning.
    pub resolved_conflict_retention_days: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/foldsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("foldsync")
            .join("config.yaml")
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SyncConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl TransferConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

/// Suffix of the partial files written while a download is in flight.
pub const PARTIAL_SUFFIX: &str = ".foldsync-partial";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            debounce_ms: 500,
            ignore_patterns: vec![
                format!("*{PARTIAL_SUFFIX}"),
                "*.swp".to_string(),
                "*.swx".to_string(),
                "*~".to_string(),
                ".~lock.*".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_folder: 4,
            operation_timeout_secs: 300,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 8,
            max_delay_secs: 300,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("foldsync")
                .join("foldsync.sock"),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("foldsync")
                .join("journal.db"),
            resolved_conflict_retention_days: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"retry.multiplier"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| {
            errors.push(ValidationError { field, message });
        };

        // --- folders ---
        let mut names = HashSet::new();
        for (i, folder) in self.folders.iter().enumerate() {
            if folder.name.trim().is_empty() {
                push(format!("folders[{i}].name"), "must not be empty".into());
            } else if !names.insert(folder.name.as_str()) {
                push(
                    format!("folders[{i}].name"),
                    format!("duplicate folder name '{}'", folder.name),
                );
            }
            if !folder.local_root.is_absolute() {
                push(
                    format!("folders[{i}].local_root"),
                    format!("must be absolute: {}", folder.local_root.display()),
                );
            }
            if !folder.remote_root.starts_with('/') {
                push(
                    format!("folders[{i}].remote_root"),
                    format!("must start with '/': {}", folder.remote_root),
                );
            }
        }

        // --- remote ---
        if !(self.remote.base_url.starts_with("http://")
            || self.remote.base_url.starts_with("https://"))
        {
            push(
                "remote.base_url".into(),
                format!("must be an http(s) URL: {}", self.remote.base_url),
            );
        }
        if self.remote.request_timeout_secs == 0 {
            push(
                "remote.request_timeout_secs".into(),
                "must be greater than 0".into(),
            );
        }
        if self.remote.connect_timeout_secs == 0 {
            push(
                "remote.connect_timeout_secs".into(),
                "must be greater than 0".into(),
            );
        }

        // --- sync ---
        if self.sync.scan_interval_secs == 0 {
            push(
                "sync.scan_interval_secs".into(),
                "must be greater than 0".into(),
            );
        }
        if self.sync.debounce_ms == 0 {
            push("sync.debounce_ms".into(), "must be greater than 0".into());
        }
        for (i, pattern) in self.sync.ignore_patterns.iter().enumerate() {
            if let Err(e) = glob::Pattern::new(pattern) {
                push(
                    format!("sync.ignore_patterns[{i}]"),
                    format!("invalid glob '{pattern}': {e}"),
                );
            }
        }

        // --- transfer ---
        if self.transfer.max_concurrent_per_folder == 0 {
            push(
                "transfer.max_concurrent_per_folder".into(),
                "must be greater than 0".into(),
            );
        }
        if self.transfer.operation_timeout_secs == 0 {
            push(
                "transfer.operation_timeout_secs".into(),
                "must be greater than 0".into(),
            );
        }

        // --- retry ---
        if self.retry.base_delay_ms == 0 {
            push("retry.base_delay_ms".into(), "must be greater than 0".into());
        }
        if !(self.retry.multiplier >= 1.0) {
            push("retry.multiplier".into(), "must be at least 1.0".into());
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            push("retry.jitter".into(), "must be in [0.0, 1.0)".into());
        }
        if self.retry.max_attempts == 0 {
            push("retry.max_attempts".into(), "must be greater than 0".into());
        }
        if self.retry.max_delay_secs == 0 {
            push("retry.max_delay_secs".into(), "must be greater than 0".into());
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level".into(),
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                "logging.format".into(),
                format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Config`], mainly for tests and embedding.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- folders ---

    pub fn folder(
        mut self,
        name: impl Into<String>,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Self {
        self.config.folders.push(FolderConfig {
            name: name.into(),
            local_root: local_root.into(),
            remote_root: remote_root.into(),
        });
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_token(mut self, token: impl Into<String>) -> Self {
        self.config.remote.token = Some(token.into());
        self
    }

    // --- sync ---

    pub fn scan_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.scan_interval_secs = seconds;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    // --- transfer ---

    pub fn max_concurrent_per_folder(mut self, n: usize) -> Self {
        self.config.transfer.max_concurrent_per_folder = n;
        self
    }

    // --- retry ---

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    // --- ipc / journal / logging ---

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ipc.socket_path = path.into();
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.journal.db_path = path.into();
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
