//! Configuration system for the `TaskDeck` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdeck/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::session::SessionSettings;

/// Default remote API.
pub const DEFAULT_API_URL: &str = "https://dummyjson.com";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The API base URL is not a valid absolute URL.
    #[error("invalid api url {url:?}: {source}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    storage: StorageFileConfig,
    tasks: TasksFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    user_id: Option<i64>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    path: Option<PathBuf>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    required_fields: Option<Vec<String>>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- API --
    /// Base URL of the remote task API.
    pub api_url: Url,
    /// Explicit bearer token; overrides the stored login session.
    pub token: Option<String>,
    /// `userId` sent with creates when no one is signed in.
    pub user_id: i64,
    /// Per-request timeout.
    pub request_timeout: Duration,

    // -- Storage --
    /// Overlay and session file; `None` means the platform data dir.
    pub storage_path: Option<PathBuf>,

    // -- Tasks --
    /// Fields a new task must carry.
    pub required_fields: Vec<String>,
    /// Buffer size for the mutation event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            user_id: 1,
            request_timeout: Duration::from_secs(10),
            storage_path: None,
            required_fields: vec!["todo".to_string()],
            event_buffer: 64,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/taskdeck/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved API URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = match cli.api_url.as_ref().or(file.api.base_url.as_ref()) {
            Some(raw) => Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
                url: raw.clone(),
                source,
            })?,
            None => defaults.api_url,
        };

        Ok(Self {
            api_url,
            token: cli.token.clone().filter(|t| !t.is_empty()),
            user_id: file.api.user_id.unwrap_or(defaults.user_id),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            storage_path: cli
                .storage
                .clone()
                .or_else(|| file.storage.path.clone()),
            required_fields: file
                .tasks
                .required_fields
                .clone()
                .unwrap_or(defaults.required_fields),
            event_buffer: file.tasks.event_buffer.unwrap_or(defaults.event_buffer),
        })
    }

    /// Session tunables derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            required_fields: self.required_fields.clone(),
            event_buffer: self.event_buffer,
        }
    }
}

fn default_api_url() -> Url {
    // A constant literal; parsing cannot fail.
    Url::parse(DEFAULT_API_URL).unwrap_or_else(|_| unreachable!("default api url is valid"))
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task list client with optimistic offline-tolerant edits")]
pub struct CliArgs {
    /// Base URL of the task API.
    #[arg(long, env = "TASKDECK_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token (overrides the stored login session).
    #[arg(long, env = "TASKDECK_TOKEN")]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/taskdeck/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the local storage file (overlay and login session).
    #[arg(long, env = "TASKDECK_STORAGE")]
    pub storage: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Command to run (default: `list`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the task list.
    List {
        /// Only show tasks with this status (`all`, `todo`, `in-progress`, `done`).
        #[arg(long, default_value = "all")]
        status: String,
    },
    /// Add a task.
    Add {
        /// Task text.
        text: String,
        /// Extra field, `key=value` (value parsed as JSON when possible).
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Update fields of a task.
    Update {
        /// Task id.
        id: i64,
        /// Field to set, `key=value` (value parsed as JSON when possible).
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Set the completion flag.
        #[arg(long)]
        completed: Option<bool>,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: i64,
    },
    /// Sign in and store the session.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// Forget the stored session.
    Logout,
}

/// Splits a `key=value` argument. The value is parsed as JSON when it is
/// valid JSON and kept as a plain string otherwise.
///
/// Returns `None` when there is no `=` or the key is empty.
#[must_use]
pub fn parse_field(arg: &str) -> Option<(String, serde_json::Value)> {
    let (key, raw) = arg.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
    Some((key.to_string(), value))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskdeck").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
