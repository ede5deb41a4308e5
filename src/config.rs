//! Configuration management for BingoBongo.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `TASKS_FILE` - Optional. JSON task catalog. Defaults to `tasks/rally.json`.
//! - `GROUPS_FILE` - Optional. JSON token to group mapping. Defaults to `groups/groups.json`.
//! - `TEMPLATE_PATH` - Optional. Directory holding `*.tmpl` templates. Defaults to `web/template`.
//! - `STATIC_PATH` - Optional. Directory served under `/static`. Defaults to `web/static`.
//! - `STORAGE_PATH` - Optional. Root directory for submissions. Defaults to `storage`.
//! - `MAX_UPLOAD_BYTES` - Optional. Upload size limit in bytes. Defaults to 10 MiB.

use std::path::PathBuf;
use thiserror::Error;

/// Default upload limit (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 << 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Task catalog file (JSON array of `{task, type}`)
    pub tasks_file: PathBuf,

    /// Group directory file (JSON object token -> group)
    pub groups_file: PathBuf,

    /// Directory containing the HTML templates
    pub template_path: PathBuf,

    /// Directory served under `/static`
    pub static_path: PathBuf,

    /// Root under which per-group submission directories are created
    pub storage_path: PathBuf,

    /// Maximum accepted payload size in bytes
    pub max_upload_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tasks_file: PathBuf::from("tasks/rally.json"),
            groups_file: PathBuf::from("groups/groups.json"),
            template_path: PathBuf::from("web/template"),
            static_path: PathBuf::from("web/static"),
            storage_path: PathBuf::from("storage"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `PORT` or `MAX_UPLOAD_BYTES`
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to
    /// defaults for unset or blank keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?,
            None => defaults.port,
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.trim().parse().map_err(|e| {
                ConfigError::InvalidValue("MAX_UPLOAD_BYTES".to_string(), format!("{}", e))
            })?,
            None => defaults.max_upload_bytes,
        };
        if max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_UPLOAD_BYTES".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            tasks_file: get("TASKS_FILE").map(PathBuf::from).unwrap_or(defaults.tasks_file),
            groups_file: get("GROUPS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.groups_file),
            template_path: get("TEMPLATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_path),
            static_path: get("STATIC_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_path),
            storage_path: get("STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            max_upload_bytes,
        })
    }

    /// The upload limit as shown to clients, e.g. `10.000MB`.
    pub fn upload_limit_label(&self) -> String {
        format!("{:.3}MB", self.max_upload_bytes as f64 / (1u64 << 20) as f64)
    }
}
