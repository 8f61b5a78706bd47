//! Configuration management for upserver
//!
//! Values are layered: built-in defaults, then an optional JSON file named
//! by `UPSERVER_CONFIG`, then `UPSERVER_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::upload::{ChunkOrdering, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Environment variable naming a JSON config file
pub const CONFIG_FILE_ENV: &str = "UPSERVER_CONFIG";

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "upserver=debug,tower_http=debug";

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Finalized files live here; staging lives in its `.staging` child
    pub upload_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Chunk size advertised to clients
    pub chunk_size: u64,

    /// Largest accepted chunk body
    pub max_chunk_size: u64,

    /// Largest accepted file (0 = unlimited)
    pub max_file_size: u64,

    /// ACTIVE sessions idle this long are expired
    pub idle_timeout_secs: u64,

    pub sweep_interval_secs: u64,

    /// How long terminal sessions stay queryable
    pub retention_secs: u64,

    pub ordering: ChunkOrdering,
    pub auto_finalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,

    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            max_file_size: 0,
            idle_timeout_secs: 3600,
            sweep_interval_secs: 60,
            retention_secs: 3600,
            ordering: ChunkOrdering::Any,
            auto_finalize: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            enabled: true,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl UploadConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Config {
    /// Load from the process environment: defaults, config file, env vars
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env_with(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `UPSERVER_*` values returned by `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("UPSERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "UPSERVER_PORT")? {
            self.server.port = port;
        }
        if let Some(dir) = lookup("UPSERVER_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_var(&lookup, "UPSERVER_CHUNK_SIZE")? {
            self.upload.chunk_size = size;
        }
        if let Some(size) = parse_var(&lookup, "UPSERVER_MAX_CHUNK_SIZE")? {
            self.upload.max_chunk_size = size;
        }
        if let Some(size) = parse_var(&lookup, "UPSERVER_MAX_FILE_SIZE")? {
            self.upload.max_file_size = size;
        }
        if let Some(secs) = parse_var(&lookup, "UPSERVER_IDLE_TIMEOUT_SECS")? {
            self.upload.idle_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "UPSERVER_SWEEP_INTERVAL_SECS")? {
            self.upload.sweep_interval_secs = secs;
        }
        if let Some(ordering) = lookup("UPSERVER_CHUNK_ORDERING") {
            self.upload.ordering = match ordering.trim().to_ascii_lowercase().as_str() {
                "any" => ChunkOrdering::Any,
                "sequential" => ChunkOrdering::Sequential,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "UPSERVER_CHUNK_ORDERING",
                        value: ordering,
                    })
                }
            };
        }
        if let Some(flag) = parse_bool(&lookup, "UPSERVER_AUTO_FINALIZE")? {
            self.upload.auto_finalize = flag;
        }
        if let Some(flag) = parse_bool(&lookup, "UPSERVER_CORS_ENABLED")? {
            self.cors.enabled = flag;
        }
        if let Some(origins) = lookup("UPSERVER_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(flag) = parse_bool(&lookup, "UPSERVER_LOG")? {
            self.logging.enabled = flag;
        }
        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.upload.chunk_size < MIN_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be at least {} bytes",
                MIN_CHUNK_SIZE
            )));
        }
        if self.upload.max_chunk_size < self.upload.chunk_size {
            return Err(ConfigError::Invalid(
                "max_chunk_size must not be smaller than chunk_size".into(),
            ));
        }
        if self.upload.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".into()));
        }
        if self.upload.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { var, value }),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.upload.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.max_file_size, 0);
        assert!(config.logging.enabled);
        assert!(config.cors.enabled);
        assert_eq!(config.cors.allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.upload.ordering, ChunkOrdering::Any);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.port = 8080;
        config.upload.chunk_size = 1024;
        assert!(config.validate().is_ok());

        let mut bad_port = Config::default();
        bad_port.server.port = 0;
        assert!(matches!(bad_port.validate(), Err(ConfigError::Invalid(_))));

        let mut small_chunk = Config::default();
        small_chunk.upload.chunk_size = 512;
        assert!(small_chunk.validate().is_err());

        let mut small_max = Config::default();
        small_max.upload.max_chunk_size = small_max.upload.chunk_size - 1;
        assert!(small_max.validate().is_err());

        let mut no_timeout = Config::default();
        no_timeout.upload.idle_timeout_secs = 0;
        assert!(no_timeout.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_with(env_from(&[
                ("UPSERVER_HOST", "127.0.0.1"),
                ("UPSERVER_PORT", "9000"),
                ("UPSERVER_UPLOAD_DIR", "custom_uploads"),
                ("UPSERVER_MAX_FILE_SIZE", "1073741824"),
                ("UPSERVER_CHUNK_ORDERING", "Sequential"),
                ("UPSERVER_AUTO_FINALIZE", "false"),
                ("UPSERVER_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ]))
            .unwrap();

        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.storage.upload_dir, PathBuf::from("custom_uploads"));
        assert_eq!(config.upload.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.upload.ordering, ChunkOrdering::Sequential);
        assert!(!config.upload.auto_finalize);
        assert_eq!(config.cors.allowed_origins.len(), 2);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env_with(env_from(&[("UPSERVER_PORT", "99999")])),
            Err(ConfigError::InvalidEnv { var: "UPSERVER_PORT", .. })
        ));
        assert!(config
            .apply_env_with(env_from(&[("UPSERVER_CORS_ENABLED", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut original = Config::default();
        original.server.host = "192.168.1.1".to_string();
        original.server.port = 9999;
        original.storage.upload_dir = PathBuf::from("test_uploads");
        original.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.json");
        std::fs::write(&path, r#"{"server": {"port": 7000}, "upload": {"ordering": "sequential"}}"#)
            .unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 7000);
        assert_eq!(loaded.server.host, "0.0.0.0");
        assert_eq!(loaded.upload.ordering, ChunkOrdering::Sequential);
        assert_eq!(loaded.upload.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
