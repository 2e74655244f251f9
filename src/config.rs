//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "MEDIA_VAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Storage backend types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum StorageBackend {
    #[default]
    Local,
    Mock,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "localfs" | "fs" => Ok(StorageBackend::Local),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Catalog backend types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum CatalogBackend {
    #[default]
    SQLite,
    Mock,
}

impl FromStr for CatalogBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(CatalogBackend::SQLite),
            "mock" => Ok(CatalogBackend::Mock),
            _ => Err(format!("Unknown catalog backend: {}", s)),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Artifact and chunk storage configuration
    pub storage: StorageConfig,
    /// Media catalog configuration
    pub catalog: CatalogConfig,
    /// Chunked upload limits
    pub upload: UploadConfig,
    /// Orphaned chunk sweeper configuration
    pub sweep: SweepConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum JSON body size in bytes
    pub max_json_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_json_size: 64 * 1024,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root holding one sub-directory per folder of finished artifacts
    pub base_path: String,
    /// Root for in-flight chunk units
    pub temp_path: String,
    /// Folder used when a completion request names none
    pub default_folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./data/storage".to_string(),
            temp_path: "./data/temp".to_string(),
            default_folder: "uploads".to_string(),
        }
    }
}

/// Catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub backend: CatalogBackend,
    /// Database file path
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: CatalogBackend::SQLite,
            db_path: "./data/catalog.db".to_string(),
            wal_mode: true,
        }
    }
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted chunk payload in bytes
    pub max_chunk_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 100 * 1024 * 1024, // 100MiB
        }
    }
}

/// Sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Age after which an untouched upload session is considered abandoned
    pub retention_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,     // 10 minutes
            retention_secs: 86_400, // 24 hours
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `MEDIA_VAULT_CONFIG` or `config.yaml`, using
    /// defaults if the file is not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if Path::new(&config_path).exists() {
            let config = Self::load_from(&config_path)?;
            info!("Loaded configuration from {}", config_path);
            config
        } else {
            warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Backend selection may be overridden through `STORAGE_BACKEND` / `CATALOG_BACKEND`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("STORAGE_BACKEND") {
            match value.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.storage.backend = backend;
                }
                Err(e) => warn!("Invalid storage backend in environment: {}", e),
            }
        }
        if let Ok(value) = env::var("CATALOG_BACKEND") {
            match value.parse::<CatalogBackend>() {
                Ok(backend) => {
                    info!("Using catalog backend from environment: {:?}", backend);
                    self.catalog.backend = backend;
                }
                Err(e) => warn!("Invalid catalog backend in environment: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("MOCK".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert!("xfs2".parse::<StorageBackend>().is_err());

        assert_eq!("SQLite".parse::<CatalogBackend>().unwrap(), CatalogBackend::SQLite);
        assert_eq!("mock".parse::<CatalogBackend>().unwrap(), CatalogBackend::Mock);
        assert!("postgres".parse::<CatalogBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.upload.max_chunk_size, 100 * 1024 * 1024);
        assert_eq!(config.storage.default_folder, "uploads");
        assert_eq!(config.sweep.retention_secs, 86_400);
        assert_eq!(config.catalog.backend, CatalogBackend::SQLite);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  base_path: /srv/media\n  backend: Mock\nupload:\n  max_chunk_size: 1024\n"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.storage.base_path, "/srv/media");
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.storage.temp_path, "./data/temp");
        assert_eq!(config.upload.max_chunk_size, 1024);
        assert_eq!(config.server.port, 9710);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("STORAGE_BACKEND", "mock");
        env::set_var("CATALOG_BACKEND", "nonsense");
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.catalog.backend, CatalogBackend::SQLite);

        env::remove_var("STORAGE_BACKEND");
        env::remove_var("CATALOG_BACKEND");
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 8088\n").unwrap();
        env::set_var(CONFIG_PATH_ENV, file.path());

        let config = AppConfig::load().unwrap();
        assert_eq!(config.server.port, 8088);

        env::remove_var(CONFIG_PATH_ENV);
    }
}
