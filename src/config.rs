//! Service configuration.
//!
//! Settings layer three sources: built-in defaults, an optional TOML file,
//! and `SANDCASTLE_`-prefixed environment variables (`__` separates
//! nesting, e.g. `SANDCASTLE_POOL__MAX_SIZE=100`). Durations are seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::sandbox::{PoolConfig, SandboxConfig};
use crate::session::ManagerConfig;
use crate::workspace::ArchiveConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub pool: PoolSettings,
    pub sandbox: SandboxSettings,
    pub session: SessionSettings,
    pub archive: ArchiveSettings,
    pub database: DatabaseSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            pool: PoolSettings::default(),
            sandbox: SandboxSettings::default(),
            session: SessionSettings::default(),
            archive: ArchiveSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    pub warmup_size: usize,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 50,
            warmup_size: 5,
            idle_timeout_secs: 30 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub image: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub disk_size_mb: u64,
    pub max_execution_secs: u64,
    pub max_output_bytes: usize,
    pub network_enabled: bool,
    pub work_dir: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let defaults = SandboxConfig::default();
        Self {
            image: defaults.image,
            cpu_count: defaults.cpu_count,
            memory_mb: defaults.memory_mb,
            disk_size_mb: defaults.disk_size_mb,
            max_execution_secs: defaults.max_execution_time.as_secs(),
            max_output_bytes: defaults.max_output_bytes,
            network_enabled: defaults.network_enabled,
            work_dir: defaults.work_dir,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
            max_ttl_secs: 7 * 24 * 60 * 60,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Directory the local object store treats as its bucket.
    pub root: PathBuf,
    /// Key prefix for workspace objects.
    pub key_prefix: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/archives"),
            key_prefix: "workspaces".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path; ":memory:" selects the in-memory store.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "./data/sandcastle.db".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(Environment::with_prefix("SANDCASTLE").separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| Error::PreconditionFailed(format!("invalid configuration: {e}")))
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            image: self.sandbox.image.clone(),
            cpu_count: self.sandbox.cpu_count,
            memory_mb: self.sandbox.memory_mb,
            disk_size_mb: self.sandbox.disk_size_mb,
            max_execution_time: Duration::from_secs(self.sandbox.max_execution_secs),
            max_output_bytes: self.sandbox.max_output_bytes,
            network_enabled: self.sandbox.network_enabled,
            work_dir: self.sandbox.work_dir.clone(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_size: self.pool.min_size,
            max_size: self.pool.max_size,
            warmup_size: self.pool.warmup_size,
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            cleanup_interval: Duration::from_secs(self.pool.cleanup_interval_secs),
            sandbox: self.sandbox_config(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            default_ttl: Duration::from_secs(self.session.default_ttl_secs),
            max_ttl: Duration::from_secs(self.session.max_ttl_secs),
            cleanup_interval: Duration::from_secs(self.session.cleanup_interval_secs),
            default_image: self.sandbox.image.clone(),
            default_cpu_count: self.sandbox.cpu_count,
            default_memory_mb: self.sandbox.memory_mb,
        }
    }

    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            key_prefix: self.archive.key_prefix.clone(),
        }
    }
}
