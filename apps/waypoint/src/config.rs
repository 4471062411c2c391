//! # Configuration
//!
//! Settings for the Waypoint binary, read from an optional TOML file:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! backend = "redb"        # or "memory"
//! path = "waypoint.redb"
//!
//! [runtime]
//! workers = 4
//! ```
//!
//! Missing sections and keys fall back to their defaults. CLI flags are
//! applied on top by the caller.

use crate::walkers::builtin_registry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waypoint_core::{
    Machine, MachineConfig, MemoryGraph, WaypointError, primitives::DEFAULT_WORKER_THREADS,
};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "waypoint.toml";

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

/// `[server]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Which graph store backs the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on exit.
    Memory,
    /// Durable redb file.
    #[default]
    Redb,
}

impl std::str::FromStr for StorageBackend {
    type Err = WaypointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(WaypointError::InvalidTarget(format!(
                "unknown storage backend '{}'. Use: memory, redb",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Redb,
            path: PathBuf::from("waypoint.redb"),
        }
    }
}

/// `[runtime]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_THREADS,
        }
    }
}

// =============================================================================
// WAYPOINT CONFIG
// =============================================================================

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
}

impl WaypointConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, WaypointError> {
        toml::from_str(text)
            .map_err(|e| WaypointError::DeserializationError(format!("Invalid config: {}", e)))
    }

    /// Load `path`, or `waypoint.toml` if it exists, or the defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, WaypointError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let metadata = std::fs::metadata(&path).map_err(|e| {
            WaypointError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(WaypointError::IoError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| WaypointError::IoError(format!("Read config: {}", e)))?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Runtime settings for the core machine.
    #[must_use]
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            workers: self.runtime.workers,
        }
    }

    /// Open a machine over the configured store with the built-in
    /// archetypes registered.
    pub fn open_machine(&self) -> Result<Arc<Machine>, WaypointError> {
        let registry = builtin_registry();
        match self.storage.backend {
            StorageBackend::Memory => Machine::with_store(
                Arc::new(MemoryGraph::new()),
                registry,
                self.machine_config(),
            ),
            StorageBackend::Redb => {
                Machine::open(&self.storage.path, registry, self.machine_config())
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = WaypointConfig::from_toml("").expect("parse");
        assert_eq!(config, WaypointConfig::default());
        assert_eq!(config.storage.backend, StorageBackend::Redb);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = WaypointConfig::from_toml(
            "[server]\nport = 9000\n\n[storage]\nbackend = \"memory\"\n",
        )
        .expect("parse");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.runtime.workers, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(WaypointConfig::from_toml("[storage]\nbackend = \"sqlite\"\n").is_err());
        assert!("sqlite".parse::<StorageBackend>().is_err());
        assert_eq!("MEMORY".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
    }

    #[test]
    fn load_reads_explicit_file() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "[runtime]\nworkers = 2\n").expect("write");
        let config = WaypointConfig::load(Some(&path)).expect("load");
        assert_eq!(config.machine_config().workers, 2);
    }

    #[test]
    fn load_requires_explicit_file_to_exist() {
        let temp = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            WaypointConfig::load(Some(&temp.path().join("missing.toml"))),
            Err(WaypointError::IoError(_))
        ));
    }

    #[test]
    fn memory_backend_opens_a_machine() {
        let mut config = WaypointConfig::default();
        config.storage.backend = StorageBackend::Memory;
        let machine = config.open_machine().expect("machine");
        assert!(machine.registry().get("Item").is_some());
        assert!(machine.registry().get("create_item").is_some());
    }
}
