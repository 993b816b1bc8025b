//! Configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `PARKD_`-prefixed environment variables with `__` between sections and
//! keys (`PARKD_SERVER__PORT=9000`). Command-line flags override on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{AvailabilityCache, MemoryAvailabilityCache};
use crate::engine::{
    EngineOptions, ParkingEngine, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_SPACES_PER_LOT,
};
use crate::error::{Error, Result};
use crate::storage::locks::DEFAULT_LOCK_TIMEOUT_MS;
use crate::storage::{JournalSpaceStore, MemorySpaceStore, SpaceStore};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "PARKD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub engine: EngineSettings,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    pub cors: bool,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            cors: true,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Spaces are lost on exit
    Memory,
    /// Append-only journal under `data_dir`
    Journal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// Flush every journal batch to disk before acknowledging it
    pub fsync: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Journal,
            data_dir: PathBuf::from("data/parkd"),
            fsync: true,
        }
    }
}

impl StorageSettings {
    pub fn open_store(&self) -> Result<Arc<dyn SpaceStore>> {
        Ok(match self.backend {
            StorageBackend::Memory => Arc::new(MemorySpaceStore::new()),
            StorageBackend::Journal => Arc::new(JournalSpaceStore::open(&self.data_dir, self.fsync)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub lock_timeout_ms: u64,
    pub max_attempts: u32,
    pub max_spaces_per_lot: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_spaces_per_lot: DEFAULT_MAX_SPACES_PER_LOT,
        }
    }
}

impl EngineSettings {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            max_attempts: self.max_attempts,
            max_spaces_per_lot: self.max_spaces_per_lot,
        }
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}

impl Settings {
    /// Load defaults, the optional file at `path`, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)
    }

    /// Parse settings from TOML text, without the environment layer.
    pub fn from_toml(text: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Open the configured store and build an engine over a fresh cache.
    pub fn open_engine(&self) -> Result<ParkingEngine> {
        let store = self.storage.open_store()?;
        let cache: Arc<dyn AvailabilityCache> = Arc::new(MemoryAvailabilityCache::new());
        Ok(ParkingEngine::with_options(store, cache, self.engine.options()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 9000

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.bind, "127.0.0.1");
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.engine, EngineSettings::default());
    }

    #[test]
    fn test_invalid_backend_is_config_error() {
        let err = Settings::from_toml("[storage]\nbackend = \"sqlite\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_output_parses_back() {
        let mut settings = Settings::default();
        settings.engine.max_attempts = 7;
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml(&text).unwrap(), settings);
    }

    #[test]
    fn test_engine_options() {
        let options = EngineSettings {
            lock_timeout_ms: 250,
            max_attempts: 5,
            max_spaces_per_lot: 64,
        }
        .options();
        assert_eq!(options.lock_timeout, Duration::from_millis(250));
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.max_spaces_per_lot, 64);
    }
}
