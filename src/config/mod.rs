//! Application configuration.
//!
//! Aggregates the event log, bus and destination store sections into a single
//! Config struct that can be loaded from YAML files or environment variables.
//!
//! ```yaml
//! event_log:
//!   dir: ./data/eventlog
//!   file_base_name: events
//!   max_segment_bytes: 10485760
//!   keep_segments: 3
//! bus:
//!   check_unsent_interval_ms: 30000
//!   streaming_enabled: true
//! destinations:
//!   type: sqlite
//!   path: ./data/destinations.db
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::bus::BusConfig;
use crate::log::EventLogConfig;
use crate::storage::DestinationStoreConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "logstream.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LOGSTREAM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LOGSTREAM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LOGSTREAM_LOG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub event_log: EventLogConfig,
    pub bus: BusConfig,
    pub destinations: DestinationStoreConfig,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. `LOGSTREAM__SECTION__KEY` environment variables
    /// 2. File named by `LOGSTREAM_CONFIG`
    /// 3. File passed as `path`
    /// 4. `logstream.yaml` in the working directory
    /// 5. Defaults
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Config for tests: log under `dir`, in-memory destination store.
    pub fn for_test(dir: impl Into<PathBuf>) -> Self {
        Self {
            event_log: EventLogConfig::in_dir(dir),
            destinations: DestinationStoreConfig {
                store_type: "memory".to_string(),
                path: String::new(),
            },
            ..Self::default()
        }
    }
}
