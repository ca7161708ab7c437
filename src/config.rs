//! Configuration System
//!
//! Layered configuration for the engine: built-in defaults, then an optional config file
//! (TOML, YAML or JSON, picked by extension), then `SHELF_`-prefixed environment variables.

use crate::codec::Format;
use crate::error::{Result, StoreError};
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfConfig {
    /// Directory holding one sub-directory per store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Entry file format: json, yaml or xml
    #[serde(default = "default_format")]
    pub format: String,

    /// Raise the default log level to debug
    #[serde(default)]
    pub verbose: bool,

    /// Watch store directories for external edits
    #[serde(default = "default_true")]
    pub watch: bool,

    /// How long a self-change token waits for its filesystem event
    #[serde(default = "default_suppression_ttl_ms")]
    pub suppression_ttl_ms: u64,

    /// Quiet period before an externally written entry is reloaded
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_suppression_ttl_ms() -> u64 {
    5_000
}

fn default_debounce_ms() -> u64 {
    50
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            format: default_format(),
            verbose: false,
            watch: default_true(),
            suppression_ttl_ms: default_suppression_ttl_ms(),
            debounce_ms: default_debounce_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ShelfConfig {
    /// Parsed entry format
    pub fn format(&self) -> Result<Format> {
        self.format.parse()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("Storage dir cannot be empty".to_string()));
        }
        self.format()?;
        if self.suppression_ttl_ms == 0 {
            return Err(StoreError::Config(
                "Suppression ttl must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Logging settings with the verbose toggle applied
    pub fn effective_logging(&self) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if self.verbose {
            logging.level = "debug".to_string();
        }
        logging
    }
}

/// Loads [`ShelfConfig`] from defaults, file and environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration; `path`, when given, must exist.
    pub fn load(path: Option<&Path>) -> Result<ShelfConfig> {
        let mut builder = Self::builder_with_defaults()?;
        if let Some(path) = path {
            debug!(config_path = %path.display(), "Loading config file");
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix("SHELF").try_parsing(true));

        let config: ShelfConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load only a config file, without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<ShelfConfig> {
        let config: ShelfConfig = Self::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("storage_dir", "./storage")?
            .set_default("format", "json")?
            .set_default("verbose", false)?
            .set_default("watch", true)?
            .set_default("suppression_ttl_ms", 5_000i64)?
            .set_default("debounce_ms", 50i64)?)
    }
}
