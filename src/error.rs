//! Error types for the shelf object store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by store, codec, registry and lifecycle operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid id {0:?}: ids must be non-empty and contain only letters, digits and dashes")]
    InvalidId(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Entry not found: {store}/{id}")]
    EntryNotFound { store: String, id: String },

    #[error("Store is empty: {0}")]
    EmptyStore(String),

    #[error("Store {store} holds {registered}, not {requested}")]
    ShapeMismatch {
        store: String,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("Unsupported format: {0} (must be 'json', 'yaml' or 'xml')")]
    UnsupportedFormat(String),

    #[error("Codec error ({format}): {message}")]
    Codec { format: &'static str, message: String },

    #[error("Filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watcher setup failed: {0}")]
    WatcherSetup(String),

    #[error("Malformed change event: {0}")]
    MalformedChangeEvent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
}

impl StoreError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn entry_not_found(store: &str, id: &str) -> Self {
        StoreError::EntryNotFound {
            store: store.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
