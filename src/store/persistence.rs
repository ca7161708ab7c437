//! On-disk layout for entry files
//!
//! `{root}/{store}/{id}.{ext}`, one file per entry. Writes land in `{id}.{ext}.tmp` first and are
//! renamed into place, so the entry file is always either the old or the new complete content.

use crate::codec::Format;
use crate::error::{Result, StoreError};
use crate::store::id::validate_id;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const TEMP_SUFFIX: &str = "tmp";

/// Path arithmetic for one storage root and format
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    format: Format,
}

impl Layout {
    pub fn new<P: AsRef<Path>>(root: P, format: Format) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(store)
    }

    pub fn entry_path(&self, store: &str, id: &str) -> PathBuf {
        self.store_dir(store)
            .join(format!("{}.{}", id, self.format.extension()))
    }

    /// Create the root and the store directory if missing.
    pub fn ensure_store_dir(&self, store: &str) -> Result<PathBuf> {
        let dir = self.store_dir(store);
        fs::create_dir_all(&dir).map_err(|e| StoreError::fs(&dir, e))?;
        Ok(dir)
    }

    /// Ids of every entry file in a store directory.
    ///
    /// Sub-directories, temp files, other extensions and stems that are not valid ids are
    /// skipped.
    pub fn list_ids(&self, store: &str) -> Result<Vec<String>> {
        let dir = self.store_dir(store);
        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                StoreError::fs(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.id_from_file_name(entry.path()) {
                Some(id) => ids.push(id),
                None => debug!(path = ?entry.path(), "Skipping non-entry file"),
            }
        }
        Ok(ids)
    }

    fn id_from_file_name(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        if ext != self.format.extension() {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        validate_id(stem).ok()?;
        Some(stem.to_string())
    }
}

/// Write bytes through a temp file in the same directory and rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    fs::write(&temp_path, bytes).map_err(|e| StoreError::fs(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StoreError::fs(path, e)
    })?;

    Ok(())
}

pub fn read_entry(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| StoreError::fs(path, e))
}

/// Remove an entry file. Returns false when it was already gone.
pub fn remove_entry(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::fs(path, e)),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}
