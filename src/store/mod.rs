//! Entry store
//!
//! In-memory map of entry id to value for one registered store, with one reader/writer lock per
//! entry and one file per entry on disk. Every mutation is written through to the file and
//! reported to the event emitter.
//!
//! Locking: the map lock is held only to look up an entry or to insert a fresh empty slot. All
//! reads and writes of a value happen under that entry's own lock, so operations on different
//! ids never wait on each other. A delete empties its slot and detaches it from the map while
//! holding the entry lock; writers that queued on a detached slot start over with a new one.

pub mod id;
pub mod persistence;

pub use id::{new_id, validate_id};
pub use persistence::Layout;

use crate::error::{Result, StoreError};
use crate::events::{EventEmitter, EventKind};
use crate::ledger::{Method, ModLedger};
use crate::registry::{Record, StoreHandle, TypeDescriptor, Typed};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared collaborators of every store in one engine
pub(crate) struct StoreContext {
    pub layout: Layout,
    pub ledger: Arc<ModLedger>,
    pub events: EventEmitter,
}

struct Entry<T> {
    value: RwLock<Option<T>>,
}

impl<T> Entry<T> {
    fn empty() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }
}

/// A named collection of `T` values persisted one file per entry
pub struct Store<T> {
    name: String,
    ctx: Arc<StoreContext>,
    entries: RwLock<HashMap<String, Arc<Entry<T>>>>,
}

impl<T: Record> Store<T> {
    pub(crate) fn new(name: &str, ctx: Arc<StoreContext>) -> Self {
        Self {
            name: name.to_string(),
            ctx,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this store's entry files
    pub fn dir(&self) -> PathBuf {
        self.ctx.layout.store_dir(&self.name)
    }

    /// Path of the file backing `id`
    pub fn entry_path(&self, id: &str) -> PathBuf {
        self.ctx.layout.entry_path(&self.name, id)
    }

    /// Create or replace `id`, persist it and emit `create` or `update`.
    ///
    /// The value is encoded before anything is mutated, so codec errors leave the store
    /// untouched. A failed file write leaves the new value in memory and is returned.
    pub fn set(&self, id: &str, value: T) -> Result<EventKind> {
        validate_id(id)?;
        let bytes = self.ctx.layout.format().encode(&value)?;

        let kind = loop {
            let entry = self.slot(id);
            let mut guard = entry.value.write();
            if !self.is_current(id, &entry) {
                continue;
            }
            let kind = if guard.is_some() {
                EventKind::Update
            } else {
                EventKind::Create
            };
            *guard = Some(value);
            self.write_file(id, &bytes)?;
            break kind;
        };

        debug!(store = %self.name, id, kind = %kind, "Set entry");
        self.ctx.events.emit(kind, &self.name, id);
        Ok(kind)
    }

    /// Store `value` under a freshly generated id and return the id.
    pub fn new_entry(&self, value: T) -> Result<String> {
        let id = new_id();
        self.set(&id, value)?;
        Ok(id)
    }

    /// Copy of the value stored under `id`
    pub fn get(&self, id: &str) -> Result<T> {
        validate_id(id)?;
        let entry = self
            .existing(id)
            .ok_or_else(|| StoreError::entry_not_found(&self.name, id))?;
        let guard = entry.value.read();
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| StoreError::entry_not_found(&self.name, id))
    }

    /// Remove `id` from memory and disk and emit `delete`.
    ///
    /// A backing file that is already gone counts as removed.
    pub fn delete(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        self.remove(id, true)
    }

    /// Snapshot of all ids, in no particular order
    pub fn ids(&self) -> Vec<String> {
        self.live_entries()
            .into_iter()
            .filter(|(_, entry)| entry.value.read().is_some())
            .map(|(id, _)| id)
            .collect()
    }

    /// Snapshot of every entry; fails with `EmptyStore` when there are none.
    pub fn get_all(&self) -> Result<HashMap<String, T>> {
        let all: HashMap<String, T> = self
            .live_entries()
            .into_iter()
            .filter_map(|(id, entry)| {
                let value = entry.value.read().clone();
                value.map(|v| (id, v))
            })
            .collect();
        if all.is_empty() {
            return Err(StoreError::EmptyStore(self.name.clone()));
        }
        Ok(all)
    }

    /// Delete every entry, stopping at the first failure. Returns the number deleted.
    pub fn purge(&self) -> Result<usize> {
        let ids = self.ids();
        for (deleted, id) in ids.iter().enumerate() {
            if let Err(e) = self.delete(id) {
                warn!(store = %self.name, id = %id, error = %e, deleted, "Purge aborted");
                return Err(e);
            }
        }
        info!(store = %self.name, count = ids.len(), "Purged store");
        Ok(ids.len())
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-encode the in-memory value of `id` and write it to its file.
    pub fn save_to_file(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let entry = self
            .existing(id)
            .ok_or_else(|| StoreError::entry_not_found(&self.name, id))?;
        // Exclusive, so two writers never share the temp file.
        let guard = entry.value.write();
        let value = guard
            .as_ref()
            .ok_or_else(|| StoreError::entry_not_found(&self.name, id))?;
        let bytes = self.ctx.layout.format().encode(value)?;
        self.write_file(id, &bytes)
    }

    /// Decode the file of `id` into a new value and install it.
    ///
    /// Used at startup and by the watcher. Emits `create` or `update` and returns the kind, or
    /// returns `None` without emitting when the file holds the value already in memory.
    pub fn load_from_file(&self, id: &str) -> Result<Option<EventKind>> {
        validate_id(id)?;
        let path = self.entry_path(id);
        let format = self.ctx.layout.format();
        let bytes = persistence::read_entry(&path)?;
        let value: T = format.decode(&bytes)?;
        let canonical = format.encode(&value)?;

        let kind = loop {
            let entry = self.slot(id);
            let mut guard = entry.value.write();
            if !self.is_current(id, &entry) {
                continue;
            }
            let kind = match guard.as_ref() {
                Some(current) => {
                    if format.encode(current)? == canonical {
                        debug!(store = %self.name, id, "Entry file unchanged");
                        return Ok(None);
                    }
                    EventKind::Update
                }
                None => EventKind::Create,
            };
            *guard = Some(value);
            break kind;
        };

        debug!(store = %self.name, id, kind = %kind, path = ?path, "Loaded entry from file");
        self.ctx.events.emit(kind, &self.name, id);
        Ok(Some(kind))
    }

    fn write_file(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(id);
        // Recorded before the rename lands so the watcher cannot observe it first.
        self.ctx.ledger.record(Method::Set, &self.name, id);
        persistence::write_atomic(&path, bytes)
    }

    fn remove(&self, id: &str, own_change: bool) -> Result<()> {
        let entry = self
            .existing(id)
            .ok_or_else(|| StoreError::entry_not_found(&self.name, id))?;
        {
            let mut guard = entry.value.write();
            if guard.is_none() {
                return Err(StoreError::entry_not_found(&self.name, id));
            }
            if own_change {
                let path = self.entry_path(id);
                self.ctx.ledger.record(Method::Delete, &self.name, id);
                if !persistence::remove_entry(&path)? {
                    debug!(store = %self.name, id, "Entry file already removed");
                }
            }
            *guard = None;

            let mut entries = self.entries.write();
            if entries.get(id).is_some_and(|e| Arc::ptr_eq(e, &entry)) {
                entries.remove(id);
            }
        }

        debug!(store = %self.name, id, external = !own_change, "Deleted entry");
        self.ctx.events.emit(EventKind::Delete, &self.name, id);
        Ok(())
    }

    fn existing(&self, id: &str) -> Option<Arc<Entry<T>>> {
        self.entries.read().get(id).cloned()
    }

    /// Existing entry for `id`, or a new empty one inserted atomically.
    fn slot(&self, id: &str) -> Arc<Entry<T>> {
        if let Some(entry) = self.existing(id) {
            return entry;
        }
        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Entry::empty())),
        )
    }

    fn is_current(&self, id: &str, entry: &Arc<Entry<T>>) -> bool {
        self.entries
            .read()
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e, entry))
    }

    fn live_entries(&self) -> Vec<(String, Arc<Entry<T>>)> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }
}

impl<T: Record> Typed for Store<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<T>()
    }
}

impl<T: Record> StoreHandle for Store<T> {
    fn populate(&self) -> Result<usize> {
        let mut loaded = 0;
        for id in self.ctx.layout.list_ids(&self.name)? {
            match self.load_from_file(&id) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(store = %self.name, id = %id, error = %e, "Failed to load entry"),
            }
        }
        info!(store = %self.name, loaded, "Populated store");
        Ok(loaded)
    }

    fn load_from_file(&self, id: &str) -> Result<Option<EventKind>> {
        Store::load_from_file(self, id)
    }

    fn remove_external(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        self.remove(id, false)
    }
}
