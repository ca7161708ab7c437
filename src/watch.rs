//! Filesystem watcher and reconciler
//!
//! A dedicated thread receives raw notify events for every store directory, maps each changed
//! path back to `(store, id)` and applies the change to the store, unless the ledger says the
//! engine caused it itself. Writes from other processes are debounced per entry before the file
//! is reloaded. Reconciliation failures are logged and never end the loop.

use crate::codec::Format;
use crate::error::{Result, StoreError};
use crate::events::EventKind;
use crate::ledger::{Method, ModLedger};
use crate::registry::TypeRegistry;
use crate::store::validate_id;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind as FsEventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Dispatch};

/// How often the loop wakes up to check whether it should stop
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Direction of an entry change seen on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Write,
    Delete,
}

impl ChangeKind {
    /// Ledger method a self-caused change of this kind was recorded under
    pub fn method(&self) -> Method {
        match self {
            ChangeKind::Write => Method::Set,
            ChangeKind::Delete => Method::Delete,
        }
    }
}

/// Map a notify event kind to an entry change.
///
/// Renames are split by direction: a file renamed into place is a write (that is how the engine
/// and most editors save), a file renamed away is a delete. `Both` notifications repeat a
/// `From`/`To` pair already delivered, so they are dropped.
pub fn classify(kind: &FsEventKind, path: &Path) -> Option<ChangeKind> {
    match kind {
        FsEventKind::Create(_) => Some(ChangeKind::Write),
        FsEventKind::Modify(ModifyKind::Data(_)) | FsEventKind::Modify(ModifyKind::Any) => {
            Some(ChangeKind::Write)
        }
        FsEventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => Some(ChangeKind::Write),
            RenameMode::From => Some(ChangeKind::Delete),
            RenameMode::Any => {
                if path.exists() {
                    Some(ChangeKind::Write)
                } else {
                    Some(ChangeKind::Delete)
                }
            }
            RenameMode::Both | RenameMode::Other => None,
        },
        FsEventKind::Remove(_) => Some(ChangeKind::Delete),
        _ => None,
    }
}

/// Split `{root}/{store}/{id}.{ext}` into `(store, id)`.
pub fn parse_change_path(root: &Path, format: Format, path: &Path) -> Result<(String, String)> {
    let malformed = || StoreError::MalformedChangeEvent(path.display().to_string());

    let file = path.to_string_lossy().replace('\\', "/");
    let mut prefix = root.to_string_lossy().replace('\\', "/");
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    let relative = file.strip_prefix(prefix.as_str()).ok_or_else(malformed)?;
    let suffix = format!(".{}", format.extension());
    let relative = relative.strip_suffix(suffix.as_str()).ok_or_else(malformed)?;

    let parts: Vec<&str> = relative.split('/').collect();
    let [store, id] = parts.as_slice() else {
        return Err(malformed());
    };
    if store.is_empty() || validate_id(id).is_err() {
        return Err(malformed());
    }
    Ok((store.to_string(), id.to_string()))
}

/// Applies filesystem changes to registered stores
///
/// Deletes are applied as soon as they are seen. Writes are held per entry until no further
/// write to that entry has arrived for the debounce window, so one save that surfaces as
/// several events (create, truncate, data) reloads the file once. Self-caused changes consume
/// their ledger token on the raw event and are never queued.
pub struct Reconciler {
    root: PathBuf,
    format: Format,
    ledger: Arc<ModLedger>,
    registry: Arc<TypeRegistry>,
    debounce: Duration,
    pending: HashMap<(String, String), Instant>,
}

impl Reconciler {
    pub fn new(
        root: PathBuf,
        format: Format,
        ledger: Arc<ModLedger>,
        registry: Arc<TypeRegistry>,
        debounce: Duration,
    ) -> Self {
        Self {
            root,
            format,
            ledger,
            registry,
            debounce,
            pending: HashMap::new(),
        }
    }

    /// Handle one raw notify event. Never fails; problems are logged.
    pub fn handle_event(&mut self, event: &Event) {
        for path in &event.paths {
            let Some(change) = classify(&event.kind, path) else {
                debug!(kind = ?event.kind, path = ?path, "Ignored file change event");
                continue;
            };
            let (store, id) = match parse_change_path(&self.root, self.format, path) {
                Ok(target) => target,
                Err(e) => {
                    debug!(error = %e, "Invalid file change event");
                    continue;
                }
            };
            if self.ledger.check_and_consume(change.method(), &store, &id) {
                debug!(store = %store, id = %id, change = ?change, "Suppressed self-caused change");
                continue;
            }

            match change {
                ChangeKind::Write => {
                    self.pending
                        .insert((store, id), Instant::now() + self.debounce);
                }
                ChangeKind::Delete => {
                    self.pending.remove(&(store.clone(), id.clone()));
                    self.log_outcome(&store, &id, self.apply(change, &store, &id));
                }
            }
        }
    }

    /// Reload every queued entry whose debounce window ended at or before `now`.
    pub fn flush_due(&mut self, now: Instant) {
        let due: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for (store, id) in due {
            self.pending.remove(&(store.clone(), id.clone()));
            let outcome = self.apply(ChangeKind::Write, &store, &id);
            self.log_outcome(&store, &id, outcome);
        }
    }

    /// Earliest deadline among queued writes
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Number of writes waiting out their debounce window
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Apply a single classified change immediately.
    ///
    /// Returns the committed event kind, or `None` when the change was self-caused or left the
    /// entry as it was.
    pub fn reconcile(&self, change: ChangeKind, path: &Path) -> Result<Option<EventKind>> {
        let (store, id) = parse_change_path(&self.root, self.format, path)?;
        if self.ledger.check_and_consume(change.method(), &store, &id) {
            return Ok(None);
        }
        self.apply(change, &store, &id)
    }

    fn apply(&self, change: ChangeKind, store: &str, id: &str) -> Result<Option<EventKind>> {
        let handle = self.registry.handle(store)?;
        match change {
            ChangeKind::Write => handle.load_from_file(id),
            ChangeKind::Delete => handle
                .remove_external(id)
                .map(|_| Some(EventKind::Delete)),
        }
    }

    fn log_outcome(&self, store: &str, id: &str, outcome: Result<Option<EventKind>>) {
        match outcome {
            Ok(Some(kind)) => info!(store, id, kind = %kind, "Applied external change"),
            Ok(None) => {}
            Err(e) => warn!(store, id, error = %e, "Failed to apply file change"),
        }
    }
}

/// Running watch thread
pub struct WatchHandle {
    running: Arc<RwLock<bool>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Start watching `dirs` and wait until the watches are in place.
    ///
    /// Setup failures end the thread and are returned as `WatcherSetup`.
    pub fn spawn(
        reconciler: Reconciler,
        dirs: Vec<PathBuf>,
        dispatch: Option<Dispatch>,
    ) -> Result<Self> {
        let running = Arc::new(RwLock::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let thread_running = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("shelf-watch".to_string())
            .spawn(move || {
                let body = || {
                    let span = info_span!("shelf", root = %reconciler.root.display());
                    let _enter = span.enter();
                    watch_loop(reconciler, dirs, thread_running, ready_tx);
                };
                match dispatch {
                    Some(dispatch) => tracing::dispatcher::with_default(&dispatch, body),
                    None => body(),
                }
            })
            .map_err(|e| StoreError::WatcherSetup(format!("Failed to spawn watch thread: {}", e)))?;

        let mut handle = Self {
            running,
            thread: Some(thread),
        };
        let setup = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(StoreError::WatcherSetup("Watch thread exited".to_string())));
        if let Err(e) = setup {
            handle.stop();
            return Err(e);
        }
        Ok(handle)
    }

    pub fn is_running(&self) -> bool {
        *self.running.read() && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and join the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        *self.running.write() = false;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Watch thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(
    mut reconciler: Reconciler,
    dirs: Vec<PathBuf>,
    running: Arc<RwLock<bool>>,
    ready: mpsc::SyncSender<Result<()>>,
) {
    let (tx, rx) = mpsc::channel();
    let watcher = notify::recommended_watcher(move |res| {
        if let Err(e) = tx.send(res) {
            debug!("Dropping watch event after shutdown: {}", e);
        }
    });
    let mut watcher = match watcher {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "Failed to create watcher");
            let _ = ready.send(Err(StoreError::WatcherSetup(format!(
                "Failed to create watcher: {}",
                e
            ))));
            return;
        }
    };

    for dir in &dirs {
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            error!(dir = ?dir, error = %e, "Failed to watch store directory");
            let _ = ready.send(Err(StoreError::WatcherSetup(format!(
                "Failed to watch {}: {}",
                dir.display(),
                e
            ))));
            return;
        }
    }

    info!(stores = dirs.len(), "Watching storage");
    let _ = ready.send(Ok(()));

    loop {
        if !*running.read() {
            break;
        }
        let timeout = reconciler
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .map_or(POLL_INTERVAL, |wait| wait.min(POLL_INTERVAL));
        match rx.recv_timeout(timeout) {
            Ok(Ok(event)) => reconciler.handle_event(&event),
            Ok(Err(e)) => warn!(error = %e, "Watch error"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                error!("Watcher channel disconnected");
                break;
            }
        }
        reconciler.flush_due(Instant::now());
    }

    info!("Stopped watching storage");
}
