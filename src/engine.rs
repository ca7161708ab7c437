//! Shelf engine
//!
//! Owns the storage root, the registered stores and the watch thread. Typical use:
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use shelf::{Shelf, ShelfConfig};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Widget { name: String, count: i64 }
//!
//! let shelf = Shelf::new(ShelfConfig::default())?;
//! shelf.register::<Widget>("widgets")?;
//! shelf.run()?;
//!
//! let widgets = shelf.store::<Widget>("widgets")?;
//! let id = widgets.new_entry(Widget { name: "bolt".into(), count: 5 })?;
//! widgets.delete(&id)?;
//! # Ok::<(), shelf::StoreError>(())
//! ```

use crate::codec::Format;
use crate::config::ShelfConfig;
use crate::error::{Result, StoreError};
use crate::events::{EventEmitter, EventHandler, EventKind};
use crate::ledger::ModLedger;
use crate::registry::{Record, TypeDescriptor, TypeRegistry};
use crate::store::{Layout, Store, StoreContext};
use crate::watch::{Reconciler, WatchHandle};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Dispatch};

/// Embedded object store rooted at one directory
pub struct Shelf {
    config: ShelfConfig,
    format: Format,
    ctx: Arc<StoreContext>,
    registry: Arc<TypeRegistry>,
    dispatch: Option<Dispatch>,
    state: Mutex<Lifecycle>,
}

enum Lifecycle {
    Configured,
    Starting,
    Running(Option<WatchHandle>),
    Stopped,
}

impl Shelf {
    /// Create an engine; logs go to whatever subscriber is current for the caller.
    pub fn new(config: ShelfConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create an engine that logs through `dispatch`.
    ///
    /// `run` and the watch thread emit all their records through it.
    pub fn with_dispatch(config: ShelfConfig, dispatch: Dispatch) -> Result<Self> {
        Self::build(config, Some(dispatch))
    }

    fn build(config: ShelfConfig, dispatch: Option<Dispatch>) -> Result<Self> {
        config.validate()?;
        let format = config.format()?;
        let ctx = Arc::new(StoreContext {
            layout: Layout::new(&config.storage_dir, format),
            ledger: Arc::new(ModLedger::new(Duration::from_millis(
                config.suppression_ttl_ms,
            ))),
            events: EventEmitter::new(),
        });
        Ok(Self {
            config,
            format,
            ctx,
            registry: Arc::new(TypeRegistry::new()),
            dispatch,
            state: Mutex::new(Lifecycle::Configured),
        })
    }

    /// Register a store holding values of type `T`.
    ///
    /// Must happen before [`Shelf::run`]. Registering a name again replaces the store and
    /// orphans every handle to the previous one.
    pub fn register<T: Record>(&self, name: &str) -> Result<Arc<Store<T>>> {
        if !matches!(*self.state.lock(), Lifecycle::Configured) {
            return Err(StoreError::Lifecycle(format!(
                "Cannot register store {} after run",
                name
            )));
        }
        validate_store_name(name)?;

        let store = Arc::new(Store::<T>::new(name, Arc::clone(&self.ctx)));
        let descriptor = TypeDescriptor::of::<T>();
        if let Some(previous) = self.registry.insert(name, Arc::clone(&store)) {
            warn!(
                store = name,
                previous = previous.type_name,
                current = descriptor.type_name,
                "Store registered again; existing entries are orphaned"
            );
        } else {
            info!(store = name, shape = descriptor.type_name, "Registered store");
        }
        Ok(store)
    }

    /// Register using a sample value; only its type is recorded.
    pub fn register_sample<T: Record>(&self, name: &str, _sample: &T) -> Result<Arc<Store<T>>> {
        self.register::<T>(name)
    }

    /// Install the callback notified of every committed mutation.
    ///
    /// The handler runs synchronously on the thread that committed the change, including the
    /// thread calling [`Shelf::run`] while stores are populated. Handlers invoked for external
    /// edits run on the watch thread and must not call [`Shelf::shutdown`], which joins it.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(EventKind, &str, &str) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.ctx.events.set_handler(handler);
    }

    /// Create directories, load existing files, and start watching when enabled.
    ///
    /// A watcher that fails to start is reported as `WatcherSetup`; directories and loaded
    /// entries stay in place and the stores remain usable. The state lock is not held while
    /// stores are populated, so event handlers may call back into the engine.
    pub fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, Lifecycle::Configured) {
                return Err(StoreError::Lifecycle("Shelf is already running".to_string()));
            }
            *state = Lifecycle::Starting;
        }

        let (next, result) = self.in_context(|| self.start());
        let mut state = self.state.lock();
        if matches!(*state, Lifecycle::Stopped) {
            // A shutdown that arrived while starting wins.
            if let Lifecycle::Running(Some(mut watch)) = next {
                watch.stop();
            }
        } else {
            *state = next;
        }
        result
    }

    fn start(&self) -> (Lifecycle, Result<()>) {
        let root = match self.init_storage() {
            Ok(root) => root,
            Err(e) => return (Lifecycle::Running(None), Err(e)),
        };
        for handle in self.registry.handles() {
            if let Err(e) = handle.populate() {
                return (Lifecycle::Running(None), Err(e));
            }
        }

        if !self.config.watch {
            info!("Shelf running without file watching");
            return (Lifecycle::Running(None), Ok(()));
        }

        let dirs = self
            .registry
            .names()
            .iter()
            .map(|name| root.join(name))
            .collect();
        let reconciler = Reconciler::new(
            root,
            self.format,
            Arc::clone(&self.ctx.ledger),
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.debounce_ms),
        );
        match WatchHandle::spawn(reconciler, dirs, self.dispatch.clone()) {
            Ok(watch) => {
                info!("Shelf running");
                (Lifecycle::Running(Some(watch)), Ok(()))
            }
            Err(e) => (Lifecycle::Running(None), Err(e)),
        }
    }

    /// Stop the watch thread. Stores stay usable; calling again is a no-op.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if let Lifecycle::Running(Some(watch)) = &mut *state {
            watch.stop();
        }
        if matches!(*state, Lifecycle::Running(_) | Lifecycle::Starting) {
            *state = Lifecycle::Stopped;
        }
    }

    /// Typed handle to a registered store
    pub fn store<T: Record>(&self, name: &str) -> Result<Arc<Store<T>>> {
        self.registry.typed::<Store<T>>(name)
    }

    /// Shape registered for `name`
    pub fn shape_of(&self, name: &str) -> Result<TypeDescriptor> {
        self.registry.shape_of(name)
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names = self.registry.names();
        names.sort();
        names
    }

    pub fn root(&self) -> &Path {
        self.ctx.layout.root()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    pub fn is_watching(&self) -> bool {
        matches!(&*self.state.lock(), Lifecycle::Running(Some(w)) if w.is_running())
    }

    /// Number of pending self-change tokens
    pub fn pending_suppressions(&self) -> usize {
        self.ctx.ledger.len()
    }

    /// Create the root and one directory per store; returns the canonical root.
    fn init_storage(&self) -> Result<PathBuf> {
        let root = self.ctx.layout.root();
        fs::create_dir_all(root).map_err(|e| StoreError::fs(root, e))?;
        for name in self.registry.names() {
            self.ctx.layout.ensure_store_dir(&name)?;
        }
        dunce::canonicalize(root).map_err(|e| StoreError::fs(root, e))
    }

    fn in_context<R>(&self, f: impl FnOnce() -> R) -> R {
        let scoped = || {
            let span = info_span!("shelf", root = %self.ctx.layout.root().display());
            let _enter = span.enter();
            f()
        };
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, scoped),
            None => scoped(),
        }
    }
}

impl Drop for Shelf {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_store_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(StoreError::Config(format!("Invalid store name: {:?}", name)))
    }
}
