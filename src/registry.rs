//! Type registry
//!
//! Binds each store name to the Rust type of the values it holds. Typed callers get their
//! `Store<T>` back through a checked downcast; the watcher only needs the type-erased
//! [`StoreHandle`] view to reload or drop entries by id.

use crate::error::{Result, StoreError};
use crate::events::EventKind;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Values a store can hold
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Structural shape registered for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_name: &'static str,
    pub type_id: TypeId,
}

impl TypeDescriptor {
    pub fn of<T: Record>() -> Self {
        Self {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Type-erased operations the engine and the reconciler run on any store
pub trait StoreHandle: Send + Sync {
    /// Load every entry file of the store into memory.
    fn populate(&self) -> Result<usize>;

    /// Decode `id` from disk and install it, emitting create or update unless unchanged.
    fn load_from_file(&self, id: &str) -> Result<Option<EventKind>>;

    /// Drop `id` after its file disappeared outside the engine.
    fn remove_external(&self, id: &str) -> Result<()>;
}

struct Registration {
    descriptor: TypeDescriptor,
    handle: Arc<dyn StoreHandle>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Name-to-store table
#[derive(Default)]
pub struct TypeRegistry {
    stores: RwLock<HashMap<String, Registration>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `store` under `name`, returning the descriptor it replaced, if any.
    pub fn insert<S>(&self, name: &str, store: Arc<S>) -> Option<TypeDescriptor>
    where
        S: StoreHandle + Any + Send + Sync,
        S: Typed,
    {
        let registration = Registration {
            descriptor: S::descriptor(),
            handle: store.clone() as Arc<dyn StoreHandle>,
            typed: store as Arc<dyn Any + Send + Sync>,
        };
        self.stores
            .write()
            .insert(name.to_string(), registration)
            .map(|old| old.descriptor)
    }

    /// Descriptor of the shape registered for `name`
    pub fn shape_of(&self, name: &str) -> Result<TypeDescriptor> {
        self.stores
            .read()
            .get(name)
            .map(|r| r.descriptor)
            .ok_or_else(|| StoreError::StoreNotFound(name.to_string()))
    }

    pub fn handle(&self, name: &str) -> Result<Arc<dyn StoreHandle>> {
        self.stores
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.handle))
            .ok_or_else(|| StoreError::StoreNotFound(name.to_string()))
    }

    /// Typed lookup; fails with `ShapeMismatch` when `S` is not what was registered.
    pub fn typed<S>(&self, name: &str) -> Result<Arc<S>>
    where
        S: Any + Send + Sync + Typed,
    {
        let (descriptor, typed) = {
            let stores = self.stores.read();
            let registration = stores
                .get(name)
                .ok_or_else(|| StoreError::StoreNotFound(name.to_string()))?;
            (registration.descriptor, Arc::clone(&registration.typed))
        };
        typed
            .downcast::<S>()
            .map_err(|_| StoreError::ShapeMismatch {
                store: name.to_string(),
                registered: descriptor.type_name,
                requested: S::descriptor().type_name,
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }

    pub fn handles(&self) -> Vec<Arc<dyn StoreHandle>> {
        self.stores
            .read()
            .values()
            .map(|r| Arc::clone(&r.handle))
            .collect()
    }
}

/// Containers that know the descriptor of the values they hold
pub trait Typed {
    fn descriptor() -> TypeDescriptor;
}
