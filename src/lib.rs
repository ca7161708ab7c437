//! Shelf: embedded filesystem-backed object store
//!
//! Named stores persist typed values as one file per entry under a storage root, and stay in
//! sync with both in-process mutations and edits made to those files by other processes.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod store;
pub mod watch;

pub use codec::Format;
pub use config::{ConfigLoader, ShelfConfig};
pub use engine::Shelf;
pub use error::{Result, StoreError};
pub use events::{EventKind, StoreEvent};
pub use registry::{Record, TypeDescriptor};
pub use store::Store;
