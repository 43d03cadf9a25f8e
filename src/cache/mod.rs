//! Versioned response cache for offline support.
//!
//! This module provides the storage half of the offline layer:
//! - Request keys and immutable response snapshots
//! - Versioned namespace names (`{app}-{kind}-{version}`)
//! - The `Registry` trait with SQLite and in-memory backends

mod entry;
mod memory;
mod namespace;
mod storage;
mod traits;

pub use entry::{CacheEntry, Destination, Request, RequestKey, Response};
pub use memory::MemoryRegistry;
pub use namespace::{NamespaceKind, NamespaceName};
pub use storage::SqliteRegistry;
pub use traits::{CacheResult, CacheSource, Registry};
