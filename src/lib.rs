//! Versioned offline request cache.
//!
//! Every outbound request is routed by path prefix to one of two strategies:
//! cache-first for the static assets listed in a version's manifest, and
//! network-first with stale fallback for API endpoints. Responses live in
//! per-version namespaces of a durable registry; activating a new version
//! deletes every namespace that belongs to another one.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod interceptor;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod strategy;

pub use config::{CacheConfig, Config};
pub use error::{CacheError, FetchError, StorageError};
pub use event::{ControlChannel, ControlMessage, Dispatcher, Event, Outcome};
pub use lifecycle::{Lifecycle, LifecycleState};
