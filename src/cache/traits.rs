//! Core traits and types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, RequestKey};
use crate::error::StorageError;

/// Durable mapping from namespace name to its cached entries.
///
/// Every method is a suspension point. Writes are last-write-wins: a later
/// `store` for the same key fully replaces the earlier entry.
#[async_trait]
pub trait Registry: Send + Sync {
  /// Names of every namespace currently in the registry.
  async fn namespaces(&self) -> Result<Vec<String>, StorageError>;

  /// Create an empty namespace. No-op if it already exists.
  async fn create_namespace(&self, namespace: &str) -> Result<(), StorageError>;

  /// Look up a single entry.
  async fn lookup(
    &self,
    namespace: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StorageError>;

  /// Store an entry, creating the namespace if needed.
  async fn store(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError>;

  /// Atomically replace a namespace's full contents.
  ///
  /// Either every entry becomes visible or the namespace is left untouched.
  async fn replace_namespace(
    &self,
    namespace: &str,
    entries: Vec<CacheEntry>,
  ) -> Result<(), StorageError>;

  /// Delete a namespace and all its entries. Returns whether it existed.
  async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError>;

  /// Number of entries in a namespace (0 if it doesn't exist).
  async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError>;

  /// The version last recorded as active.
  async fn active_version(&self) -> Result<Option<String>, StorageError>;

  /// Record the version that just completed activation.
  async fn set_active_version(&self, version: &str) -> Result<(), StorageError>;

  /// The installed version parked behind the active one, if any.
  async fn waiting_version(&self) -> Result<Option<String>, StorageError>;

  /// Record or clear the waiting version.
  async fn set_waiting_version(&self, version: Option<&str>) -> Result<(), StorageError>;
}

/// Result from a strategy, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from live network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from an authoritative cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result served from the navigation fallback document.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live data from network
  Network,
  /// Cache hit, treated as authoritative
  Cache,
  /// Offline mode - network unavailable, serving a stale snapshot
  Offline,
  /// Offline navigation answered with the fallback document
  Fallback,
}
