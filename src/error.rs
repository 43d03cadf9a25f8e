//! Error types for the offline cache.

use thiserror::Error;

/// Errors raised by the cache registry backends.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode entry: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("storage quota exceeded ({limit} entries)")]
  QuotaExceeded { limit: usize },

  #[error("lock poisoned: {0}")]
  Poisoned(String),

  #[error("storage task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error("corrupt entry {key}: {reason}")]
  Corrupt { key: String, reason: String },
}

/// A live fetch that never produced a response.
#[derive(Debug, Error)]
#[error("network unavailable for {url}: {reason}")]
pub struct FetchError {
  pub url: String,
  pub reason: String,
}

impl FetchError {
  pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      reason: reason.into(),
    }
  }
}

/// Errors surfaced by the request strategies and the lifecycle manager.
#[derive(Debug, Error)]
pub enum CacheError {
  /// One or more manifest fetches failed while installing a version.
  #[error("install of {version} aborted: {reason}")]
  InstallAborted { version: String, reason: String },

  /// A live fetch failed at resolution time.
  #[error(transparent)]
  NetworkUnavailable(#[from] FetchError),

  /// No cached entry exists and no fallback applies.
  #[error("no cached response for {key}")]
  CacheMiss { key: String },

  /// A registry write failed; the response is still usable.
  #[error("cache write rejected: {0}")]
  WriteRejected(#[source] StorageError),

  /// A registry read or lifecycle bookkeeping step failed.
  #[error(transparent)]
  Storage(#[from] StorageError),
}
