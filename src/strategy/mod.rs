//! Request strategies: cache-first for static assets, network-first for the API.

mod cache_first;
mod network_first;

pub use cache_first::CacheFirst;
pub use network_first::NetworkFirst;

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, Registry, Request};
use crate::error::CacheError;

/// Read `request` from `namespace`.
///
/// Non-cacheable requests never hit. A failed read is logged and treated as a
/// miss so the resolution can still go to the network.
async fn lookup(registry: &dyn Registry, namespace: &str, request: &Request) -> Option<CacheEntry> {
  if !request.is_cacheable() {
    return None;
  }
  let key = request.key();
  match registry.lookup(namespace, &key).await {
    Ok(entry) => entry,
    Err(e) => {
      warn!(%key, namespace, error = %e, "registry read failed, treating as miss");
      None
    }
  }
}

/// Write a snapshot, absorbing any rejection.
///
/// The write runs as its own task: if the caller drops the resolution while
/// waiting, the write still completes.
async fn persist(registry: &Arc<dyn Registry>, namespace: &str, entry: CacheEntry) {
  let key = entry.key.to_string();
  let registry = Arc::clone(registry);
  let target = namespace.to_string();
  let write = tokio::spawn(async move { registry.store(&target, entry).await });

  match write.await {
    Ok(Ok(())) => debug!(%key, namespace, "cached response"),
    Ok(Err(e)) => {
      let err = CacheError::WriteRejected(e);
      warn!(%key, namespace, error = %err, "caching skipped");
    }
    Err(e) => warn!(%key, namespace, error = %e, "cache write task failed"),
  }
}
