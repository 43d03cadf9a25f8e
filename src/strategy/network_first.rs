//! Network-first strategy for API requests.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{lookup, persist};
use crate::cache::{CacheEntry, CacheResult, Registry, Request, Response};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::net::Fetcher;

/// Always tries the network; the API namespace is only a degraded-mode fallback.
pub struct NetworkFirst {
  registry: Arc<dyn Registry>,
  fetcher: Arc<dyn Fetcher>,
  namespace: String,
}

impl NetworkFirst {
  pub fn new(
    config: Arc<CacheConfig>,
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      registry,
      fetcher,
      namespace: config.api_namespace(),
    }
  }

  /// 1. Fetch from network
  /// 2. On any `2xx`, return the live response (only `200 OK` is snapshotted)
  /// 3. On an error status or transport failure, return the last snapshot if
  ///    there is one (offline mode)
  ///
  /// An error status with no snapshot is handed back as-is; a transport
  /// failure with no snapshot surfaces as `CacheMiss`.
  pub async fn resolve(&self, request: &Request) -> Result<CacheResult<Response>, CacheError> {
    match self.fetcher.fetch(request).await {
      Ok(response) if (200..300).contains(&response.status) => {
        if let Some(entry) = CacheEntry::snapshot(request, &response) {
          persist(&self.registry, &self.namespace, entry).await;
        }
        Ok(CacheResult::from_network(response))
      }
      Ok(response) => {
        if let Some(entry) = lookup(self.registry.as_ref(), &self.namespace, request).await {
          warn!(key = %entry.key, status = response.status, "serving stale snapshot");
          return Ok(CacheResult::offline(entry.response, entry.cached_at));
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "network unavailable");
        if let Some(entry) = lookup(self.registry.as_ref(), &self.namespace, request).await {
          debug!(key = %entry.key, cached_at = %entry.cached_at, "serving stale snapshot");
          return Ok(CacheResult::offline(entry.response, entry.cached_at));
        }
        Err(CacheError::CacheMiss {
          key: request.key().to_string(),
        })
      }
    }
  }
}
