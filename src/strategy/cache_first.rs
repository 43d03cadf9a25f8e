//! Cache-first strategy for static assets.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{lookup, persist};
use crate::cache::{CacheEntry, CacheResult, Destination, Registry, Request, Response};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::net::Fetcher;

/// Serves assets from the static namespace, going to the network only on a miss.
///
/// A hit is authoritative. Static assets only change with a redeploy, and a
/// redeploy gets a fresh namespace.
pub struct CacheFirst {
  config: Arc<CacheConfig>,
  registry: Arc<dyn Registry>,
  fetcher: Arc<dyn Fetcher>,
  namespace: String,
}

impl CacheFirst {
  pub fn new(
    config: Arc<CacheConfig>,
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    let namespace = config.static_namespace();
    Self {
      config,
      registry,
      fetcher,
      namespace,
    }
  }

  /// 1. Check the static namespace - on hit, return without touching the network
  /// 2. On miss, fetch and snapshot a `200 OK`
  /// 3. On network failure, answer navigations with the fallback document
  pub async fn resolve(&self, request: &Request) -> Result<CacheResult<Response>, CacheError> {
    if let Some(entry) = lookup(self.registry.as_ref(), &self.namespace, request).await {
      debug!(key = %entry.key, "static hit");
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if let Some(entry) = CacheEntry::snapshot(request, &response) {
          persist(&self.registry, &self.namespace, entry).await;
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "static fetch failed");

        if request.destination == Destination::Document {
          if let Some(entry) = self.fallback_document().await {
            debug!(key = %entry.key, "serving fallback document");
            return Ok(CacheResult::fallback(entry.response, entry.cached_at));
          }
        }

        Err(CacheError::NetworkUnavailable(err))
      }
    }
  }

  async fn fallback_document(&self) -> Option<CacheEntry> {
    let url = self.config.fallback_url().ok()?;
    lookup(self.registry.as_ref(), &self.namespace, &Request::get(url)).await
  }
}
