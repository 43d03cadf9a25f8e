//! Routes every outbound request to one of the two strategies.

use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheResult, Registry, Request, Response};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::net::Fetcher;
use crate::strategy::{CacheFirst, NetworkFirst};

/// Which strategy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Pre-declared application assets, served cache-first
  Static,
  /// API endpoints, served network-first
  Dynamic,
}

/// Decide the route for `request` by matching its path against `api_prefix`.
pub fn classify(request: &Request, api_prefix: &str) -> Route {
  if request.url.path().starts_with(api_prefix) {
    Route::Dynamic
  } else {
    Route::Static
  }
}

/// The request handler owned by one version.
pub struct Interceptor {
  config: Arc<CacheConfig>,
  static_assets: CacheFirst,
  api: NetworkFirst,
}

impl Interceptor {
  pub fn new(
    config: Arc<CacheConfig>,
    registry: Arc<dyn Registry>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      static_assets: CacheFirst::new(config.clone(), registry.clone(), fetcher.clone()),
      api: NetworkFirst::new(config.clone(), registry, fetcher),
      config,
    }
  }

  pub fn route(&self, request: &Request) -> Route {
    classify(request, &self.config.api_prefix)
  }

  pub async fn handle(&self, request: &Request) -> Result<CacheResult<Response>, CacheError> {
    let route = self.route(request);
    debug!(method = %request.method, url = %request.url, ?route, "intercepted");
    match route {
      Route::Static => self.static_assets.resolve(request).await,
      Route::Dynamic => self.api.resolve(request).await,
    }
  }
}
