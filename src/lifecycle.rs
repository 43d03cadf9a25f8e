//! Version lifecycle: install, wait, activate, garbage-collect.
//!
//! Each deployed version moves through
//! `Installing → Waiting → Activating → Active → Superseded`, or ends in
//! `Discarded` if its install aborts. Lifecycle steps are serialized; request
//! handling only ever sees a version after its activation has finished.

use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheResult, Registry, Request, Response};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::interceptor::Interceptor;
use crate::net::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Waiting,
  Activating,
  Active,
  Superseded,
  /// Install aborted; this version never serves a request
  Discarded,
}

/// One deployed version and the interceptor it owns.
pub struct Version {
  config: Arc<CacheConfig>,
  interceptor: Interceptor,
  state: Mutex<LifecycleState>,
}

impl Version {
  fn new(config: CacheConfig, registry: Arc<dyn Registry>, fetcher: Arc<dyn Fetcher>) -> Self {
    let config = Arc::new(config);
    Self {
      interceptor: Interceptor::new(config.clone(), registry, fetcher),
      config,
      state: Mutex::new(LifecycleState::Installing),
    }
  }

  pub fn id(&self) -> &str {
    &self.config.version
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, next: LifecycleState) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    info!(version = %self.config.version, from = ?*state, to = ?next, "lifecycle transition");
    *state = next;
  }
}

/// Drives versions through their lifecycle and owns the active interceptor.
pub struct Lifecycle {
  registry: Arc<dyn Registry>,
  fetcher: Arc<dyn Fetcher>,
  active: RwLock<Option<Arc<Version>>>,
  waiting: tokio::sync::Mutex<Option<Arc<Version>>>,
  /// Held for the duration of every install/activate step
  steps: tokio::sync::Mutex<()>,
  clients: AtomicUsize,
  force_requested: AtomicBool,
}

impl Lifecycle {
  pub fn new(registry: Arc<dyn Registry>, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      registry,
      fetcher,
      active: RwLock::new(None),
      waiting: tokio::sync::Mutex::new(None),
      steps: tokio::sync::Mutex::new(()),
      clients: AtomicUsize::new(0),
      force_requested: AtomicBool::new(false),
    }
  }

  /// Bring the worker up for `config`.
  ///
  /// Restores whatever the registry recorded, then makes `config` current: an
  /// already-active version is left alone, a restored candidate of the same
  /// version activates if nothing holds it back, and any other version is
  /// installed.
  pub async fn start(&self, config: CacheConfig) -> Result<LifecycleState, CacheError> {
    self.restore(&config).await?;

    if let Some(active) = self.active().await {
      if active.id() == config.version {
        return Ok(LifecycleState::Active);
      }
    }

    let step = self.steps.lock().await;
    let candidate = self.waiting.lock().await.take();
    if let Some(version) = candidate {
      if version.id() == config.version {
        if self.should_activate(&version).await {
          self.activate_or_requeue(version).await?;
          return Ok(LifecycleState::Active);
        }
        *self.waiting.lock().await = Some(version);
        return Ok(LifecycleState::Waiting);
      }
      *self.waiting.lock().await = Some(version);
    }
    drop(step);

    self.install(config).await
  }

  /// Load the active and waiting versions recorded in the registry.
  ///
  /// Nothing is fetched: a recorded version is only restored if its static
  /// namespace is still present. Settings other than the version id come from
  /// `config`.
  pub async fn restore(&self, config: &CacheConfig) -> Result<(), CacheError> {
    let _step = self.steps.lock().await;
    let namespaces = self.registry.namespaces().await?;
    let present = |version: &CacheConfig| namespaces.contains(&version.static_namespace());

    let recorded = self.registry.active_version().await?;
    if let Some(id) = &recorded {
      let resumed = config.for_version(id);
      if present(&resumed) {
        let version = self.restored(resumed, LifecycleState::Active);
        info!(version = %version.id(), "resumed active version");
        *self.active.write().await = Some(version);
      } else {
        warn!(version = %id, "recorded active version has no static namespace");
      }
    }

    if let Some(id) = self.registry.waiting_version().await? {
      let candidate = config.for_version(&id);
      if recorded.as_deref() != Some(id.as_str()) && present(&candidate) {
        let version = self.restored(candidate, LifecycleState::Waiting);
        info!(version = %version.id(), "restored waiting version");
        *self.waiting.lock().await = Some(version);
      } else {
        debug!(version = %id, "dropping stale waiting record");
        self.registry.set_waiting_version(None).await?;
      }
    }
    Ok(())
  }

  fn restored(&self, config: CacheConfig, state: LifecycleState) -> Arc<Version> {
    let version = Version::new(config, self.registry.clone(), self.fetcher.clone());
    *version.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    Arc::new(version)
  }

  /// Install `config` as a candidate version.
  ///
  /// Returns `Active` if the candidate went straight on to activation,
  /// `Waiting` if a previous version still holds clients. On
  /// `InstallAborted` the registry is unchanged and the previous version keeps
  /// serving.
  pub async fn install(&self, config: CacheConfig) -> Result<LifecycleState, CacheError> {
    let _step = self.steps.lock().await;

    let version = Arc::new(Version::new(
      config,
      self.registry.clone(),
      self.fetcher.clone(),
    ));
    info!(
      version = %version.id(),
      assets = version.config.manifest.len(),
      "installing"
    );

    if let Err(err) = self.populate(&version).await {
      warn!(version = %version.id(), error = %err, "install aborted");
      version.set_state(LifecycleState::Discarded);
      return Err(err);
    }

    version.set_state(LifecycleState::Waiting);

    let replaced = self.waiting.lock().await.take();
    if let Some(replaced) = replaced {
      replaced.set_state(LifecycleState::Discarded);
    }

    if self.should_activate(&version).await {
      self.activate_or_requeue(version).await?;
      Ok(LifecycleState::Active)
    } else {
      info!(
        version = %version.id(),
        clients = self.clients.load(Ordering::SeqCst),
        "waiting for clients of the previous version to close"
      );
      if let Err(e) = self.registry.set_waiting_version(Some(version.id())).await {
        warn!(version = %version.id(), error = %e, "failed to record waiting version");
      }
      *self.waiting.lock().await = Some(version);
      Ok(LifecycleState::Waiting)
    }
  }

  /// Fetch every manifest asset, then write the static namespace in one step.
  async fn populate(&self, version: &Version) -> Result<(), CacheError> {
    let config = &version.config;
    let aborted = |reason: String| CacheError::InstallAborted {
      version: config.version.clone(),
      reason,
    };

    let urls = config.manifest_urls().map_err(|e| aborted(e.to_string()))?;
    let fetches = urls.into_iter().map(|url| {
      let fetcher = &self.fetcher;
      async move {
        let request = Request::get(url);
        let response = fetcher.fetch(&request).await.map_err(|e| e.to_string())?;
        CacheEntry::snapshot(&request, &response)
          .ok_or_else(|| format!("{} answered {}", request.url, response.status))
      }
    });
    let entries = try_join_all(fetches).await.map_err(aborted)?;
    let count = entries.len();

    self
      .registry
      .replace_namespace(&config.static_namespace(), entries)
      .await
      .map_err(|e| aborted(e.to_string()))?;

    info!(version = %config.version, count, "populated static namespace");
    Ok(())
  }

  async fn should_activate(&self, version: &Version) -> bool {
    if self.force_requested.load(Ordering::SeqCst) || version.config.skip_waiting {
      return true;
    }
    self.active.read().await.is_none() || self.clients.load(Ordering::SeqCst) == 0
  }

  /// Activate `version`; if that fails, put it back in the waiting slot.
  async fn activate_or_requeue(&self, version: Arc<Version>) -> Result<(), CacheError> {
    if let Err(err) = self.activate(&version).await {
      warn!(version = %version.id(), error = %err, "activation failed");
      version.set_state(LifecycleState::Waiting);
      *self.waiting.lock().await = Some(version);
      return Err(err);
    }
    Ok(())
  }

  async fn activate(&self, version: &Arc<Version>) -> Result<(), CacheError> {
    version.set_state(LifecycleState::Activating);
    let config = &version.config;
    let keep = [config.static_namespace(), config.api_namespace()];

    for name in self.registry.namespaces().await? {
      if !keep.contains(&name) && self.registry.delete_namespace(&name).await? {
        info!(namespace = %name, "deleted stale namespace");
      }
    }

    self.registry.create_namespace(&config.api_namespace()).await?;
    self.registry.set_active_version(&config.version).await?;
    self.registry.set_waiting_version(None).await?;

    let previous = self.active.write().await.replace(version.clone());
    version.set_state(LifecycleState::Active);
    if let Some(previous) = previous {
      if previous.id() != version.id() {
        previous.set_state(LifecycleState::Superseded);
      }
    }
    self.force_requested.store(false, Ordering::SeqCst);
    Ok(())
  }

  /// Activate the waiting candidate now, even while clients remain open.
  ///
  /// If a candidate is still installing, it activates as soon as its install
  /// succeeds. With no candidate this is a no-op.
  pub async fn force_activate(&self) -> Result<(), CacheError> {
    self.force_requested.store(true, Ordering::SeqCst);
    let _step = self.steps.lock().await;

    let candidate = self.waiting.lock().await.take();
    let result = match candidate {
      Some(version) => {
        info!(version = %version.id(), "forcing activation");
        self.activate_or_requeue(version).await
      }
      None => {
        debug!("force-activate with no waiting version");
        Ok(())
      }
    };
    self.force_requested.store(false, Ordering::SeqCst);
    result
  }

  /// Delete every namespace regardless of version.
  pub async fn clear_all(&self) -> Result<usize, CacheError> {
    let mut removed = 0;
    for name in self.registry.namespaces().await? {
      if self.registry.delete_namespace(&name).await? {
        removed += 1;
      }
    }
    info!(removed, "cleared all namespaces");
    Ok(removed)
  }

  /// A client (tab, window) attached to the active version.
  pub fn client_opened(&self) -> usize {
    self.clients.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// A client detached. When the last one goes, a waiting version activates.
  pub async fn client_closed(&self) -> Result<usize, CacheError> {
    let remaining = self
      .clients
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .map_or(0, |previous| previous - 1);

    if remaining == 0 {
      let _step = self.steps.lock().await;
      let candidate = self.waiting.lock().await.take();
      if let Some(version) = candidate {
        info!(version = %version.id(), "last client closed");
        self.activate_or_requeue(version).await?;
      }
    }
    Ok(remaining)
  }

  /// Resolve a request through the active version.
  ///
  /// With no active version the request passes straight through to the
  /// network and nothing is cached.
  pub async fn resolve(&self, request: &Request) -> Result<CacheResult<Response>, CacheError> {
    let active = self.active.read().await.clone();
    match active {
      Some(version) => version.interceptor.handle(request).await,
      None => {
        debug!(url = %request.url, "no active version, passing through");
        Ok(CacheResult::from_network(self.fetcher.fetch(request).await?))
      }
    }
  }

  /// Like [`resolve`](Self::resolve), but hides where the response came from.
  pub async fn handle(&self, request: &Request) -> Result<Response, CacheError> {
    Ok(self.resolve(request).await?.data)
  }

  pub async fn active(&self) -> Option<Arc<Version>> {
    self.active.read().await.clone()
  }

  pub async fn waiting(&self) -> Option<Arc<Version>> {
    self.waiting.lock().await.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryRegistry};
  use crate::error::FetchError;
  use crate::net::testing::ScriptedFetcher;
  use async_trait::async_trait;
  use tokio::sync::Notify;
  use url::Url;

  const ORIGIN: &str = "http://shop.test";

  struct Fixture {
    registry: Arc<MemoryRegistry>,
    fetcher: Arc<ScriptedFetcher>,
    lifecycle: Lifecycle,
  }

  fn fixture() -> Fixture {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let lifecycle = Lifecycle::new(registry.clone(), fetcher.clone());
    Fixture {
      registry,
      fetcher,
      lifecycle,
    }
  }

  fn config(version: &str, manifest: &[&str]) -> CacheConfig {
    CacheConfig::new("shop", version, Url::parse(ORIGIN).unwrap())
      .with_manifest(manifest.iter().copied())
  }

  fn url(path: &str) -> String {
    format!("{}{}", ORIGIN, path)
  }

  fn request(path: &str) -> Request {
    Request::get(Url::parse(&url(path)).unwrap())
  }

  impl Fixture {
    fn serve(&self, path: &str, body: &str) {
      self.fetcher.respond(&url(path), Response::new(200, body));
    }

    async fn namespaces(&self) -> Vec<String> {
      self.registry.namespaces().await.unwrap()
    }
  }

  #[tokio::test]
  async fn test_installed_asset_served_without_network() {
    let f = fixture();
    f.serve("/index.html", "<app v1>");

    let state = f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    assert_eq!(state, LifecycleState::Active);

    let calls = f.fetcher.total_calls();
    let result = f.lifecycle.resolve(&request("/index.html")).await.unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"<app v1>");
    assert_eq!(f.fetcher.total_calls(), calls);
  }

  #[tokio::test]
  async fn test_every_manifest_locator_is_a_hit() {
    let f = fixture();
    let manifest = ["/", "/index.html", "/app-bundle", "/styles", "/icon-small", "/icon-large"];
    for path in manifest {
      f.serve(path, path);
    }
    f.lifecycle.install(config("v1", &manifest)).await.unwrap();
    f.fetcher.set_offline(true);
    let calls = f.fetcher.total_calls();

    for path in manifest {
      let response = f.lifecycle.handle(&request(path)).await.unwrap();
      assert_eq!(response.body, path.as_bytes());
    }
    assert_eq!(f.fetcher.total_calls(), calls);
  }

  #[tokio::test]
  async fn test_activation_collects_old_versions() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.serve("/api/products", "[]");

    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.handle(&request("/api/products")).await.unwrap();
    // Left behind by some unrelated deploy
    f.registry.create_namespace("legacy-cache").await.unwrap();
    assert_eq!(
      f.namespaces().await,
      vec!["legacy-cache", "shop-api-v1", "shop-static-v1"]
    );

    f.lifecycle.install(config("v2", &["/index.html"])).await.unwrap();

    assert_eq!(f.namespaces().await, vec!["shop-api-v2", "shop-static-v2"]);
    assert_eq!(f.registry.active_version().await.unwrap().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_failed_install_leaves_previous_version_intact() {
    let f = fixture();
    f.serve("/index.html", "v1 page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    let before = f.namespaces().await;

    f.fetcher.fail(&url("/styles"));
    let err = f
      .lifecycle
      .install(config("v2", &["/index.html", "/styles"]))
      .await
      .unwrap_err();

    assert!(matches!(err, CacheError::InstallAborted { ref version, .. } if version == "v2"));
    assert_eq!(f.namespaces().await, before);
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v1");
    assert!(f.lifecycle.waiting().await.is_none());

    f.fetcher.set_offline(true);
    let page = f.lifecycle.handle(&request("/index.html")).await.unwrap();
    assert_eq!(page.body, b"v1 page");
  }

  #[tokio::test]
  async fn test_error_status_in_manifest_aborts_install() {
    let f = fixture();
    f.serve("/index.html", "page");

    let err = f
      .lifecycle
      .install(config("v1", &["/index.html", "/icon-missing"]))
      .await
      .unwrap_err();

    assert!(matches!(err, CacheError::InstallAborted { .. }));
    assert!(f.namespaces().await.is_empty());
    assert!(f.lifecycle.active().await.is_none());
  }

  #[tokio::test]
  async fn test_waits_while_clients_are_open() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.client_opened();
    f.lifecycle.client_opened();

    let state = f.lifecycle.install(config("v2", &["/index.html"])).await.unwrap();
    assert_eq!(state, LifecycleState::Waiting);
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v1");
    // Installed but not yet collected
    assert!(f.namespaces().await.contains(&"shop-static-v1".to_string()));
    assert!(f.namespaces().await.contains(&"shop-static-v2".to_string()));

    assert_eq!(f.lifecycle.client_closed().await.unwrap(), 1);
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v1");

    assert_eq!(f.lifecycle.client_closed().await.unwrap(), 0);
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v2");
    assert_eq!(f.namespaces().await, vec!["shop-api-v2", "shop-static-v2"]);
  }

  #[tokio::test]
  async fn test_force_activate_skips_waiting() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    let v1 = f.lifecycle.active().await.unwrap();
    f.lifecycle.client_opened();

    f.lifecycle.install(config("v2", &["/index.html"])).await.unwrap();
    let v2 = f.lifecycle.waiting().await.unwrap();
    assert_eq!(v2.state(), LifecycleState::Waiting);

    f.lifecycle.force_activate().await.unwrap();

    assert_eq!(v2.state(), LifecycleState::Active);
    assert_eq!(v1.state(), LifecycleState::Superseded);
    assert!(f.lifecycle.waiting().await.is_none());
    assert_eq!(f.namespaces().await, vec!["shop-api-v2", "shop-static-v2"]);

    // Idempotent
    f.lifecycle.force_activate().await.unwrap();
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v2");
  }

  #[tokio::test]
  async fn test_skip_waiting_config_activates_immediately() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.client_opened();

    let mut v2 = config("v2", &["/index.html"]);
    v2.skip_waiting = true;
    let state = f.lifecycle.install(v2).await.unwrap();

    assert_eq!(state, LifecycleState::Active);
    assert_eq!(f.lifecycle.active().await.unwrap().id(), "v2");
  }

  #[tokio::test]
  async fn test_clear_all_empties_registry() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.serve("/api/products", "[1]");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.handle(&request("/api/products")).await.unwrap();

    let removed = f.lifecycle.clear_all().await.unwrap();

    assert_eq!(removed, 2);
    assert!(f.namespaces().await.is_empty());
    let key = request("/index.html").key();
    assert!(f.registry.lookup("shop-static-v1", &key).await.unwrap().is_none());

    // Falls through to the network and repopulates
    let result = f.lifecycle.resolve(&request("/index.html")).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert!(f.registry.lookup("shop-static-v1", &key).await.unwrap().is_some());

    // And the API snapshot is gone too
    f.fetcher.set_offline(true);
    let err = f.lifecycle.handle(&request("/api/products")).await.unwrap_err();
    assert!(matches!(err, CacheError::CacheMiss { .. }));
  }

  #[tokio::test]
  async fn test_passthrough_without_active_version() {
    let f = fixture();
    f.serve("/index.html", "page");

    let result = f.lifecycle.resolve(&request("/index.html")).await.unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert!(f.namespaces().await.is_empty());
  }

  #[tokio::test]
  async fn test_start_resumes_recorded_version() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    let calls = f.fetcher.total_calls();

    // Same registry, fresh process
    let restarted = Lifecycle::new(f.registry.clone(), f.fetcher.clone());
    let state = restarted.start(config("v1", &["/index.html"])).await.unwrap();

    assert_eq!(state, LifecycleState::Active);
    assert_eq!(f.fetcher.total_calls(), calls);
    assert_eq!(restarted.active().await.unwrap().id(), "v1");
  }

  #[tokio::test]
  async fn test_start_keeps_old_version_when_new_install_fails() {
    let f = fixture();
    f.serve("/index.html", "v1 page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();

    let restarted = Lifecycle::new(f.registry.clone(), f.fetcher.clone());
    f.fetcher.fail(&url("/new-bundle"));
    let result = restarted
      .start(config("v2", &["/index.html", "/new-bundle"]))
      .await;

    assert!(result.is_err());
    assert_eq!(restarted.active().await.unwrap().id(), "v1");
    f.fetcher.set_offline(true);
    let page = restarted.handle(&request("/index.html")).await.unwrap();
    assert_eq!(page.body, b"v1 page");
  }

  #[tokio::test]
  async fn test_force_from_fresh_process_activates_recorded_candidate() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.client_opened();
    let state = f.lifecycle.install(config("v2", &["/index.html"])).await.unwrap();
    assert_eq!(state, LifecycleState::Waiting);
    assert_eq!(f.registry.waiting_version().await.unwrap().as_deref(), Some("v2"));
    let calls = f.fetcher.total_calls();

    // Same registry, another process delivering the control message
    let other = Lifecycle::new(f.registry.clone(), f.fetcher.clone());
    other.restore(&config("v2", &["/index.html"])).await.unwrap();
    assert_eq!(other.active().await.unwrap().id(), "v1");
    assert_eq!(other.waiting().await.unwrap().id(), "v2");

    other.force_activate().await.unwrap();

    assert_eq!(other.active().await.unwrap().id(), "v2");
    assert_eq!(f.namespaces().await, vec!["shop-api-v2", "shop-static-v2"]);
    assert_eq!(f.registry.active_version().await.unwrap().as_deref(), Some("v2"));
    assert!(f.registry.waiting_version().await.unwrap().is_none());
    assert_eq!(f.fetcher.total_calls(), calls);
  }

  #[tokio::test]
  async fn test_start_activates_restored_candidate_without_clients() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.lifecycle.client_opened();
    f.lifecycle.install(config("v2", &["/index.html"])).await.unwrap();
    let calls = f.fetcher.total_calls();

    let restarted = Lifecycle::new(f.registry.clone(), f.fetcher.clone());
    let state = restarted.start(config("v2", &["/index.html"])).await.unwrap();

    assert_eq!(state, LifecycleState::Active);
    assert_eq!(restarted.active().await.unwrap().id(), "v2");
    assert_eq!(f.fetcher.total_calls(), calls);
  }

  #[tokio::test]
  async fn test_restore_drops_candidate_without_namespace() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    f.registry.set_waiting_version(Some("v9")).await.unwrap();

    let restarted = Lifecycle::new(f.registry.clone(), f.fetcher.clone());
    restarted.restore(&config("v1", &["/index.html"])).await.unwrap();

    assert!(restarted.waiting().await.is_none());
    assert!(f.registry.waiting_version().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_reinstall_same_version_is_not_superseded() {
    let f = fixture();
    f.serve("/index.html", "page");
    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    let first = f.lifecycle.active().await.unwrap();

    f.lifecycle.install(config("v1", &["/index.html"])).await.unwrap();

    let second = f.lifecycle.active().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.state(), LifecycleState::Active);
    assert_eq!(second.state(), LifecycleState::Active);
    assert_eq!(f.namespaces().await, vec!["shop-api-v1", "shop-static-v1"]);
  }

  /// Holds every fetch until released, once armed.
  #[derive(Default)]
  struct GatedFetcher {
    inner: ScriptedFetcher,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
  }

  #[async_trait]
  impl Fetcher for GatedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
      if self.armed.load(Ordering::SeqCst) {
        self.entered.notify_one();
        self.release.notified().await;
      }
      self.inner.fetch(request).await
    }
  }

  struct Gated {
    registry: Arc<MemoryRegistry>,
    fetcher: Arc<GatedFetcher>,
    lifecycle: Arc<Lifecycle>,
  }

  /// v1 active with one client attached.
  async fn gated() -> Gated {
    let registry = Arc::new(MemoryRegistry::new());
    let fetcher = Arc::new(GatedFetcher::default());
    fetcher
      .inner
      .respond(&url("/index.html"), Response::new(200, "page"));
    let lifecycle = Arc::new(Lifecycle::new(registry.clone(), fetcher.clone()));
    lifecycle.install(config("v1", &["/index.html"])).await.unwrap();
    lifecycle.client_opened();
    Gated {
      registry,
      fetcher,
      lifecycle,
    }
  }

  impl Gated {
    /// Install `next` and deliver force-activate while its fetch is in flight.
    async fn install_with_force(&self, next: CacheConfig) -> Result<LifecycleState, CacheError> {
      self.fetcher.armed.store(true, Ordering::SeqCst);
      let installing = tokio::spawn({
        let lifecycle = self.lifecycle.clone();
        async move { lifecycle.install(next).await }
      });
      self.fetcher.entered.notified().await;

      let forcing = tokio::spawn({
        let lifecycle = self.lifecycle.clone();
        async move { lifecycle.force_activate().await }
      });
      while !self.lifecycle.force_requested.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
      }
      self.fetcher.release.notify_one();

      let result = installing.await.unwrap();
      forcing.await.unwrap().unwrap();
      self.fetcher.armed.store(false, Ordering::SeqCst);
      result
    }
  }

  #[tokio::test]
  async fn test_force_during_install_activates_once_installed() {
    let g = gated().await;
    let v1 = g.lifecycle.active().await.unwrap();

    let state = g
      .install_with_force(config("v2", &["/index.html"]))
      .await
      .unwrap();

    assert_eq!(state, LifecycleState::Active);
    assert_eq!(g.lifecycle.active().await.unwrap().id(), "v2");
    assert_eq!(v1.state(), LifecycleState::Superseded);
    assert_eq!(
      g.registry.namespaces().await.unwrap(),
      vec!["shop-api-v2", "shop-static-v2"]
    );
    assert!(!g.lifecycle.force_requested.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_force_during_aborted_install_is_not_carried_over() {
    let g = gated().await;
    g.fetcher.inner.fail(&url("/new-bundle"));

    let err = g
      .install_with_force(config("v2", &["/new-bundle"]))
      .await
      .unwrap_err();
    assert!(matches!(err, CacheError::InstallAborted { .. }));
    assert!(!g.lifecycle.force_requested.load(Ordering::SeqCst));
    assert_eq!(g.lifecycle.active().await.unwrap().id(), "v1");

    let state = g
      .lifecycle
      .install(config("v3", &["/index.html"]))
      .await
      .unwrap();
    assert_eq!(state, LifecycleState::Waiting);
    assert_eq!(g.lifecycle.active().await.unwrap().id(), "v1");
  }
}
