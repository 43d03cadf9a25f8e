use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{NamespaceKind, NamespaceName};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(flatten)]
  pub cache: CacheConfig,
  /// Registry database path (defaults to $XDG_DATA_HOME/offcache/registry.db)
  pub database: Option<PathBuf>,
  #[serde(default = "default_fetch_timeout")]
  pub fetch_timeout_secs: u64,
  #[serde(default)]
  pub log: LogConfig,
}

/// Everything fixed at deployment time for one version.
///
/// Handed to the lifecycle manager and both strategies at construction and
/// never mutated afterwards.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
  /// Prefix for namespace names
  #[serde(default = "default_app")]
  pub app: String,
  /// Deployed version identifier, bumped on every deploy
  pub version: String,
  /// Base URL that relative manifest locators resolve against
  pub origin: Url,
  /// Requests whose path starts with this are served network-first
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Served from the static namespace to offline navigations
  #[serde(default = "default_fallback_document")]
  pub fallback_document: String,
  /// Activate as soon as install succeeds instead of waiting for clients
  #[serde(default)]
  pub skip_waiting: bool,
  /// Assets the static namespace must hold after install, in order
  #[serde(default)]
  pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Default filter directive when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write daily rolling files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

fn default_app() -> String {
  "storefront".to_string()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_fallback_document() -> String {
  "/index.html".to_string()
}

fn default_fetch_timeout() -> u64 {
  30
}

fn default_log_level() -> String {
  "info".to_string()
}

impl CacheConfig {
  pub fn new(app: &str, version: &str, origin: Url) -> Self {
    Self {
      app: app.to_string(),
      version: version.to_string(),
      origin,
      api_prefix: default_api_prefix(),
      fallback_document: default_fallback_document(),
      skip_waiting: false,
      manifest: Vec::new(),
    }
  }

  pub fn with_manifest<I, S>(mut self, locators: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.manifest = locators.into_iter().map(Into::into).collect();
    self
  }

  /// The same deployment settings under a different version identifier.
  pub fn for_version(&self, version: &str) -> Self {
    Self {
      version: version.to_string(),
      ..self.clone()
    }
  }

  pub fn namespace(&self, kind: NamespaceKind) -> String {
    NamespaceName::new(&self.app, kind, &self.version).to_string()
  }

  pub fn static_namespace(&self) -> String {
    self.namespace(NamespaceKind::Static)
  }

  pub fn api_namespace(&self) -> String {
    self.namespace(NamespaceKind::Api)
  }

  /// Resolve a locator (origin-relative path or absolute URL).
  pub fn resolve(&self, locator: &str) -> Result<Url, url::ParseError> {
    self.origin.join(locator)
  }

  pub fn manifest_urls(&self) -> Result<Vec<Url>, url::ParseError> {
    self.manifest.iter().map(|l| self.resolve(l)).collect()
  }

  pub fn fallback_url(&self) -> Result<Url, url::ParseError> {
    self.resolve(&self.fallback_document)
  }

  pub fn validate(&self) -> Result<()> {
    for (field, value) in [("app", &self.app), ("version", &self.version)] {
      if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(eyre!(
          "Invalid {}: '{}' must be non-empty without whitespace",
          field,
          value
        ));
      }
    }

    if self.origin.cannot_be_a_base() {
      return Err(eyre!("Invalid origin: {} cannot be a base URL", self.origin));
    }

    if !self.api_prefix.starts_with('/') {
      return Err(eyre!(
        "Invalid api_prefix: '{}' must start with '/'",
        self.api_prefix
      ));
    }

    self
      .fallback_url()
      .map_err(|e| eyre!("Invalid fallback_document '{}': {}", self.fallback_document, e))?;

    for locator in &self.manifest {
      self
        .resolve(locator)
        .map_err(|e| eyre!("Invalid manifest locator '{}': {}", locator, e))?;
    }

    Ok(())
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to load config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.cache.validate()?;
    Ok(config)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}
