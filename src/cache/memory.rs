//! In-memory registry, used in tests and for ephemeral runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::entry::{CacheEntry, RequestKey};
use super::traits::Registry;
use crate::error::StorageError;

#[derive(Default)]
struct State {
  namespaces: BTreeMap<String, BTreeMap<RequestKey, CacheEntry>>,
  active_version: Option<String>,
  waiting_version: Option<String>,
}

/// Registry kept entirely in process memory.
#[derive(Default)]
pub struct MemoryRegistry {
  state: Mutex<State>,
  /// Total entries allowed across all namespaces
  quota: Option<usize>,
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes once `limit` entries are stored in total.
  pub fn with_quota(limit: usize) -> Self {
    Self {
      state: Mutex::default(),
      quota: Some(limit),
    }
  }

  fn state(&self) -> Result<std::sync::MutexGuard<'_, State>, StorageError> {
    self
      .state
      .lock()
      .map_err(|e| StorageError::Poisoned(e.to_string()))
  }

  fn check_quota(&self, state: &State, incoming: usize) -> Result<(), StorageError> {
    if let Some(limit) = self.quota {
      let stored: usize = state.namespaces.values().map(BTreeMap::len).sum();
      if stored + incoming > limit {
        return Err(StorageError::QuotaExceeded { limit });
      }
    }
    Ok(())
  }
}

#[async_trait]
impl Registry for MemoryRegistry {
  async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
    Ok(self.state()?.namespaces.keys().cloned().collect())
  }

  async fn create_namespace(&self, namespace: &str) -> Result<(), StorageError> {
    self
      .state()?
      .namespaces
      .entry(namespace.to_string())
      .or_default();
    Ok(())
  }

  async fn lookup(
    &self,
    namespace: &str,
    key: &RequestKey,
  ) -> Result<Option<CacheEntry>, StorageError> {
    Ok(
      self
        .state()?
        .namespaces
        .get(namespace)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  async fn store(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError> {
    let mut state = self.state()?;
    let replacing = state
      .namespaces
      .get(namespace)
      .is_some_and(|entries| entries.contains_key(&entry.key));
    if !replacing {
      self.check_quota(&state, 1)?;
    }
    state
      .namespaces
      .entry(namespace.to_string())
      .or_default()
      .insert(entry.key.clone(), entry);
    Ok(())
  }

  async fn replace_namespace(
    &self,
    namespace: &str,
    entries: Vec<CacheEntry>,
  ) -> Result<(), StorageError> {
    let mut state = self.state()?;
    let existing = state.namespaces.get(namespace).map_or(0, BTreeMap::len);
    if entries.len() > existing {
      self.check_quota(&state, entries.len() - existing)?;
    }
    let contents = entries
      .into_iter()
      .map(|entry| (entry.key.clone(), entry))
      .collect();
    state.namespaces.insert(namespace.to_string(), contents);
    Ok(())
  }

  async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError> {
    Ok(self.state()?.namespaces.remove(namespace).is_some())
  }

  async fn entry_count(&self, namespace: &str) -> Result<usize, StorageError> {
    Ok(
      self
        .state()?
        .namespaces
        .get(namespace)
        .map_or(0, BTreeMap::len),
    )
  }

  async fn active_version(&self) -> Result<Option<String>, StorageError> {
    Ok(self.state()?.active_version.clone())
  }

  async fn set_active_version(&self, version: &str) -> Result<(), StorageError> {
    self.state()?.active_version = Some(version.to_string());
    Ok(())
  }

  async fn waiting_version(&self) -> Result<Option<String>, StorageError> {
    Ok(self.state()?.waiting_version.clone())
  }

  async fn set_waiting_version(&self, version: Option<&str>) -> Result<(), StorageError> {
    self.state()?.waiting_version = version.map(str::to_string);
    Ok(())
  }
}
