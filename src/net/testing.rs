//! Scripted fetcher double for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::Fetcher;
use crate::cache::{Request, Response};
use crate::error::FetchError;

enum Script {
  Respond(Response),
  Fail,
}

/// Answers from a fixed table keyed by URL and records every call.
///
/// Unknown URLs answer `404`.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Script>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Script::Respond(response));
  }

  /// Make `url` fail at the transport level.
  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Script::Fail);
  }

  /// Make every fetch fail until switched back on.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| *u == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.as_str();
    self.calls.lock().unwrap().push(url.to_string());

    if self.offline.load(Ordering::SeqCst) {
      return Err(FetchError::new(url, "offline"));
    }

    match self.routes.lock().unwrap().get(url) {
      Some(Script::Respond(resp)) => Ok(resp.clone()),
      Some(Script::Fail) => Err(FetchError::new(url, "connection refused")),
      None => Ok(Response::new(404, "not found")),
    }
  }
}
