//! The network seam: everything the cache layer fetches goes through `Fetcher`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use crate::cache::{Request, Response};
use crate::error::FetchError;

#[cfg(test)]
pub mod testing;

/// Performs live network fetches.
///
/// A response with any status code is `Ok`; only transport-level failures
/// (unreachable host, timeout, broken body) are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.as_str();

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::new(url, e.to_string()))?;

    let status = response.status().as_u16();
    let mut headers = Vec::with_capacity(response.headers().len());
    for (name, value) in response.headers() {
      match value.to_str() {
        Ok(v) => headers.push((name.as_str().to_string(), v.to_string())),
        Err(_) => debug!(url, header = %name, "skipping non-UTF-8 header value"),
      }
    }
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::new(url, format!("failed to read body: {}", e)))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
