//! Remote Fetch - Externally Hosted Template Content
//!
//! Fetching blocks the caller for at most the configured timeout. A timeout
//! is an ordinary recoverable error and is never retried here.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetching {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Fetching {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Fetching {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}

/// Blocking byte fetcher. Implementations must give up after `timeout`.
pub trait RemoteFetcher: Send + Sync {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Only `http` and `https` are fetched.
pub fn check_scheme(url: &Url) -> Result<(), FetchError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

#[derive(Debug, Clone)]
enum Canned {
    Body(Vec<u8>),
    Stall,
}

/// In-memory fetcher serving canned responses.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    responses: RwLock<HashMap<String, Canned>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses.write().insert(url.to_string(), Canned::Body(body.into()));
    }

    /// Make `url` never answer within any timeout.
    pub fn stall(&self, url: &str) {
        self.responses.write().insert(url.to_string(), Canned::Stall);
    }
}

impl RemoteFetcher for MemoryFetcher {
    fn fetch(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        check_scheme(url)?;
        match self.responses.read().get(url.as_str()) {
            Some(Canned::Body(body)) => Ok(body.clone()),
            Some(Canned::Stall) => Err(FetchError::Timeout { url: url.to_string(), timeout }),
            None => Err(FetchError::Status { url: url.to_string(), status: 404 }),
        }
    }
}

/// Fetcher for deployments without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

impl RemoteFetcher for OfflineFetcher {
    fn fetch(&self, url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        check_scheme(url)?;
        Err(FetchError::Transport {
            url: url.to_string(),
            message: "network access is disabled".to_string(),
        })
    }
}
