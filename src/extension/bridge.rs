//! Capability Bridge
//!
//! The only native capability reachable from plugin code. Script code calls
//! `fetch(url, options)` as a blocking function; the request runs on the host's
//! multi-threaded runtime while the plugin's worker thread waits for it.
//!
//! - Method, headers and body are forwarded verbatim
//! - Non-2xx responses are returned, never thrown
//! - Connection failures are thrown into the script as `NetworkBridgeError`
//! - A request exceeding the bridge timeout resolves as a synthetic 408 response

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::core::config::RuntimeConfig;

/// Status reported to the script when the bridge timeout elapses
pub const TIMEOUT_STATUS: u16 = 408;

/// Request as handed over by script code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Parse the URL, accepting only http and https
    pub fn parsed_url(&self) -> Result<Url, BridgeError> {
        let url = Url::parse(&self.url)
            .map_err(|e| BridgeError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(BridgeError::InvalidUrl(format!(
                "scheme '{}' is not allowed: {}",
                scheme, self.url
            ))),
        }
    }
}

/// Response handed back to script code, serialized as a JSON string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Set only on synthetic responses produced by the bridge itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            status: TIMEOUT_STATUS,
            headers: BTreeMap::new(),
            body: String::new(),
            error: Some(format!(
                "request timed out after {}ms",
                timeout.as_millis()
            )),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures thrown into script code
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("request cancelled")]
    Cancelled,
}

/// Async HTTP client seam behind the bridge
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BridgeError>;
}

/// Production fetcher backed by a shared `reqwest::Client`
pub struct ReqwestFetcher {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl ReqwestFetcher {
    pub fn new(config: &RuntimeConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| BridgeError::InvalidRequest(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BridgeError> {
        let url = request.parsed_url()?;
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| BridgeError::InvalidRequest(format!("bad method '{}'", request.method)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                BridgeError::InvalidRequest(e.to_string())
            } else {
                BridgeError::Connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if response
            .content_length()
            .is_some_and(|len| len as usize > self.max_response_bytes)
        {
            return Err(BridgeError::ResponseTooLarge {
                limit: self.max_response_bytes,
            });
        }

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(BridgeError::ResponseTooLarge {
                    limit: self.max_response_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            error: None,
        })
    }
}

/// Sync-over-async adapter shared by every execution context
#[derive(Clone)]
pub struct CapabilityBridge {
    fetcher: Arc<dyn HttpFetcher>,
    handle: Handle,
    timeout: Duration,
}

impl CapabilityBridge {
    /// `handle` must belong to a multi-threaded runtime that outlives the bridge
    pub fn new(fetcher: Arc<dyn HttpFetcher>, handle: Handle, timeout: Duration) -> Self {
        Self {
            fetcher,
            handle,
            timeout,
        }
    }

    /// Run `request` on the host runtime and block the calling thread until it
    /// completes, the bridge timeout elapses, or `cancel` fires.
    ///
    /// Must be called from a plugin worker thread, never from a host executor thread.
    pub fn fetch_blocking(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, BridgeError> {
        request.parsed_url()?;

        let fetcher = self.fetcher.clone();
        let timeout = self.timeout;
        let url = request.url.clone();
        debug!(url = %url, method = %request.method, "Bridge fetch");

        let mut task = self.handle.spawn(async move {
            match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Ok(FetchResponse::timed_out(timeout)),
            }
        });

        let result = futures::executor::block_on(async {
            tokio::select! {
                joined = &mut task => joined.unwrap_or_else(|e| {
                    Err(BridgeError::Connection(format!("fetch task failed: {}", e)))
                }),
                _ = cancel.cancelled() => {
                    task.abort();
                    Err(BridgeError::Cancelled)
                }
            }
        });

        match &result {
            Ok(response) if response.error.is_some() => {
                warn!(url = %url, "Bridge fetch timed out after {}ms", timeout.as_millis())
            }
            Ok(response) => debug!(url = %url, status = response.status, "Bridge fetch completed"),
            Err(e) => debug!(url = %url, error = %e, "Bridge fetch failed"),
        }
        result
    }
}
