//! HTTP transport implementation.
//!
//! Talks to the tenant API over `reqwest`:
//!
//! - `GET {base}/bootstrap` warms up the tenant session
//! - `GET {base}/sync/stream?cursor=...` returns the NDJSON change feed
//!
//! Both carry a bearer token. The feed body is either handed to the engine
//! as a chunk stream or read in full first, depending on
//! [`SyncConfig::streaming`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{FeedResponse, SyncTransport};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

const FEED_ACCEPT: &str = "application/x-ndjson, application/json";
const JSON: &str = "application/json";

/// HTTP-based sync transport.
#[derive(Debug)]
pub struct HttpTransport {
    /// Base URL of the tenant API (e.g. `https://acme.example.com/api`).
    base_url: String,
    client: Client,
    token: RwLock<String>,
    invalid_cursor_status: u16,
    streaming: bool,
    /// Whether the last request reached the server.
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Creates a transport for `config` with a fresh client.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the TLS backend cannot be initialized.
    pub fn new(config: &SyncConfig, token: impl Into<String>) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self::with_client(client, config, token))
    }

    /// Creates a transport around an existing client.
    pub fn with_client(client: Client, config: &SyncConfig, token: impl Into<String>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(token.into()),
            invalid_cursor_status: config.invalid_cursor_status,
            streaming: config.streaming,
            connected: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replaces the bearer token used by later requests.
    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    /// Returns whether the last request reached the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let token = self.token.read().clone();
        self.client
            .get(format!("{}/{}", self.base_url, path))
            .bearer_auth(token)
    }

    fn record_error(&self, error: &SyncError) {
        if matches!(error, SyncError::Transport { .. } | SyncError::Timeout) {
            self.connected.store(false, Ordering::SeqCst);
        }
        *self.last_error.write() = Some(error.to_string());
    }

    fn record_success(&self) {
        self.connected.store(true, Ordering::SeqCst);
        *self.last_error.write() = None;
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<reqwest::Response> {
        match request.send().await {
            Ok(response) => {
                self.record_success();
                Ok(response)
            }
            Err(e) => {
                let error = map_reqwest_error(e);
                self.record_error(&error);
                Err(error)
            }
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn bootstrap(&self) -> SyncResult<()> {
        let request = self
            .get("bootstrap")
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON);
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            let error = SyncError::Http {
                status: status.as_u16(),
            };
            self.record_error(&error);
            return Err(error);
        }
        debug!(status = status.as_u16(), "bootstrap completed");
        Ok(())
    }

    async fn open_feed(&self, cursor: Option<&str>) -> SyncResult<FeedResponse> {
        let mut request = self.get("sync/stream").header(ACCEPT, FEED_ACCEPT);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == self.invalid_cursor_status {
                debug!(status = status.as_u16(), "server rejected cursor");
                return Ok(FeedResponse::InvalidCursor);
            }
            let error = SyncError::Http {
                status: status.as_u16(),
            };
            self.record_error(&error);
            return Err(error);
        }

        if self.streaming {
            let chunks = response.bytes_stream().map_err(map_reqwest_error).boxed();
            Ok(FeedResponse::Streaming(chunks))
        } else {
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            debug!(bytes = body.len(), "feed body buffered");
            Ok(FeedResponse::Buffered(body))
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        return SyncError::Timeout;
    }
    if let Some(status) = e.status() {
        return SyncError::Http {
            status: status.as_u16(),
        };
    }
    let retryable = e.is_connect() || e.is_request() || e.is_body();
    SyncError::Transport {
        message: e.to_string(),
        retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        let config = SyncConfig::new("acme", "https://acme.example.com/api/");
        HttpTransport::with_client(Client::new(), &config, "t0")
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(transport().base_url(), "https://acme.example.com/api");
    }

    #[test]
    fn feed_request_carries_cursor_and_token() {
        let transport = transport();
        transport.set_auth_token("t1");

        let request = transport
            .get("sync/stream")
            .header(ACCEPT, FEED_ACCEPT)
            .query(&[("cursor", "abc 123")])
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://acme.example.com/api/sync/stream?cursor=abc+123"
        );
        assert_eq!(request.headers()[ACCEPT], FEED_ACCEPT);
        assert_eq!(request.headers()["authorization"], "Bearer t1");
    }

    #[test]
    fn new_transport_is_not_connected() {
        let transport = transport();
        assert!(!transport.is_connected());
        assert!(transport.last_error().is_none());

        transport.record_error(&SyncError::transport_retryable("refused"));
        assert!(transport.last_error().unwrap().contains("refused"));
    }
}
