//! Stream Sources
//!
//! Abstraction over where stream bytes come from. The engine only needs
//! "open this URL with this config and give me a byte stream"; the HTTP
//! specifics live in [`HttpSource`].
//!
//! # Wire Contract
//!
//! `HttpSource` issues a `POST` with body
//! `{"stream": true, "buffer_size": <int>, "compression": <bool>}` and
//! `Accept: text/event-stream`. Any non-2xx response fails the attempt.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::config::StreamConfig;
use crate::error::StreamError;

/// Raw body bytes as they arrive from the network
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, StreamError>> + Send>>;

/// Media type requested from the endpoint
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// A place streams can be opened from
///
/// Implementations report connect failures from `open` (these are retried by
/// the caller) and read failures as `Err` items in the returned stream (these
/// are not).
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Source name for logs
    fn name(&self) -> &str;

    /// Open a stream
    ///
    /// The caller bounds this with `config.timeout_ms`.
    async fn open(&self, url: &str, config: &StreamConfig) -> Result<ByteStream, StreamError>;
}

/// JSON body sent when opening a stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    /// Always true
    pub stream: bool,
    /// Buffer size hint
    pub buffer_size: usize,
    /// Request a compressed stream
    pub compression: bool,
}

impl StreamRequest {
    /// Build the request body for a config
    #[must_use]
    pub fn for_config(config: &StreamConfig) -> Self {
        Self {
            stream: true,
            buffer_size: config.buffer_size,
            compression: config.compression_enabled,
        }
    }
}

/// HTTP streaming source backed by `reqwest`
#[derive(Clone, Debug)]
pub struct HttpSource {
    http_client: reqwest::Client,
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpSource {
    /// Create a source with a default HTTP client
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a source with a caller-configured client (proxies, TLS, ...)
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl StreamSource for HttpSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open(&self, url: &str, config: &StreamConfig) -> Result<ByteStream, StreamError> {
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(&StreamRequest::for_config(config))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::HttpStatus { status, body });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| StreamError::Read(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}
