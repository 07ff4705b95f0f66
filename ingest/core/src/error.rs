//! Stream Errors
//!
//! Error taxonomy for the ingestion engine:
//!
//! - **Connect failures** (`Timeout`, `HttpStatus`, `Network`) are recoverable
//!   and feed the retry loop. They only become fatal as `RetriesExhausted`.
//! - **Read failures** after the connection is established are fatal for that
//!   connection. There is no retry at this layer.
//! - Decode failures never appear here; the decoder logs and skips them.

use thiserror::Error;

/// Errors surfaced by the ingestion engine
///
/// `Clone` so the same error can be delivered to the caller and kept on the
/// connection snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Configuration overrides produced an unusable config
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// A single open attempt exceeded `timeout_ms`
    #[error("Connection attempt timed out after {timeout_ms}ms")]
    Timeout {
        /// The per-attempt bound that was exceeded
        timeout_ms: u64,
    },

    /// The endpoint answered with a non-2xx status
    #[error("Endpoint returned {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body (possibly empty)
        body: String,
    },

    /// Transport-level failure while opening the stream
    #[error("Network error: {0}")]
    Network(String),

    /// Every open attempt failed
    #[error("Connection failed: exhausted {attempts} attempts (last error: {last_error})")]
    RetriesExhausted {
        /// Total attempts made (initial + retries)
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// A read failed after the stream was established
    #[error("Read failed: {0}")]
    Read(String),
}

impl StreamError {
    /// Whether this failure is eligible for another open attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::HttpStatus { .. } | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
