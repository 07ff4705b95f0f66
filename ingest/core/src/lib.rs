//! Ingest Core - Stream Ingestion and Adaptive Tuning Engine
//!
//! This crate opens long-lived chunked network responses, decodes them into
//! discrete events, measures delivery in real time, applies backpressure,
//! retries failed opens with exponential backoff, and recommends transport
//! configuration based on observed connection quality.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreamManager                              │
//! │   registry (id → connection)     create / close / report          │
//! └───────────────┬──────────────────────────────────┬───────────────┘
//!                 │ spawns                            │ reads metrics
//!                 ▼                                   ▼
//! ┌──────────────────────────────────────┐   ┌──────────────────────┐
//! │        Connection driver task         │   │   Adaptive Optimizer │
//! │                                       │   │   optimize()         │
//! │  StreamSource::open  (retry/backoff)  │   │   suggestions()      │
//! │        │                              │   └──────────────────────┘
//! │        ▼                              │
//! │  EventDecoder → MetricsEngine →       │
//! │  BackpressureController → channel ────┼──▶ StreamHandle (caller)
//! └──────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamManager`]: Registry and public entry point
//! - [`StreamHandle`]: Ordered events for one connection
//! - [`StreamEvent`]: Chunk, error, or completion
//! - [`StreamConfig`]: Per-connection transport settings
//! - [`StreamMetrics`]: Delivery statistics and quality tier
//! - [`StreamSource`]: Where bytes come from ([`HttpSource`] by default)
//!
//! # Quick Start
//!
//! ```ignore
//! use ingest_core::{ConfigOverrides, StreamManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = StreamManager::http();
//!     let handle = manager
//!         .create("http://localhost:8080/stream", &ConfigOverrides::new())
//!         .unwrap();
//!
//!     let outcome = handle.collect().await;
//!     for chunk in &outcome.chunks {
//!         println!("{}", chunk.data);
//!     }
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod backpressure;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod optimizer;
pub mod retry;
pub mod source;

// Re-export commonly used types
pub use config::{
    load_config, load_config_from_path, ConfigError, ConfigOverrides, ConfigSource, EngineConfig,
    StreamConfig,
};
pub use connection::{
    CallbackObserver, ConnectionId, ConnectionStatus, StreamChunk, StreamConnection, StreamEvent,
    StreamHandle, StreamObserver, StreamOutcome,
};
pub use decoder::{DecodedLine, EventDecoder, DATA_PREFIX, DONE_SENTINEL};
pub use error::StreamError;
pub use manager::{StreamManager, StreamReport, NO_ACTIVE_CONNECTIONS};
pub use metrics::{classify, ConnectionQuality, MetricsEngine, StreamMetrics};
pub use source::{ByteStream, HttpSource, StreamSource};
