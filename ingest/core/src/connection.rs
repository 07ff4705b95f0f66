//! Stream Connections
//!
//! A connection is one streaming session: it owns its decoder, its metrics
//! engine and its status, and runs as an independent tokio task.
//!
//! # State Machine
//!
//! ```text
//!                 open ok (2xx)
//!   Connecting ─────────────────▶ Connected
//!       │                           │    │
//!       │ retries exhausted         │    │ [DONE] / stream end / close
//!       ▼                           │    ▼
//!     Error ◀───────────────────────┘  Disconnected
//!                 read failure
//! ```
//!
//! `Error` and `Disconnected` are terminal.
//!
//! # Pipeline
//!
//! Per connection, strictly sequential:
//! read → decode → metrics → backpressure → dispatch. Chunks reach the caller
//! in arrival order, followed by exactly one terminal event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backpressure::{apply_backpressure, BackpressureController};
use crate::config::{EngineConfig, StreamConfig};
use crate::decoder::{DecodedLine, EventDecoder, EventFrame};
use crate::error::StreamError;
use crate::metrics::{MetricsEngine, StreamMetrics};
use crate::retry::{sleep_backoff, RetryDecision, RetryPolicy, RetryState};
use crate::source::{ByteStream, StreamSource};

// ============================================================================
// Identifiers and Status
// ============================================================================

/// Globally unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0.simple())
    }
}

/// Connection lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Opening (including retries)
    Connecting,
    /// Stream established, reading
    Connected,
    /// Clean end: sentinel, natural close, or explicit close
    Disconnected,
    /// Unrecoverable failure
    Error,
}

impl ConnectionStatus {
    /// No transition leaves a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Counted as active by `list_active`
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Chunks and Events
// ============================================================================

/// One decoded event delivered to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Per-connection sequence number, starting at 1
    pub id: u64,
    /// Decoded payload text
    pub data: String,
    /// When the chunk was created
    pub timestamp: DateTime<Utc>,
    /// Payload size in bytes
    pub size: usize,
    /// Always false; completion is signalled by `StreamEvent::Complete`
    pub is_complete: bool,
    /// Optional payload metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Everything a connection delivers, in order
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A decoded chunk
    Chunk(StreamChunk),
    /// Terminal failure
    Error(StreamError),
    /// Terminal success, with the final metrics
    Complete(StreamMetrics),
}

impl StreamEvent {
    /// Whether this is the last event of the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Immutable view of a connection
#[derive(Clone, Debug)]
pub struct StreamConnection {
    /// Connection identifier
    pub id: ConnectionId,
    /// Endpoint URL
    pub url: String,
    /// Config in use
    pub config: StreamConfig,
    /// Current status
    pub status: ConnectionStatus,
    /// Metrics at snapshot time
    pub metrics: StreamMetrics,
    /// When the connection was created
    pub start_time: DateTime<Utc>,
    /// Last time bytes were received (or creation time)
    pub last_activity: DateTime<Utc>,
    /// Time since `last_activity`
    pub idle_for: Duration,
    /// Open attempts started so far
    pub attempts: u32,
    /// Most recent failure, if any
    pub last_error: Option<StreamError>,
}

/// Mutable connection state shared between the driver and the manager
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) id: ConnectionId,
    pub(crate) url: String,
    pub(crate) config: StreamConfig,
    pub(crate) status: ConnectionStatus,
    pub(crate) metrics: MetricsEngine,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) last_activity: Instant,
    pub(crate) last_activity_at: DateTime<Utc>,
    pub(crate) attempts: u32,
    pub(crate) last_error: Option<StreamError>,
}

pub(crate) type SharedConnection = Arc<Mutex<ConnectionState>>;

impl ConnectionState {
    pub(crate) fn new(id: ConnectionId, url: String, config: StreamConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            url,
            config,
            status: ConnectionStatus::Connecting,
            metrics: MetricsEngine::new(),
            start_time: now,
            last_activity: Instant::now(),
            last_activity_at: now,
            attempts: 0,
            last_error: None,
        }
    }

    pub(crate) fn snapshot(&self) -> StreamConnection {
        StreamConnection {
            id: self.id,
            url: self.url.clone(),
            config: self.config.clone(),
            status: self.status,
            metrics: self.metrics.snapshot(),
            start_time: self.start_time,
            last_activity: self.last_activity_at,
            idle_for: self.last_activity.elapsed(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_activity_at = Utc::now();
    }
}

// ============================================================================
// Caller-side Handle
// ============================================================================

/// Callback-style consumer of a stream
pub trait StreamObserver: Send {
    /// Called for every chunk, in order
    fn on_chunk(&mut self, chunk: StreamChunk);
    /// Called once if the stream fails
    fn on_error(&mut self, error: StreamError);
    /// Called once if the stream ends cleanly
    fn on_complete(&mut self, metrics: StreamMetrics);
}

type ChunkFn = Box<dyn FnMut(StreamChunk) + Send>;
type ErrorFn = Box<dyn FnMut(StreamError) + Send>;
type CompleteFn = Box<dyn FnMut(StreamMetrics) + Send>;

/// `StreamObserver` built from closures
#[derive(Default)]
pub struct CallbackObserver {
    on_chunk: Option<ChunkFn>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl CallbackObserver {
    /// Observer that ignores everything until callbacks are attached
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk callback
    #[must_use]
    pub fn on_chunk(mut self, f: impl FnMut(StreamChunk) + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    /// Set the error callback
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(StreamError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Set the completion callback
    #[must_use]
    pub fn on_complete(mut self, f: impl FnMut(StreamMetrics) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl StreamObserver for CallbackObserver {
    fn on_chunk(&mut self, chunk: StreamChunk) {
        if let Some(f) = self.on_chunk.as_mut() {
            f(chunk);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if let Some(f) = self.on_error.as_mut() {
            f(error);
        }
    }

    fn on_complete(&mut self, metrics: StreamMetrics) {
        if let Some(f) = self.on_complete.as_mut() {
            f(metrics);
        }
    }
}

/// Everything a stream produced, gathered by [`StreamHandle::collect`]
#[derive(Clone, Debug)]
pub struct StreamOutcome {
    /// Chunks in delivery order
    pub chunks: Vec<StreamChunk>,
    /// Final metrics or the terminal error
    pub result: Result<StreamMetrics, StreamError>,
}

/// Receiving end of a connection
///
/// Dropping the handle stops the connection.
#[derive(Debug)]
pub struct StreamHandle {
    id: ConnectionId,
    events: mpsc::Receiver<StreamEvent>,
}

impl StreamHandle {
    pub(crate) fn new(id: ConnectionId, events: mpsc::Receiver<StreamEvent>) -> Self {
        Self { id, events }
    }

    /// Connection this handle belongs to
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next event; `None` after the terminal event
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Feed every event to `observer` until the stream ends
    ///
    /// # Errors
    ///
    /// Returns the terminal error if the stream failed, after `on_error`.
    pub async fn drive<O: StreamObserver + ?Sized>(
        mut self,
        observer: &mut O,
    ) -> Result<StreamMetrics, StreamError> {
        while let Some(event) = self.events.recv().await {
            match event {
                StreamEvent::Chunk(chunk) => observer.on_chunk(chunk),
                StreamEvent::Error(error) => {
                    observer.on_error(error.clone());
                    return Err(error);
                }
                StreamEvent::Complete(metrics) => {
                    observer.on_complete(metrics.clone());
                    return Ok(metrics);
                }
            }
        }

        let error = StreamError::Read("connection task ended without a final report".to_string());
        observer.on_error(error.clone());
        Err(error)
    }

    /// Gather all chunks and the final result
    pub async fn collect(mut self) -> StreamOutcome {
        let mut chunks = Vec::new();
        while let Some(event) = self.events.recv().await {
            match event {
                StreamEvent::Chunk(chunk) => chunks.push(chunk),
                StreamEvent::Error(error) => {
                    return StreamOutcome {
                        chunks,
                        result: Err(error),
                    }
                }
                StreamEvent::Complete(metrics) => {
                    return StreamOutcome {
                        chunks,
                        result: Ok(metrics),
                    }
                }
            }
        }
        StreamOutcome {
            chunks,
            result: Err(StreamError::Read(
                "connection task ended without a final report".to_string(),
            )),
        }
    }
}

// ============================================================================
// Driver Task
// ============================================================================

/// How the driver stopped
#[derive(Debug)]
enum Termination {
    Completed,
    Failed(StreamError),
    Cancelled,
    ConsumerGone,
}

/// Runs one connection from open to terminal state
pub(crate) struct ConnectionDriver {
    id: ConnectionId,
    url: String,
    config: StreamConfig,
    state: SharedConnection,
    source: Arc<dyn StreamSource>,
    engine: Arc<EngineConfig>,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    next_chunk_id: u64,
}

impl ConnectionDriver {
    pub(crate) fn new(
        state: SharedConnection,
        source: Arc<dyn StreamSource>,
        engine: Arc<EngineConfig>,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (id, url, config) = {
            let s = state.lock();
            (s.id, s.url.clone(), s.config.clone())
        };
        Self {
            id,
            url,
            config,
            state,
            source,
            engine,
            events,
            cancel,
            next_chunk_id: 0,
        }
    }

    /// Drive the connection to a terminal state and deliver the final event
    pub(crate) async fn run(mut self) {
        let termination = match self.connect().await {
            Ok(stream) => self.pump(stream).await,
            Err(termination) => termination,
        };
        self.finish(termination).await;
    }

    /// Open with bounded retries
    async fn connect(&mut self) -> Result<ByteStream, Termination> {
        let policy = RetryPolicy::from_engine(&self.engine, self.config.retry_attempts);
        let mut retry = RetryState::new(policy);

        loop {
            let attempt = retry.attempts();
            self.state.lock().attempts = attempt;
            tracing::debug!(
                connection_id = %self.id,
                source = self.source.name(),
                attempt,
                "Opening stream"
            );

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Termination::Cancelled),
                () = self.events.closed() => return Err(Termination::ConsumerGone),
                result = tokio::time::timeout(
                    self.config.timeout(),
                    self.source.open(&self.url, &self.config),
                ) => result,
            };

            let error = match opened {
                Ok(Ok(stream)) => {
                    let mut s = self.state.lock();
                    if s.status.is_terminal() {
                        return Err(Termination::Cancelled);
                    }
                    s.status = ConnectionStatus::Connected;
                    s.touch(Instant::now());
                    tracing::info!(connection_id = %self.id, attempt, "Stream connected");
                    return Ok(stream);
                }
                Ok(Err(e)) => e,
                Err(_) => StreamError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                },
            };

            tracing::warn!(
                connection_id = %self.id,
                attempt,
                error = %error,
                "Connection attempt failed"
            );

            let decision = match retry.on_failure() {
                RetryDecision::Retry { .. } if !error.is_retryable() => RetryDecision::GiveUp {
                    attempts: retry.failures(),
                },
                decision => decision,
            };
            {
                let mut s = self.state.lock();
                s.metrics.record_retry(retry.failures());
                s.last_error = Some(error.clone());
            }

            match decision {
                RetryDecision::Retry { retry: n, delay } => {
                    tracing::debug!(
                        connection_id = %self.id,
                        retry = n,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(Termination::Cancelled),
                        () = self.events.closed() => return Err(Termination::ConsumerGone),
                        () = sleep_backoff(delay) => {}
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    return Err(Termination::Failed(StreamError::RetriesExhausted {
                        attempts,
                        last_error: error.to_string(),
                    }));
                }
            }
        }
    }

    /// Read, decode and dispatch until the stream ends
    async fn pump(&mut self, mut stream: ByteStream) -> Termination {
        let mut decoder = EventDecoder::with_capacity(self.config.buffer_size);
        let backpressure = BackpressureController::for_stream(&self.engine, &self.config);

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Termination::Cancelled,
                () = self.events.closed() => return Termination::ConsumerGone,
                next = stream.next() => next,
            };

            let arrived_at = Instant::now();
            let (lines, ended) = match next {
                Some(Ok(bytes)) => {
                    self.state.lock().touch(arrived_at);
                    (decoder.push(&bytes), false)
                }
                Some(Err(e)) => return Termination::Failed(e),
                None => (decoder.finish(), true),
            };

            for line in lines {
                match line {
                    DecodedLine::Event(frame) => {
                        if let Some(stop) = self.deliver(frame, &backpressure).await {
                            return stop;
                        }
                    }
                    DecodedLine::Done => return Termination::Completed,
                    DecodedLine::KeepAlive | DecodedLine::Skip(_) => {}
                }
            }

            if ended {
                return Termination::Completed;
            }
        }
    }

    /// Metrics, backpressure, then dispatch for one frame
    async fn deliver(
        &mut self,
        frame: EventFrame,
        backpressure: &BackpressureController,
    ) -> Option<Termination> {
        self.next_chunk_id += 1;
        let size = frame.size();
        // Stamped per frame so earlier frames' pauses don't count as latency
        let stamped_at = Instant::now();
        let chunk = StreamChunk {
            id: self.next_chunk_id,
            data: frame.data,
            timestamp: Utc::now(),
            size,
            is_complete: false,
            metadata: frame.metadata,
        };

        let decision = {
            let mut s = self.state.lock();
            s.metrics.record_chunk(size, stamped_at);
            backpressure.evaluate(s.metrics.current())
        };

        if !decision.is_clear() {
            tracing::debug!(
                connection_id = %self.id,
                chunk_id = chunk.id,
                delay_ms = decision.total().as_millis() as u64,
                "Applying backpressure"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Some(Termination::Cancelled),
                () = apply_backpressure(&decision) => {}
            }
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(Termination::Cancelled),
            sent = self.events.send(StreamEvent::Chunk(chunk)) => {
                sent.is_err().then_some(Termination::ConsumerGone)
            }
        }
    }

    /// Set the terminal status and deliver the single final event
    async fn finish(self, termination: Termination) {
        let (final_event, metrics) = {
            let mut s = self.state.lock();
            // A terminal status here can only come from an explicit close
            let termination = if s.status.is_terminal()
                && !matches!(termination, Termination::ConsumerGone)
            {
                Termination::Cancelled
            } else {
                termination
            };

            let final_event = match termination {
                Termination::Completed | Termination::Cancelled => {
                    s.status = ConnectionStatus::Disconnected;
                    Some(StreamEvent::Complete(s.metrics.snapshot()))
                }
                Termination::Failed(error) => {
                    s.status = ConnectionStatus::Error;
                    s.last_error = Some(error.clone());
                    Some(StreamEvent::Error(error))
                }
                Termination::ConsumerGone => {
                    s.status = ConnectionStatus::Disconnected;
                    None
                }
            };
            (final_event, s.metrics.snapshot())
        };

        match &final_event {
            Some(StreamEvent::Error(error)) => tracing::error!(
                connection_id = %self.id,
                error = %error,
                "Stream failed"
            ),
            Some(_) => tracing::info!(
                connection_id = %self.id,
                chunks = metrics.chunks_processed,
                bytes = metrics.bytes_transferred,
                quality = %metrics.connection_quality,
                "Stream completed"
            ),
            None => tracing::debug!(
                connection_id = %self.id,
                "Consumer dropped, stream stopped"
            ),
        }

        if let Some(event) = final_event {
            let _ = self.events.send(event).await;
        }
    }
}
