//! Stream Manager Implementation
//!
//! The registry of live connections and the public entry point for creating,
//! querying, closing and reporting on streams.
//!
//! # Registry Discipline
//!
//! Every insert, reap, close and snapshot goes through one registry mutex.
//! The manager and each connection's driver task may both try to remove an
//! entry (explicit close vs. reaping after the final event); removal is
//! remove-if-present, so exactly one of them succeeds.
//!
//! # Example
//!
//! ```no_run
//! use ingest_core::{ConfigOverrides, StreamEvent, StreamManager};
//!
//! # async fn demo() -> Result<(), ingest_core::StreamError> {
//! let manager = StreamManager::http();
//! let mut handle = manager.create(
//!     "http://localhost:8080/stream",
//!     &ConfigOverrides::new().with_buffer_size(4096),
//! )?;
//!
//! while let Some(event) = handle.next().await {
//!     match event {
//!         StreamEvent::Chunk(chunk) => println!("{}", chunk.data),
//!         StreamEvent::Error(e) => eprintln!("stream failed: {e}"),
//!         StreamEvent::Complete(metrics) => println!("{} chunks", metrics.chunks_processed),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigOverrides, EngineConfig, StreamConfig};
use crate::connection::{
    ConnectionDriver, ConnectionId, ConnectionState, ConnectionStatus, SharedConnection,
    StreamConnection, StreamHandle,
};
use crate::error::StreamError;
use crate::metrics::{ConnectionQuality, FAIR_LATENCY_MS, FAIR_THROUGHPUT_BPS};
use crate::optimizer;
use crate::source::{HttpSource, StreamSource};

/// Recommendation given when nothing is registered
pub const NO_ACTIVE_CONNECTIONS: &str = "no active connections";

// ============================================================================
// Report
// ============================================================================

/// Aggregate view over every registered connection
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamReport {
    /// Registered connections, including terminal ones not yet reaped
    pub total_connections: usize,
    /// Connections that are connecting or connected
    pub active_connections: usize,
    /// Mean `latency_ms` across registered connections
    pub average_latency: f64,
    /// Mean `throughput_bps` across registered connections
    pub average_throughput: f64,
    /// Connection count per quality tier (every tier present)
    pub quality_distribution: BTreeMap<ConnectionQuality, usize>,
    /// Free-text advice
    pub recommendations: Vec<String>,
}

impl StreamReport {
    fn from_snapshots(snapshots: &[StreamConnection]) -> Self {
        let mut quality_distribution: BTreeMap<ConnectionQuality, usize> =
            ConnectionQuality::ALL.iter().map(|q| (*q, 0)).collect();

        if snapshots.is_empty() {
            return Self {
                total_connections: 0,
                active_connections: 0,
                average_latency: 0.0,
                average_throughput: 0.0,
                quality_distribution,
                recommendations: vec![NO_ACTIVE_CONNECTIONS.to_string()],
            };
        }

        let total = snapshots.len();
        let active = snapshots.iter().filter(|c| c.status.is_active()).count();
        let average_latency =
            snapshots.iter().map(|c| c.metrics.latency_ms).sum::<f64>() / total as f64;
        let average_throughput =
            snapshots.iter().map(|c| c.metrics.throughput_bps).sum::<f64>() / total as f64;

        for connection in snapshots {
            *quality_distribution
                .entry(connection.metrics.connection_quality)
                .or_insert(0) += 1;
        }

        let mut recommendations = Vec::new();
        if active == 0 {
            recommendations.push(NO_ACTIVE_CONNECTIONS.to_string());
        }
        let poor = quality_distribution
            .get(&ConnectionQuality::Poor)
            .copied()
            .unwrap_or(0);
        if poor > 0 {
            recommendations.push(format!(
                "{poor} connection(s) in poor quality: reduce buffer size and allow more retries"
            ));
        }
        if average_latency > FAIR_LATENCY_MS {
            recommendations.push(format!(
                "high average latency ({average_latency:.0} ms): shorten flush intervals"
            ));
        }
        if average_throughput < FAIR_THROUGHPUT_BPS {
            recommendations.push(format!(
                "low average throughput ({average_throughput:.0} B/s): enable compression"
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("all connections healthy".to_string());
        }

        Self {
            total_connections: total,
            active_connections: active,
            average_latency,
            average_throughput,
            quality_distribution,
            recommendations,
        }
    }
}

// ============================================================================
// Stream Manager
// ============================================================================

/// Registry entry: shared state plus the driver's cancellation token
struct ConnectionEntry {
    state: SharedConnection,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<ConnectionId, ConnectionEntry>>>;

struct ManagerInner {
    registry: Registry,
    source: Arc<dyn StreamSource>,
    config: Arc<EngineConfig>,
}

/// Orchestrates concurrent stream connections
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("source", &self.inner.source.name())
            .field("connections", &self.inner.registry.lock().len())
            .finish_non_exhaustive()
    }
}

impl StreamManager {
    /// Create a manager over `source` with default engine config
    #[must_use]
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    /// Create a manager with explicit engine config
    #[must_use]
    pub fn with_config(source: Arc<dyn StreamSource>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: Arc::new(Mutex::new(HashMap::new())),
                source,
                config: Arc::new(config),
            }),
        }
    }

    /// Create a manager that streams over HTTP
    #[must_use]
    pub fn http() -> Self {
        Self::new(Arc::new(HttpSource::new()))
    }

    /// Engine config in use
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Open a new stream
    ///
    /// The connection runs as its own task; events arrive on the returned
    /// handle. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidConfig` if the overrides produce an
    /// invalid config. Network failures are reported on the handle instead.
    pub fn create(
        &self,
        url: &str,
        overrides: &ConfigOverrides,
    ) -> Result<StreamHandle, StreamError> {
        let config = overrides.apply_to(&self.inner.config.stream);
        config.validate()?;

        let id = ConnectionId::new();
        let state: SharedConnection = Arc::new(Mutex::new(ConnectionState::new(
            id,
            url.to_string(),
            config,
        )));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity.max(1));

        self.inner.registry.lock().insert(
            id,
            ConnectionEntry {
                state: Arc::clone(&state),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(
            connection_id = %id,
            url = %url,
            source = self.inner.source.name(),
            "Stream created"
        );

        let driver = ConnectionDriver::new(
            state,
            Arc::clone(&self.inner.source),
            Arc::clone(&self.inner.config),
            tx,
            cancel,
        );
        let registry = Arc::clone(&self.inner.registry);
        tokio::spawn(async move {
            driver.run().await;
            if registry.lock().remove(&id).is_some() {
                tracing::debug!(connection_id = %id, "Connection reaped");
            }
        });

        Ok(StreamHandle::new(id, rx))
    }

    /// Snapshot of a registered connection
    #[must_use]
    pub fn get_status(&self, id: ConnectionId) -> Option<StreamConnection> {
        self.inner
            .registry
            .lock()
            .get(&id)
            .map(|entry| entry.state.lock().snapshot())
    }

    /// Close a connection
    ///
    /// Returns `true` only for the call that actually stopped a live
    /// connection; unknown, already closed, or already terminal ids give
    /// `false`.
    pub fn close(&self, id: ConnectionId) -> bool {
        let entry = {
            let mut registry = self.inner.registry.lock();
            let live = registry.get(&id).is_some_and(|entry| {
                let mut state = entry.state.lock();
                if state.status.is_terminal() {
                    false
                } else {
                    state.status = ConnectionStatus::Disconnected;
                    true
                }
            });
            if live {
                registry.remove(&id)
            } else {
                None
            }
        };

        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(connection_id = %id, "Stream closed");
                true
            }
            None => {
                tracing::debug!(connection_id = %id, "Close ignored, no live connection");
                false
            }
        }
    }

    /// Close every live connection, returning how many were closed
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.inner.registry.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.close(*id)).count()
    }

    /// Connections that are connecting or connected
    #[must_use]
    pub fn list_active(&self) -> Vec<StreamConnection> {
        self.snapshots()
            .into_iter()
            .filter(|c| c.status.is_active())
            .collect()
    }

    /// Number of registered connections, including unreaped terminal ones
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Live connections that have received nothing for at least `max_idle`
    #[must_use]
    pub fn stale(&self, max_idle: Duration) -> Vec<ConnectionId> {
        self.list_active()
            .into_iter()
            .filter(|c| c.idle_for >= max_idle)
            .map(|c| c.id)
            .collect()
    }

    /// Aggregate report across registered connections
    #[must_use]
    pub fn report(&self) -> StreamReport {
        StreamReport::from_snapshots(&self.snapshots())
    }

    /// Recommended config for a registered connection
    #[must_use]
    pub fn optimize(&self, id: ConnectionId) -> Option<StreamConfig> {
        self.get_status(id)
            .map(|c| optimizer::optimize(&c.metrics, &c.config))
    }

    /// Advice for a registered connection
    #[must_use]
    pub fn suggestions(&self, id: ConnectionId) -> Option<Vec<String>> {
        self.get_status(id)
            .map(|c| optimizer::suggestions(&c.metrics))
    }

    fn snapshots(&self) -> Vec<StreamConnection> {
        self.inner
            .registry
            .lock()
            .values()
            .map(|entry| entry.state.lock().snapshot())
            .collect()
    }
}
