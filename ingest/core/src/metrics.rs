//! Connection Metrics
//!
//! Running statistics for a single connection and the quality ladder derived
//! from them. The engine is owned by its connection; callers only ever see
//! [`StreamMetrics`] snapshots.

use std::time::Instant;

use serde::{Deserialize, Serialize};

// ============================================================================
// Quality Classification
// ============================================================================

/// Derived classification of connection health
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// High error rate or very high latency
    Poor,
    /// Noticeable errors, latency, or low throughput
    Fair,
    /// Healthy with minor latency or moderate throughput
    Good,
    /// Low latency, high throughput, no errors
    Excellent,
}

impl ConnectionQuality {
    /// All tiers, worst first
    pub const ALL: [Self; 4] = [Self::Poor, Self::Fair, Self::Good, Self::Excellent];

    /// Lowercase tier name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error rate above which a connection is `Poor`
pub const POOR_ERROR_RATE: f64 = 0.10;
/// Latency (ms) above which a connection is `Poor`
pub const POOR_LATENCY_MS: f64 = 2000.0;
/// Error rate above which a connection is at best `Fair`
pub const FAIR_ERROR_RATE: f64 = 0.05;
/// Latency (ms) above which a connection is at best `Fair`
pub const FAIR_LATENCY_MS: f64 = 1000.0;
/// Throughput (B/s) below which a connection is at best `Fair`
pub const FAIR_THROUGHPUT_BPS: f64 = 1024.0;
/// Latency (ms) above which a connection is at best `Good`
pub const GOOD_LATENCY_MS: f64 = 500.0;
/// Throughput (B/s) below which a connection is at best `Good`
pub const GOOD_THROUGHPUT_BPS: f64 = 10240.0;

/// Classify connection health, evaluated top to bottom, first match wins
#[must_use]
pub fn classify(error_rate: f64, latency_ms: f64, throughput_bps: f64) -> ConnectionQuality {
    if error_rate > POOR_ERROR_RATE || latency_ms > POOR_LATENCY_MS {
        ConnectionQuality::Poor
    } else if error_rate > FAIR_ERROR_RATE
        || latency_ms > FAIR_LATENCY_MS
        || throughput_bps < FAIR_THROUGHPUT_BPS
    {
        ConnectionQuality::Fair
    } else if latency_ms > GOOD_LATENCY_MS || throughput_bps < GOOD_THROUGHPUT_BPS {
        ConnectionQuality::Good
    } else {
        ConnectionQuality::Excellent
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Read-only snapshot of a connection's statistics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Total payload bytes processed
    pub bytes_transferred: u64,
    /// Total chunks processed
    pub chunks_processed: u64,
    /// `bytes_transferred / chunks_processed`
    pub average_chunk_size: f64,
    /// Bytes per second since the connection started
    pub throughput_bps: f64,
    /// Processing lag of the most recent chunk
    pub latency_ms: f64,
    /// `retries / (retries + 1)`, in `[0, 1)`
    pub error_rate: f64,
    /// Derived health tier
    pub connection_quality: ConnectionQuality,
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self {
            bytes_transferred: 0,
            chunks_processed: 0,
            average_chunk_size: 0.0,
            throughput_bps: 0.0,
            latency_ms: 0.0,
            error_rate: 0.0,
            connection_quality: ConnectionQuality::Good,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Running statistics for one connection
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    started_at: Instant,
    metrics: StreamMetrics,
}

impl Default for MetricsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEngine {
    /// Start measuring from now
    #[must_use]
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Start measuring from a specific instant
    #[must_use]
    pub fn started_at(started_at: Instant) -> Self {
        Self {
            started_at,
            metrics: StreamMetrics::default(),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> StreamMetrics {
        self.metrics.clone()
    }

    /// Borrow the live values
    #[must_use]
    pub fn current(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Record a chunk of `size` bytes stamped at `arrived_at`
    pub fn record_chunk(&mut self, size: usize, arrived_at: Instant) {
        self.record_chunk_at(size, arrived_at, Instant::now());
    }

    /// Record a chunk with an explicit "now" (used for deterministic tests)
    pub fn record_chunk_at(&mut self, size: usize, arrived_at: Instant, now: Instant) {
        let m = &mut self.metrics;
        m.bytes_transferred += size as u64;
        m.chunks_processed += 1;
        m.average_chunk_size = m.bytes_transferred as f64 / m.chunks_processed as f64;

        // Floor at 1ms so the first chunk never divides by zero
        let elapsed_secs = arrived_at
            .saturating_duration_since(self.started_at)
            .as_secs_f64()
            .max(0.001);
        m.throughput_bps = m.bytes_transferred as f64 / elapsed_secs;
        m.latency_ms = now.saturating_duration_since(arrived_at).as_secs_f64() * 1000.0;

        self.reclassify();
    }

    /// Record that `retry_count` open attempts have failed so far
    pub fn record_retry(&mut self, retry_count: u32) {
        let retries = f64::from(retry_count);
        self.metrics.error_rate = retries / (retries + 1.0);
        self.reclassify();
    }

    fn reclassify(&mut self) {
        let m = &mut self.metrics;
        m.connection_quality = classify(m.error_rate, m.latency_ms, m.throughput_bps);
    }
}
