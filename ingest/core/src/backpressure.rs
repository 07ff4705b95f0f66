//! Backpressure
//!
//! Advisory flow control for the read loop. Nothing is dropped; the loop is
//! only delayed so the consumer can drain.
//!
//! Two independent pauses are evaluated after every processed chunk:
//!
//! - **Threshold pause**: once `bytes_transferred` exceeds the connection's
//!   `backpressure_threshold`, wait a short fixed interval before the next read.
//! - **Mandatory yield**: every `flush_every_chunks` chunks, wait
//!   `flush_interval` regardless of load, bounding consumer starvation.

use std::time::Duration;

use crate::config::{EngineConfig, StreamConfig};
use crate::metrics::StreamMetrics;

/// Pauses to apply after a chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackpressureDecision {
    /// Threshold pause, if over the threshold
    pub pause: Option<Duration>,
    /// Mandatory cadence yield, if due
    pub flush_yield: Option<Duration>,
}

impl BackpressureDecision {
    /// No delay needed
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.pause.is_none() && self.flush_yield.is_none()
    }

    /// Combined delay
    #[must_use]
    pub fn total(&self) -> Duration {
        self.pause
            .unwrap_or_default()
            .saturating_add(self.flush_yield.unwrap_or_default())
    }
}

/// Evaluates backpressure for one connection
#[derive(Clone, Debug)]
pub struct BackpressureController {
    threshold: u64,
    pause: Duration,
    flush_every: u64,
    flush_interval: Duration,
}

impl BackpressureController {
    /// Create a controller from explicit parameters
    #[must_use]
    pub fn new(threshold: u64, pause: Duration, flush_every: u64, flush_interval: Duration) -> Self {
        Self {
            threshold,
            pause,
            flush_every: flush_every.max(1),
            flush_interval,
        }
    }

    /// Create a controller for a connection's config
    #[must_use]
    pub fn for_stream(engine: &EngineConfig, stream: &StreamConfig) -> Self {
        Self::new(
            stream.backpressure_threshold,
            Duration::from_millis(engine.backpressure_pause_ms),
            engine.flush_every_chunks,
            stream.flush_interval(),
        )
    }

    /// Decide what to wait for, given the metrics after the latest chunk
    #[must_use]
    pub fn evaluate(&self, metrics: &StreamMetrics) -> BackpressureDecision {
        let pause = (metrics.bytes_transferred > self.threshold).then_some(self.pause);
        let flush_yield = (metrics.chunks_processed > 0
            && metrics.chunks_processed % self.flush_every == 0)
            .then_some(self.flush_interval);

        BackpressureDecision { pause, flush_yield }
    }
}

/// Wait out a backpressure decision
///
/// Call this after dispatching the chunk and before reading further bytes.
pub async fn apply_backpressure(decision: &BackpressureDecision) {
    if let Some(pause) = decision.pause {
        tokio::time::sleep(pause).await;
    }
    if let Some(flush) = decision.flush_yield {
        tokio::time::sleep(flush).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(bytes: u64, chunks: u64) -> StreamMetrics {
        StreamMetrics {
            bytes_transferred: bytes,
            chunks_processed: chunks,
            ..Default::default()
        }
    }

    fn controller() -> BackpressureController {
        BackpressureController::new(
            1000,
            Duration::from_millis(10),
            10,
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_under_threshold_is_clear() {
        let decision = controller().evaluate(&metrics(1000, 3));
        assert!(decision.is_clear());
        assert_eq!(decision.total(), Duration::ZERO);
    }

    #[test]
    fn test_over_threshold_pauses() {
        let decision = controller().evaluate(&metrics(1001, 3));
        assert_eq!(decision.pause, Some(Duration::from_millis(10)));
        assert_eq!(decision.flush_yield, None);
    }

    #[test]
    fn test_mandatory_yield_every_tenth_chunk() {
        let c = controller();
        let yields: Vec<u64> = (1..=30)
            .filter(|&n| c.evaluate(&metrics(0, n)).flush_yield.is_some())
            .collect();
        assert_eq!(yields, vec![10, 20, 30]);
    }

    #[test]
    fn test_both_pauses_combine() {
        let decision = controller().evaluate(&metrics(5000, 10));
        assert_eq!(decision.total(), Duration::from_millis(110));
    }

    #[test]
    fn test_total_saturates() {
        let decision = BackpressureDecision {
            pause: Some(Duration::MAX),
            flush_yield: Some(Duration::from_millis(100)),
        };
        assert_eq!(decision.total(), Duration::MAX);
    }

    #[test]
    fn test_for_stream_uses_config() {
        let engine = EngineConfig::default();
        let stream = StreamConfig {
            backpressure_threshold: 64,
            flush_interval_ms: 25,
            ..Default::default()
        };
        let c = BackpressureController::for_stream(&engine, &stream);
        let decision = c.evaluate(&metrics(65, 10));
        assert_eq!(decision.pause, Some(Duration::from_millis(10)));
        assert_eq!(decision.flush_yield, Some(Duration::from_millis(25)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_backpressure_waits_total() {
        let decision = controller().evaluate(&metrics(5000, 10));
        let start = tokio::time::Instant::now();
        apply_backpressure(&decision).await;
        assert!(start.elapsed() >= Duration::from_millis(110));
    }
}
