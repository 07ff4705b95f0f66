//! Adaptive Optimizer
//!
//! Turns a connection's observed metrics into a recommended [`StreamConfig`]
//! for the next attempt. The live connection's config is never changed.
//!
//! Rules run in order and later rules may adjust fields touched earlier:
//!
//! | Condition | Adjustment |
//! |---|---|
//! | quality `poor` | halve buffer (≥1024) and flush (≥50), +1 retry (≤5), timeout ×1.5 (≤60000) |
//! | quality `fair` | buffer ×0.8 (≥2048), flush ×0.8 (≥75) |
//! | quality `excellent` | buffer ×1.5 (≤16384), flush ×1.2 (≤200), compression on |
//! | latency > 1000 ms | halve flush (≥25) |
//! | throughput < 1024 B/s | compression on, double buffer (≤16384) |
//!
//! Fractional results are truncated toward zero.

use crate::config::StreamConfig;
use crate::metrics::{ConnectionQuality, StreamMetrics, FAIR_LATENCY_MS, FAIR_THROUGHPUT_BPS};

/// Smallest buffer a `poor` connection is shrunk to
pub const MIN_POOR_BUFFER_SIZE: usize = 1024;
/// Smallest buffer a `fair` connection is shrunk to
pub const MIN_FAIR_BUFFER_SIZE: usize = 2048;
/// Largest buffer the optimizer recommends
pub const MAX_BUFFER_SIZE: usize = 16_384;
/// Retry budget ceiling
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Timeout ceiling (ms)
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Notice returned when no threshold is crossed
pub const HEALTHY_NOTICE: &str = "connection healthy, no optimization needed";

fn scale_usize(value: usize, factor: f64) -> usize {
    (value as f64 * factor) as usize
}

fn scale_u64(value: u64, factor: f64) -> u64 {
    (value as f64 * factor) as u64
}

/// Recommend a config for the next attempt
#[must_use]
pub fn optimize(metrics: &StreamMetrics, current: &StreamConfig) -> StreamConfig {
    let mut next = current.clone();

    match metrics.connection_quality {
        ConnectionQuality::Poor => {
            next.buffer_size = (next.buffer_size / 2).max(MIN_POOR_BUFFER_SIZE);
            next.flush_interval_ms = (next.flush_interval_ms / 2).max(50);
            next.retry_attempts = next.retry_attempts.saturating_add(1).min(MAX_RETRY_ATTEMPTS);
            next.timeout_ms = scale_u64(next.timeout_ms, 1.5).min(MAX_TIMEOUT_MS);
        }
        ConnectionQuality::Fair => {
            next.buffer_size = scale_usize(next.buffer_size, 0.8).max(MIN_FAIR_BUFFER_SIZE);
            next.flush_interval_ms = scale_u64(next.flush_interval_ms, 0.8).max(75);
        }
        ConnectionQuality::Excellent => {
            next.buffer_size = scale_usize(next.buffer_size, 1.5).min(MAX_BUFFER_SIZE);
            next.flush_interval_ms = scale_u64(next.flush_interval_ms, 1.2).min(200);
            next.compression_enabled = true;
        }
        ConnectionQuality::Good => {}
    }

    if metrics.latency_ms > FAIR_LATENCY_MS {
        next.flush_interval_ms = (next.flush_interval_ms / 2).max(25);
    }

    if metrics.throughput_bps < FAIR_THROUGHPUT_BPS {
        next.compression_enabled = true;
        next.buffer_size = next.buffer_size.saturating_mul(2).min(MAX_BUFFER_SIZE);
    }

    next
}

/// Human-readable advice derived from the same thresholds
#[must_use]
pub fn suggestions(metrics: &StreamMetrics) -> Vec<String> {
    let mut out = Vec::new();

    match metrics.connection_quality {
        ConnectionQuality::Poor => out.push(
            "poor connection quality: reduce buffer size, flush more often, allow more retries"
                .to_string(),
        ),
        ConnectionQuality::Fair => {
            out.push("fair connection quality: reduce buffer size and flush interval".to_string());
        }
        ConnectionQuality::Excellent => out.push(
            "excellent connection quality: larger buffers and compression are safe".to_string(),
        ),
        ConnectionQuality::Good => {}
    }

    if metrics.latency_ms > FAIR_LATENCY_MS {
        out.push(format!(
            "high latency ({:.0} ms): shorten the flush interval",
            metrics.latency_ms
        ));
    }

    if metrics.throughput_bps < FAIR_THROUGHPUT_BPS {
        out.push(format!(
            "low throughput ({:.0} B/s): enable compression and increase buffer size",
            metrics.throughput_bps
        ));
    }

    if metrics.error_rate > 0.0 {
        out.push(format!(
            "connection needed retries (error rate {:.0}%): consider a longer timeout",
            metrics.error_rate * 100.0
        ));
    }

    if out.is_empty() {
        out.push(HEALTHY_NOTICE.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metrics(quality: ConnectionQuality, latency_ms: f64, throughput_bps: f64) -> StreamMetrics {
        StreamMetrics {
            latency_ms,
            throughput_bps,
            connection_quality: quality,
            ..Default::default()
        }
    }

    #[test]
    fn test_poor_halves_buffer_and_adds_retry() {
        let m = metrics(ConnectionQuality::Poor, 100.0, 50_000.0);
        let next = optimize(&m, &StreamConfig::default());
        assert_eq!(next.buffer_size, 4096);
        assert_eq!(next.flush_interval_ms, 50);
        assert_eq!(next.retry_attempts, 4);
        assert_eq!(next.timeout_ms, 45_000);
    }

    #[test]
    fn test_poor_respects_floors_and_caps() {
        let m = metrics(ConnectionQuality::Poor, 100.0, 50_000.0);
        let current = StreamConfig {
            buffer_size: 1500,
            retry_attempts: 5,
            timeout_ms: 50_000,
            ..Default::default()
        };
        let next = optimize(&m, &current);
        assert_eq!(next.buffer_size, 1024);
        assert_eq!(next.retry_attempts, 5);
        assert_eq!(next.timeout_ms, 60_000);
    }

    #[test]
    fn test_poor_with_extreme_config_clamps_without_overflow() {
        let m = metrics(ConnectionQuality::Poor, 3000.0, 100.0);
        let current = StreamConfig {
            buffer_size: usize::MAX,
            retry_attempts: u32::MAX,
            timeout_ms: u64::MAX,
            ..Default::default()
        };
        let next = optimize(&m, &current);
        assert_eq!(next.retry_attempts, MAX_RETRY_ATTEMPTS);
        assert_eq!(next.timeout_ms, MAX_TIMEOUT_MS);
        assert!(next.buffer_size >= MIN_POOR_BUFFER_SIZE);
    }

    #[test]
    fn test_fair_shrinks_by_fifth() {
        let m = metrics(ConnectionQuality::Fair, 100.0, 5_000.0);
        let next = optimize(&m, &StreamConfig::default());
        assert_eq!(next.buffer_size, 6553);
        assert_eq!(next.flush_interval_ms, 80);
        assert!(!next.compression_enabled);
    }

    #[test]
    fn test_excellent_grows_and_compresses() {
        let m = metrics(ConnectionQuality::Excellent, 10.0, 100_000.0);
        let next = optimize(&m, &StreamConfig::default());
        assert_eq!(next.buffer_size, 12_288);
        assert_eq!(next.flush_interval_ms, 120);
        assert!(next.compression_enabled);
    }

    #[test]
    fn test_good_is_unchanged() {
        let m = metrics(ConnectionQuality::Good, 600.0, 20_000.0);
        assert_eq!(optimize(&m, &StreamConfig::default()), StreamConfig::default());
        assert_eq!(suggestions(&m), vec![HEALTHY_NOTICE.to_string()]);
    }

    #[test]
    fn test_latency_rule_applies_after_tier() {
        // fair: 100 -> 80, then latency: 80 -> 40
        let m = metrics(ConnectionQuality::Fair, 1500.0, 5_000.0);
        let next = optimize(&m, &StreamConfig::default());
        assert_eq!(next.flush_interval_ms, 40);
    }

    #[test]
    fn test_low_throughput_doubles_buffer_after_tier() {
        // poor: 8192 -> 4096, then low throughput: 4096 -> 8192
        let m = metrics(ConnectionQuality::Poor, 100.0, 10.0);
        let next = optimize(&m, &StreamConfig::default());
        assert_eq!(next.buffer_size, 8192);
        assert!(next.compression_enabled);
    }

    #[test]
    fn test_suggestions_cover_crossed_thresholds() {
        let m = StreamMetrics {
            error_rate: 0.5,
            ..metrics(ConnectionQuality::Poor, 2500.0, 10.0)
        };
        let advice = suggestions(&m);
        assert_eq!(advice.len(), 4);
        assert!(advice.iter().all(|s| s != HEALTHY_NOTICE));
    }
}
