//! Terminal output for chunks and the final summary

use std::io::{self, Write};

use anyhow::Result;
use serde::Serialize;

use ingest_core::optimizer;
use ingest_core::{
    ConnectionId, StreamChunk, StreamConfig, StreamError, StreamMetrics, StreamReport,
};

/// How results are rendered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable text
    Text,
    /// One JSON object per line
    Json,
}

/// Everything printed after a stream completes
#[derive(Debug, Serialize)]
pub struct Summary {
    pub connection_id: String,
    pub metrics: StreamMetrics,
    pub report: StreamReport,
    pub recommended_config: StreamConfig,
    pub suggestions: Vec<String>,
}

impl Summary {
    pub fn new(
        id: ConnectionId,
        metrics: &StreamMetrics,
        config: &StreamConfig,
        report: StreamReport,
    ) -> Self {
        Self {
            connection_id: id.to_string(),
            metrics: metrics.clone(),
            report,
            recommended_config: optimizer::optimize(metrics, config),
            suggestions: optimizer::suggestions(metrics),
        }
    }
}

pub fn print_chunk(mode: OutputMode, chunk: &StreamChunk) -> Result<()> {
    let mut out = io::stdout().lock();
    match mode {
        OutputMode::Text => writeln!(out, "{}", chunk.data)?,
        OutputMode::Json => writeln!(out, "{}", serde_json::to_string(chunk)?)?,
    }
    Ok(())
}

pub fn print_summary(mode: OutputMode, summary: &Summary) -> Result<()> {
    let mut out = io::stdout().lock();
    match mode {
        OutputMode::Json => writeln!(out, "{}", serde_json::to_string(summary)?)?,
        OutputMode::Text => write!(out, "{}", render_summary(summary))?,
    }
    Ok(())
}

pub fn print_failure(
    mode: OutputMode,
    id: ConnectionId,
    error: &StreamError,
    report: &StreamReport,
) -> Result<()> {
    match mode {
        OutputMode::Json => {
            let value = serde_json::json!({
                "connection_id": id.to_string(),
                "error": error.to_string(),
                "report": report,
            });
            writeln!(io::stdout().lock(), "{value}")?;
        }
        OutputMode::Text => {
            writeln!(io::stderr().lock(), "stream {id} failed: {error}")?;
        }
    }
    Ok(())
}

fn render_summary(summary: &Summary) -> String {
    let m = &summary.metrics;
    let c = &summary.recommended_config;
    let mut text = String::new();

    text.push_str(&format!("\n── {} ──\n", summary.connection_id));
    text.push_str(&format!(
        "chunks: {}  bytes: {}  avg chunk: {:.1} B\n",
        m.chunks_processed, m.bytes_transferred, m.average_chunk_size
    ));
    text.push_str(&format!(
        "throughput: {:.0} B/s  latency: {:.1} ms  error rate: {:.2}  quality: {}\n",
        m.throughput_bps, m.latency_ms, m.error_rate, m.connection_quality
    ));

    text.push_str("\nrecommended config:\n");
    text.push_str(&format!(
        "  buffer_size={} flush_interval_ms={} retry_attempts={} timeout_ms={} compression={}\n",
        c.buffer_size, c.flush_interval_ms, c.retry_attempts, c.timeout_ms, c.compression_enabled
    ));

    text.push_str("\nsuggestions:\n");
    for s in &summary.suggestions {
        text.push_str(&format!("  - {s}\n"));
    }

    text.push_str(&format!(
        "\nmanager: {} registered, {} active\n",
        summary.report.total_connections, summary.report.active_connections
    ));
    for r in &summary.report.recommendations {
        text.push_str(&format!("  - {r}\n"));
    }
    text
}
