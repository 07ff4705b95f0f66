//! Stream Ingest - Command-Line Host
//!
//! Opens a single event stream, prints every decoded chunk, and finishes with
//! the connection's metrics, the manager report, and a recommended config for
//! the next run.
//!
//! # Usage
//!
//! ```bash
//! # Stream with defaults
//! stream-ingest http://localhost:8080/v1/stream
//!
//! # Tune the transport
//! stream-ingest http://localhost:8080/v1/stream --buffer-size 4096 --retry-attempts 5
//!
//! # Turn off compression set in the config file
//! stream-ingest http://localhost:8080/v1/stream --compression=false
//!
//! # Machine-readable output
//! stream-ingest http://localhost:8080/v1/stream --json
//!
//! # Verbose logging
//! RUST_LOG=debug stream-ingest http://localhost:8080/v1/stream
//! ```
//!
//! # Configuration
//!
//! Settings are layered: defaults, then `$XDG_CONFIG_HOME/stream-ingest/ingest.toml`
//! (or `--config`), then `INGEST_*` environment variables, then flags.
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): close the stream and print the summary

mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ingest_core::{
    load_config_from_path, ConfigOverrides, HttpSource, StreamEvent, StreamManager,
};

use output::{OutputMode, Summary};

/// Stream Ingest - open an event stream and report on its delivery
#[derive(Parser, Debug)]
#[command(name = "stream-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Endpoint to stream from
    url: String,

    /// Read buffer size hint in bytes
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Mandatory yield interval in milliseconds
    #[arg(long, value_name = "MS")]
    flush_interval: Option<u64>,

    /// Retries after the first failed open
    #[arg(long, value_name = "N")]
    retry_attempts: Option<u32>,

    /// Per-attempt open timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Bytes after which reads are paused briefly
    #[arg(long, value_name = "BYTES")]
    backpressure_threshold: Option<u64>,

    /// Request a compressed stream (`--compression` or `--compression=false`)
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    compression: Option<bool>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "INGEST_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print chunks and the summary as JSON lines
    #[arg(long)]
    json: bool,

    /// Only print the summary
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "INGEST_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(bytes) = self.buffer_size {
            overrides = overrides.with_buffer_size(bytes);
        }
        if let Some(ms) = self.flush_interval {
            overrides = overrides.with_flush_interval_ms(ms);
        }
        if let Some(n) = self.retry_attempts {
            overrides = overrides.with_retry_attempts(n);
        }
        if let Some(ms) = self.timeout_ms {
            overrides = overrides.with_timeout_ms(ms);
        }
        if let Some(bytes) = self.backpressure_threshold {
            overrides = overrides.with_backpressure_threshold(bytes);
        }
        if let Some(enabled) = self.compression {
            overrides = overrides.with_compression(enabled);
        }
        overrides
    }

    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

/// Initialize logging on stderr so stdout stays clean for chunk output
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ingest_cli={level},ingest_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = load_config_from_path(args.config.clone())
        .context("Failed to load configuration")?;
    config.apply_overrides(&args.overrides());
    info!(source = %config.source(), "Configuration loaded");

    let stream_config = config.stream.clone();
    let manager = StreamManager::with_config(Arc::new(HttpSource::new()), config);
    let mut handle = manager
        .create(&args.url, &ConfigOverrides::new())
        .context("Failed to create stream")?;
    let id = handle.id();
    info!(connection_id = %id, url = %args.url, "Streaming");

    let mode = args.output_mode();
    let mut interrupted = false;
    let result = loop {
        let event = tokio::select! {
            event = handle.next() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted, closing stream");
                interrupted = true;
                manager.close_all();
                continue;
            }
        };

        match event {
            Some(StreamEvent::Chunk(chunk)) => {
                if !args.quiet {
                    output::print_chunk(mode, &chunk)?;
                }
            }
            Some(StreamEvent::Complete(metrics)) => break Ok(metrics),
            Some(StreamEvent::Error(error)) => break Err(error),
            None => break Err(ingest_core::StreamError::Read(
                "stream ended without a final report".to_string(),
            )),
        }
    };

    match result {
        Ok(metrics) => {
            let summary = Summary::new(id, &metrics, &stream_config, manager.report());
            output::print_summary(mode, &summary)?;
            Ok(())
        }
        Err(error) => {
            output::print_failure(mode, id, &error, &manager.report())?;
            anyhow::bail!("Stream {id} failed: {error}")
        }
    }
}
