//! Telemetry sinks.
//!
//! A sink receives every normalized reading. The log-file sink keeps the
//! durable record; the console sink mirrors readings to `tracing`.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Local};
use parksense_protocol::TelemetryEvent;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Time format of the log-file receipt column.
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A boxed future returned by sink methods.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Errors produced by telemetry sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One telemetry reading as received.
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    pub received_at: DateTime<Local>,
    pub peer_addr: SocketAddr,
    /// The JSON text exactly as the sensor sent it.
    pub raw: String,
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    pub fn new(peer_addr: SocketAddr, raw: String, fields: &Map<String, Value>) -> Self {
        Self {
            received_at: Local::now(),
            peer_addr,
            raw,
            event: TelemetryEvent::from_fields(fields),
        }
    }

    /// Formats the append-only log line, newline included:
    /// `<YYYY-MM-DD HH:MM:SS> | <peer-address> | <raw JSON>`.
    ///
    /// Line breaks inside the JSON are whitespace between tokens (strings
    /// cannot hold raw newlines), so folding them keeps one record per line
    /// without changing the JSON.
    pub fn log_line(&self) -> String {
        let json: String = self
            .raw
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        format!(
            "{} | {} | {}\n",
            self.received_at.format(LOG_TIME_FORMAT),
            self.peer_addr,
            json
        )
    }
}

/// Destination for normalized telemetry.
pub trait TelemetrySink: Send + Sync {
    /// Name used in log fields when the sink fails.
    fn name(&self) -> &'static str;

    fn record<'a>(&'a self, record: &'a TelemetryRecord) -> SinkFuture<'a>;
}

/// Appends one line per reading to a log file.
///
/// Appends are serialized so concurrent connections never interleave
/// partial lines. The file is opened per append and created on first use.
pub struct LogFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for LogFileSink {
    fn name(&self) -> &'static str {
        "log_file"
    }

    fn record<'a>(&'a self, record: &'a TelemetryRecord) -> SinkFuture<'a> {
        Box::pin(async move {
            let line = record.log_line();
            let _guard = self.lock.lock().await;

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

/// Mirrors readings to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn record<'a>(&'a self, record: &'a TelemetryRecord) -> SinkFuture<'a> {
        Box::pin(async move {
            let event = &record.event;
            tracing::info!(
                peer = %record.peer_addr,
                parking_id = %event.parking_id,
                status = event.status_label(),
                distance_cm = event.distance_cm,
                observed_at = %event.observed_at(record.received_at).format(LOG_TIME_FORMAT),
                timestamp_ms = event.timestamp_ms,
                "sensor reading"
            );
            Ok(())
        })
    }
}
