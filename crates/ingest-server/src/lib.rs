//! TCP ingest server for ParkSense parking sensors.
//!
//! Accepts any number of sensor connections, reads messages from each on
//! its own task, classifies them with [`parksense_protocol::Message`] and
//! dispatches them to a [`Handler`]. Image uploads and commands are
//! answered on the same socket; telemetry and plain text are not.

mod connection;
mod handler;
pub mod handlers;
mod server;
mod sink;
mod state;
mod store;

pub use handler::{ConnectionContext, Handler, HandlerFuture};
pub use handlers::ParkingHandler;
pub use server::{Framing, IngestServer, ServerConfig};
pub use sink::{ConsoleSink, LogFileSink, SinkError, SinkFuture, TelemetryRecord, TelemetrySink};
pub use state::{ConnectionGuard, ServerInfo, ServerState};
pub use store::{DirImageStore, ImageStore, StoreError, StoreFuture};

use std::time::Duration;

use parksense_protocol::ProtocolError;

/// Pending-connection queue length for the listening socket.
///
/// Sensors connect rarely and stay connected, so a handful is plenty.
pub const LISTEN_BACKLOG: u32 = 5;

/// Read size in legacy chunk framing (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default image directory.
pub const DEFAULT_IMAGES_DIR: &str = "parking_images";

/// Default telemetry log file.
pub const DEFAULT_LOG_FILE: &str = "parking_sensor.log";

/// Errors produced by the ingest server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve listen address {0}")]
    InvalidAddress(String),

    #[error("server already running")]
    AlreadyRunning,

    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),
}
