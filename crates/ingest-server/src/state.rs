//! Process-wide server state.
//!
//! The only values shared between connection tasks: the running flag and
//! the connection counter. Everything else a connection touches is local
//! to its task.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Shared lifecycle state of one [`IngestServer`](crate::IngestServer).
#[derive(Debug)]
pub struct ServerState {
    host: String,
    port: AtomicU16,
    images_dir: PathBuf,
    running: AtomicBool,
    active: AtomicUsize,
    started_at: Instant,
}

/// Point-in-time view of the server, for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub running: bool,
    pub clients: usize,
    pub images_dir: PathBuf,
}

impl ServerState {
    pub fn new(host: impl Into<String>, port: u16, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port: AtomicU16::new(port),
            images_dir: images_dir.into(),
            running: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Configured port, replaced by the bound port once listening.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    pub(crate) fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Marks the server as running. Returns `false` if it already was.
    pub(crate) fn start(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Number of sensor connections currently open.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Counts a new connection until the returned guard is dropped.
    pub fn connection_opened(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            state: Arc::clone(self),
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            host: self.host.clone(),
            port: self.port(),
            running: self.is_running(),
            clients: self.active_connections(),
            images_dir: self.images_dir.clone(),
        }
    }
}

/// Keeps one connection counted in [`ServerState`].
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<ServerState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}
