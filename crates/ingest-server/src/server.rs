//! Ingest TCP server.
//!
//! Listens on the configured address and serves every sensor connection
//! on its own task until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parksense_protocol::constants::{DEFAULT_HOST, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection;
use crate::handler::{ConnectionContext, Handler};
use crate::state::ServerState;
use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_IMAGES_DIR, DEFAULT_LOG_FILE, LISTEN_BACKLOG, ServerError,
};

/// Delay before accepting again after a failed `accept`, so a persistent
/// error such as descriptor exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How message boundaries are found on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One socket read of up to `chunk_size` bytes is one message; replies
    /// are written as bare JSON. This is what sensor firmware speaks.
    #[default]
    Chunk,
    /// `[4 bytes BE length][payload]` in both directions. Opt-in for
    /// clients that need message boundaries independent of reads.
    LengthPrefixed,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    pub images_dir: PathBuf,
    pub log_file: PathBuf,
    /// Mirror telemetry to the tracing output.
    pub console_telemetry: bool,
    pub framing: Framing,
    /// Read size in [`Framing::Chunk`] mode.
    pub chunk_size: usize,
    /// Largest accepted frame in [`Framing::LengthPrefixed`] mode.
    pub max_frame_size: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            images_dir: DEFAULT_IMAGES_DIR.into(),
            log_file: DEFAULT_LOG_FILE.into(),
            console_telemetry: true,
            framing: Framing::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            idle_timeout: None,
        }
    }
}

/// The sensor ingest server.
///
/// Accepts any number of concurrent connections and dispatches their
/// messages to the provided [`Handler`].
pub struct IngestServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    state: Arc<ServerState>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> IngestServer<H> {
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        let state = ServerState::new(config.host.clone(), config.port, config.images_dir.clone());
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting connections and asks open connections to close.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Fails only if the server is already running or the listening
    /// socket cannot be bound.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if !self.state.start() {
            return Err(ServerError::AlreadyRunning);
        }

        let result = self.accept_loop().await;
        self.state.stop();
        result
    }

    async fn accept_loop(self: &Arc<Self>) -> Result<(), ServerError> {
        self.handler.on_start().await;

        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        self.state.set_port(local_addr.port());
        tracing::info!(
            %local_addr,
            framing = ?self.config.framing,
            images_dir = %self.config.images_dir.display(),
            log_file = %self.config.log_file.display(),
            "ingest server listening"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                            self.accept_backoff().await;
                        }
                    }
                }
            }
        }
    }

    /// Waits [`ACCEPT_ERROR_BACKOFF`], returning early on shutdown.
    async fn accept_backoff(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
        }
    }

    /// Binds the listening socket with address reuse and a short backlog.
    async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr_text = format!("{}:{}", self.config.host, self.config.port);
        let bind_err = |source: std::io::Error| ServerError::Bind {
            addr: addr_text.clone(),
            source,
        };

        let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| ServerError::InvalidAddress(addr_text.clone()))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let guard = self.state.connection_opened();
        tracing::info!(
            %peer_addr,
            clients = self.state.active_connections(),
            "sensor connected"
        );

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let ctx = ConnectionContext {
                peer_addr,
                state: Arc::clone(&server.state),
            };

            let result = connection::serve(
                reader,
                writer,
                ctx,
                Arc::clone(&server.handler),
                &server.config,
                server.cancel.clone(),
            )
            .await;
            drop(guard);

            match result {
                Ok(()) => tracing::info!(
                    %peer_addr,
                    clients = server.state.active_connections(),
                    "sensor disconnected"
                ),
                Err(e) => tracing::warn!(
                    %peer_addr,
                    clients = server.state.active_connections(),
                    "connection closed: {e}"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ParkingHandler;
    use parksense_protocol::frame::{read_frame, write_frame};
    use parksense_protocol::image::encode_image_payload;
    use serde_json::Value;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    type Server = Arc<IngestServer<ParkingHandler>>;

    fn test_config(dir: &Path) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            images_dir: dir.join("parking_images"),
            log_file: dir.join("parking_sensor.log"),
            console_telemetry: false,
            framing: Framing::LengthPrefixed,
            ..ServerConfig::default()
        }
    }

    /// Configuration speaking the bare sensor protocol: raw text in, bare
    /// JSON out.
    fn raw_config(dir: &Path) -> ServerConfig {
        ServerConfig {
            framing: Framing::default(),
            ..test_config(dir)
        }
    }

    async fn start(config: ServerConfig) -> (Server, SocketAddr, JoinHandle<Result<(), ServerError>>) {
        let server = IngestServer::new(config.clone(), ParkingHandler::from_config(&config));
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });

        for _ in 0..200 {
            if let Some(addr) = server.local_addr().await {
                return (server, addr, task);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    async fn send(stream: &mut TcpStream, payload: &[u8]) {
        write_frame(stream, payload).await.unwrap();
    }

    async fn request(stream: &mut TcpStream, payload: &[u8]) -> Value {
        send(stream, payload).await;
        let reply = read_frame(stream, DEFAULT_MAX_FRAME_SIZE).await.unwrap().unwrap();
        serde_json::from_slice(&reply).unwrap()
    }

    fn log_lines(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("parking_sensor.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn telemetry_is_logged_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let raw = r#"{"parkingId":1,"occupied":true,"distance":12.5,"timestamp":1700000000000}"#;
        send(&mut stream, raw.as_bytes()).await;
        // The next reply proves the telemetry was handled and unanswered.
        let reply = request(&mut stream, b"COMMAND:PING").await;
        assert_eq!(reply, serde_json::json!({ "status": "pong" }));

        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 1);
        let parts: Vec<&str> = lines[0].splitn(3, " | ").collect();
        assert_eq!(parts[1], stream.local_addr().unwrap().to_string());
        assert_eq!(parts[2], raw);

        server.shutdown();
    }

    #[tokio::test]
    async fn image_upload_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let bytes: Vec<u8> = (0..100u8).map(|b| b.wrapping_mul(7)).collect();
        let payload = format!("IMAGE:{}", encode_image_payload(&bytes));
        let reply = request(&mut stream, payload.as_bytes()).await;

        assert_eq!(reply["status"], "success");
        assert_eq!(reply["size"], 100);
        let filename = reply["filename"].as_str().unwrap();
        assert!(filename.starts_with("parking_"));
        assert!(filename.ends_with("_127.0.0.1.jpg"));

        let stored = std::fs::read(dir.path().join("parking_images").join(filename)).unwrap();
        assert_eq!(stored, bytes);

        server.shutdown();
    }

    #[tokio::test]
    async fn invalid_image_keeps_connection_usable() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = request(&mut stream, b"IMAGE:not base64!").await;
        assert_eq!(reply["status"], "error");
        assert!(reply["message"].as_str().is_some_and(|m| !m.is_empty()));

        let images = std::fs::read_dir(dir.path().join("parking_images")).unwrap();
        assert_eq!(images.count(), 0);

        let reply = request(&mut stream, b"COMMAND:PING").await;
        assert_eq!(reply["status"], "pong");

        server.shutdown();
    }

    #[tokio::test]
    async fn status_reports_connections_and_uptime() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut first, b"COMMAND:PING").await["status"], "pong");
        let mut second = TcpStream::connect(addr).await.unwrap();

        let reply = request(&mut second, b"COMMAND:STATUS").await;
        assert_eq!(reply["status"], "running");
        assert_eq!(reply["clients_connected"], 2);
        assert!(reply["uptime"].is_u64());

        server.shutdown();
    }

    #[tokio::test]
    async fn unknown_command_reply() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = request(&mut stream, b"COMMAND:FOO").await;
        assert_eq!(reply, serde_json::json!({ "status": "unknown_command" }));

        server.shutdown();
    }

    #[tokio::test]
    async fn interleaved_connections_write_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        for i in 0..20 {
            send(&mut a, format!(r#"{{"parkingId":1,"seq":{i}}}"#).as_bytes()).await;
            send(&mut b, format!(r#"{{"parkingId":2,"seq":{i}}}"#).as_bytes()).await;
        }
        assert_eq!(request(&mut a, b"COMMAND:PING").await["status"], "pong");
        assert_eq!(request(&mut b, b"COMMAND:PING").await["status"], "pong");

        let lines = log_lines(dir.path());
        assert_eq!(lines.len(), 40);
        for line in &lines {
            let json = line.splitn(3, " | ").nth(2).unwrap();
            assert!(serde_json::from_str::<Value>(json).is_ok(), "corrupt line: {line}");
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn plain_text_is_not_answered() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        send(&mut stream, b"hello sensor").await;
        send(&mut stream, b"[1,2,3]").await;
        let reply = request(&mut stream, b"COMMAND:PING").await;
        assert_eq!(reply["status"], "pong");
        assert!(log_lines(dir.path()).is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn closed_connections_are_uncounted() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(test_config(dir.path())).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        assert_eq!(request(&mut stream, b"COMMAND:STATUS").await["clients_connected"], 1);
        drop(stream);

        for _ in 0..200 {
            if server.state().active_connections() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.state().active_connections(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, task) = start(test_config(dir.path())).await;
        assert!(server.state().is_running());
        assert_eq!(server.port().await, addr.port());
        assert_eq!(server.state().info().port, addr.port());

        server.shutdown();
        task.await.unwrap().unwrap();

        assert!(!server.state().is_running());
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _addr, _task) = start(test_config(dir.path())).await;

        let result = server.run().await;
        assert!(matches!(result, Err(ServerError::AlreadyRunning)));

        server.shutdown();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..test_config(dir.path())
        };

        let server = IngestServer::new(config.clone(), ParkingHandler::from_config(&config));
        let result = server.run().await;

        match result {
            Err(ServerError::Bind { addr, .. }) => {
                assert_eq!(addr, format!("127.0.0.1:{}", config.port));
            }
            other => panic!("expected bind error, got {other:?}"),
        }
        assert!(!server.state().is_running());
    }

    /// Writes bare bytes and reads until a whole JSON reply has arrived.
    async fn raw_request(stream: &mut TcpStream, payload: &[u8]) -> Value {
        stream.write_all(payload).await.unwrap();

        let mut reply = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before a reply");
            reply.extend_from_slice(&buf[..n]);
            if let Ok(value) = serde_json::from_slice(&reply) {
                return value;
            }
        }
    }

    async fn wait_for_log_lines(dir: &Path, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let lines = log_lines(dir);
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log_lines(dir)
    }

    #[test]
    fn default_framing_is_raw() {
        assert_eq!(ServerConfig::default().framing, Framing::Chunk);
    }

    #[tokio::test]
    async fn raw_telemetry_is_logged_and_connection_stays_open() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(raw_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let raw = r#"{"parkingId":1,"occupied":true,"distance":12.5,"timestamp":1700000000000}"#;
        stream.write_all(format!("{raw}\r\n").as_bytes()).await.unwrap();

        let lines = wait_for_log_lines(dir.path(), 1).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].splitn(3, " | ").nth(2), Some(raw));

        // No reply, and the socket is still open.
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
        assert!(read.is_err(), "unexpected data or close: {read:?}");

        let reply = raw_request(&mut stream, b"COMMAND:STATUS").await;
        assert_eq!(reply["status"], "running");
        assert_eq!(reply["clients_connected"], 1);
        assert_eq!(log_lines(dir.path()).len(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn raw_image_upload_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(raw_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let bytes: Vec<u8> = (0..100u8).map(|b| b.wrapping_mul(13)).collect();
        let payload = format!("IMAGE:{}", encode_image_payload(&bytes));
        let reply = raw_request(&mut stream, payload.as_bytes()).await;

        assert_eq!(reply["status"], "success");
        assert_eq!(reply["size"], 100);
        let filename = reply["filename"].as_str().unwrap();
        let stored = std::fs::read(dir.path().join("parking_images").join(filename)).unwrap();
        assert_eq!(stored, bytes);

        server.shutdown();
    }

    #[tokio::test]
    async fn raw_invalid_image_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(raw_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = raw_request(&mut stream, b"IMAGE:not-valid-base64!!").await;
        assert_eq!(reply["status"], "error");
        let images = std::fs::read_dir(dir.path().join("parking_images")).unwrap();
        assert_eq!(images.count(), 0);

        let reply = raw_request(&mut stream, b"COMMAND:STATUS").await;
        assert_eq!(reply["status"], "running");

        server.shutdown();
    }

    #[tokio::test]
    async fn raw_ping_reply_is_bare_json() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr, _task) = start(raw_config(dir.path())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"COMMAND:PING").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], br#"{"status":"pong"}"#);

        server.shutdown();
    }

    #[tokio::test]
    async fn accept_backoff_waits_unless_shutting_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let server = IngestServer::new(config.clone(), ParkingHandler::from_config(&config));

        let started = std::time::Instant::now();
        server.accept_backoff().await;
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF / 2);

        server.shutdown();
        let started = std::time::Instant::now();
        server.accept_backoff().await;
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            max_frame_size: 16,
            ..test_config(dir.path())
        };
        let (server, addr, _task) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&1000u32.to_be_bytes()).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        server.shutdown();
    }

    #[tokio::test]
    async fn idle_connection_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..test_config(dir.path())
        };
        let (server, addr, _task) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        server.shutdown();
    }
}
