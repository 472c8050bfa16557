//! The parking sensor handler.
//!
//! [`ParkingHandler`] wires the per-kind handlers to the server's
//! [`Handler`] trait.

pub mod command;
pub mod image;
pub mod telemetry;

use std::sync::Arc;

use parksense_protocol::{Command, Reply};
use serde_json::{Map, Value};

use crate::handler::{ConnectionContext, Handler, HandlerFuture};
use crate::server::ServerConfig;
use crate::sink::{ConsoleSink, LogFileSink, TelemetrySink};
use crate::store::{DirImageStore, ImageStore};

use self::command::CommandHandler;
use self::image::ImageHandler;
use self::telemetry::TelemetryHandler;

/// Logs telemetry, stores images and answers commands.
pub struct ParkingHandler {
    telemetry: TelemetryHandler,
    images: ImageHandler,
    commands: CommandHandler,
    store: Arc<dyn ImageStore>,
}

impl ParkingHandler {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>, store: Arc<dyn ImageStore>) -> Self {
        Self {
            telemetry: TelemetryHandler::new(sinks),
            images: ImageHandler::new(Arc::clone(&store)),
            commands: CommandHandler,
            store,
        }
    }

    /// Builds the handler with the log-file sink, the optional console sink
    /// and a directory image store.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut sinks: Vec<Arc<dyn TelemetrySink>> =
            vec![Arc::new(LogFileSink::new(&config.log_file))];
        if config.console_telemetry {
            sinks.push(Arc::new(ConsoleSink));
        }

        Self::new(sinks, Arc::new(DirImageStore::new(&config.images_dir)))
    }
}

impl Handler for ParkingHandler {
    fn on_telemetry(
        &self,
        ctx: ConnectionContext,
        raw: String,
        fields: Map<String, Value>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.telemetry.handle(ctx.peer_addr, raw, fields).await;
        })
    }

    fn on_image(&self, ctx: ConnectionContext, payload: String) -> HandlerFuture<'_, Reply> {
        Box::pin(async move { self.images.handle(ctx.peer_addr, &payload).await })
    }

    fn on_command(&self, ctx: ConnectionContext, command: Command) -> HandlerFuture<'_, Reply> {
        Box::pin(async move { self.commands.handle(&command, &ctx.state) })
    }

    fn on_start(&self) -> HandlerFuture<'_> {
        Box::pin(async move {
            // Uploads fail individually with an error reply if this fails.
            if let Err(e) = self.store.prepare().await {
                tracing::warn!("failed to prepare image store: {e}");
            }
        })
    }
}
