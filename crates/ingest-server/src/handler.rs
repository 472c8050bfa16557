//! Handler trait for processing sensor messages.
//!
//! Implementors provide the side effects (logging telemetry, storing
//! images, answering commands) while the server handles sockets, framing
//! and the connection lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use parksense_protocol::{Command, Message, Reply};
use serde_json::{Map, Value};

use crate::state::ServerState;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a, T = ()> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler knows about the connection a message arrived on.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub peer_addr: SocketAddr,
    pub state: Arc<ServerState>,
}

/// Trait for handling classified sensor messages.
///
/// The reply-bearing kinds return a [`Reply`] rather than a `Result`: a
/// handler turns its own failures into `Reply::Error`, so nothing a handler
/// does can end the connection.
pub trait Handler: Send + Sync + 'static {
    /// Called for a JSON telemetry object. Never answered.
    fn on_telemetry(
        &self,
        ctx: ConnectionContext,
        raw: String,
        fields: Map<String, Value>,
    ) -> HandlerFuture<'_>;

    /// Called for an `IMAGE:` upload with its base64 text.
    fn on_image(&self, ctx: ConnectionContext, payload: String) -> HandlerFuture<'_, Reply>;

    /// Called for a `COMMAND:` message.
    fn on_command(&self, ctx: ConnectionContext, command: Command) -> HandlerFuture<'_, Reply>;

    /// Called for anything else. Never answered.
    fn on_plain_text(&self, ctx: ConnectionContext, text: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::info!(peer = %ctx.peer_addr, %text, "plain text message");
        })
    }

    /// Called once before the server binds, to prepare storage.
    fn on_start(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}

/// Routes one message to the matching handler method.
///
/// Returns the reply to write back, if the message kind expects one.
pub(crate) async fn dispatch<H: Handler + ?Sized>(
    handler: &H,
    ctx: &ConnectionContext,
    message: Message,
) -> Option<Reply> {
    match message {
        Message::Telemetry { raw, fields } => {
            handler.on_telemetry(ctx.clone(), raw, fields).await;
            None
        }
        Message::ImageUpload(payload) => Some(handler.on_image(ctx.clone(), payload).await),
        Message::Command(token) => {
            Some(handler.on_command(ctx.clone(), Command::parse(&token)).await)
        }
        Message::PlainText(text) => {
            handler.on_plain_text(ctx.clone(), text).await;
            None
        }
    }
}
