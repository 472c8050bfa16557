//! Per-connection read loop.
//!
//! Reads one message at a time, dispatches it and writes the reply, if
//! any, before reading the next. The loop ends on EOF, a read or framing
//! error, a failed reply write, the idle timeout, or shutdown.

use std::sync::Arc;

use parksense_protocol::frame::{read_frame, write_frame};
use parksense_protocol::{Message, Reply};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::handler::{self, ConnectionContext, Handler};
use crate::server::{Framing, ServerConfig};

/// Serves one sensor connection until it closes.
///
/// Returns `Ok(())` on a clean close (EOF or shutdown). Cancellation is
/// checked between messages; a read already waiting is not interrupted
/// except by the idle timeout.
pub(crate) async fn serve<R, W, H>(
    mut reader: R,
    mut writer: W,
    ctx: ConnectionContext,
    handler: Arc<H>,
    config: &ServerConfig,
    cancel: CancellationToken,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Handler + ?Sized,
{
    let peer_addr = ctx.peer_addr;
    let mut source = MessageSource::new(config);

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(%peer_addr, "connection closing for shutdown");
            return Ok(());
        }

        let data = match config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, source.next(&mut reader))
                .await
                .map_err(|_| ServerError::IdleTimeout(limit))??,
            None => source.next(&mut reader).await?,
        };

        let Some(data) = data else {
            tracing::debug!(%peer_addr, "peer closed connection");
            return Ok(());
        };

        let message = Message::classify(&data);
        tracing::debug!(
            %peer_addr,
            kind = message.kind(),
            len = data.len(),
            reply = message.expects_reply(),
            "message received"
        );

        if let Some(reply) = handler::dispatch(handler.as_ref(), &ctx, message).await {
            write_reply(&mut writer, config.framing, &reply).await?;
        }
    }
}

/// Splits the byte stream into messages according to the framing mode.
struct MessageSource {
    framing: Framing,
    max_frame_size: usize,
    chunk: Vec<u8>,
}

impl MessageSource {
    fn new(config: &ServerConfig) -> Self {
        let chunk = match config.framing {
            Framing::Chunk => vec![0u8; config.chunk_size.max(1)],
            Framing::LengthPrefixed => Vec::new(),
        };
        Self {
            framing: config.framing,
            max_frame_size: config.max_frame_size,
            chunk,
        }
    }

    /// Returns the next message, or `None` at end of stream.
    async fn next<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Vec<u8>>, ServerError> {
        match self.framing {
            Framing::LengthPrefixed => Ok(read_frame(reader, self.max_frame_size).await?),
            Framing::Chunk => {
                let n = reader.read(&mut self.chunk).await?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(self.chunk[..n].to_vec()))
            }
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    framing: Framing,
    reply: &Reply,
) -> Result<(), ServerError> {
    let json = reply.to_json()?;
    match framing {
        Framing::LengthPrefixed => write_frame(writer, &json).await?,
        Framing::Chunk => {
            writer.write_all(&json).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}
