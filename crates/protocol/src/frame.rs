//! Length-prefixed framing, used when the server runs with
//! `framing = "length_prefixed"`. The default sensor protocol is unframed.
//!
//! # Wire format
//!
//! ```text
//! MESSAGE (Sensor -> Server): [4 bytes BE: payload_len][payload_len bytes: payload]
//! REPLY   (Server -> Sensor): [4 bytes BE: payload_len][payload_len bytes: JSON]
//! ```
//!
//! A clean EOF between frames ends the stream. An EOF inside a header or a
//! payload is a truncation. A zero-length frame is a valid, empty message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::FRAME_HEADER_LEN;
use crate::error::ProtocolError;

/// Reads one frame from the stream.
///
/// Returns `None` if the peer closed the stream on a frame boundary.
/// Frames longer than `max_len` are rejected before any payload is read.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: FRAME_HEADER_LEN,
                got: filled,
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = reader.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated { expected: len, got });
        }
        got += n;
    }

    Ok(Some(payload))
}

/// Writes one frame and flushes the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let len = header_len(payload.len())?;

    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes a frame into a buffer, for clients that batch their writes.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = header_len(payload.len())?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Checks that a payload length fits the 32-bit header.
fn header_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })
}
