//! Error types for the wire protocol.

/// Errors produced while framing or decoding sensor messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("empty image payload")]
    EmptyPayload,

    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}
