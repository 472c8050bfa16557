//! Replies written back to the sensor.
//!
//! Every reply is a JSON object tagged by its `status` field:
//!
//! ```text
//! {"status":"success","message":"...","filename":"...","size":100}
//! {"status":"error","message":"..."}
//! {"status":"running","clients_connected":1,"uptime":42}
//! {"status":"pong"}
//! {"status":"unknown_command"}
//! ```

use serde::{Deserialize, Serialize};

/// Message sent with a successful image upload.
pub const IMAGE_RECEIVED_MESSAGE: &str = "image received";

/// A synchronous reply to an image upload or a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// Image decoded and stored.
    Success {
        message: String,
        filename: String,
        size: usize,
    },
    /// Image rejected (bad encoding or storage failure).
    Error { message: String },
    /// Answer to `STATUS`. `uptime` is in whole seconds.
    Running { clients_connected: usize, uptime: u64 },
    Pong,
    UnknownCommand,
}

impl Reply {
    /// Acknowledges a stored image.
    pub fn image_saved(filename: impl Into<String>, size: usize) -> Self {
        Reply::Success {
            message: IMAGE_RECEIVED_MESSAGE.into(),
            filename: filename.into(),
            size,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }

    /// Returns `true` for the error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// Serializes the reply as compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
