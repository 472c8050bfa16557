//! Message classification.
//!
//! Sensors do not tag their messages. The kind is sniffed from the text:
//! two fixed prefixes select the control kinds, and anything that parses as
//! a JSON object is telemetry. Everything else is plain text.

use serde_json::{Map, Value};

use crate::constants::{COMMAND_PREFIX, IMAGE_PREFIX};

/// A classified sensor message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Occupancy reading. `raw` is the text as received, `fields` its parsed
    /// object. No reply is sent.
    Telemetry {
        raw: String,
        fields: Map<String, Value>,
    },
    /// Base64 text following `IMAGE:`. May be empty.
    ImageUpload(String),
    /// Command token following `COMMAND:`. May be empty.
    Command(String),
    /// Anything else. No reply is sent.
    PlainText(String),
}

impl Message {
    /// Classifies a raw frame payload.
    ///
    /// The bytes are decoded as UTF-8 with invalid sequences replaced, then
    /// trimmed, so a sensor that appends `\r\n` is handled the same as one
    /// that does not.
    pub fn classify(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        Self::from_text(text.trim())
    }

    /// Classifies already-decoded text.
    pub fn from_text(text: &str) -> Self {
        if let Some(payload) = text.strip_prefix(IMAGE_PREFIX) {
            return Message::ImageUpload(payload.to_string());
        }
        if let Some(payload) = text.strip_prefix(COMMAND_PREFIX) {
            return Message::Command(payload.to_string());
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => Message::Telemetry {
                raw: text.to_string(),
                fields,
            },
            _ => Message::PlainText(text.to_string()),
        }
    }

    /// Returns `true` for kinds answered on the same connection.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Message::ImageUpload(_) | Message::Command(_))
    }

    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Telemetry { .. } => "telemetry",
            Message::ImageUpload(_) => "image",
            Message::Command(_) => "command",
            Message::PlainText(_) => "text",
        }
    }
}
