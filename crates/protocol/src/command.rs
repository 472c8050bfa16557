//! Control command vocabulary.

use std::fmt;

/// A command sent as `COMMAND:<token>`.
///
/// The vocabulary is closed: any token other than the known ones is kept as
/// [`Command::Unknown`] and answered with `unknown_command`, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Server status and connection count.
    Status,
    /// Liveness check.
    Ping,
    Unknown(String),
}

impl Command {
    /// Parses a command token. Matching is exact and case-sensitive after
    /// trimming surrounding whitespace.
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "STATUS" => Command::Status,
            "PING" => Command::Ping,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Status => "STATUS",
            Command::Ping => "PING",
            Command::Unknown(token) => token,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
