//! Control commands.

use parksense_protocol::{Command, Reply};

use crate::state::ServerState;

/// Answers `COMMAND:` messages from server state.
#[derive(Debug, Default)]
pub struct CommandHandler;

impl CommandHandler {
    pub fn handle(&self, command: &Command, state: &ServerState) -> Reply {
        match command {
            Command::Status => Reply::Running {
                clients_connected: state.active_connections(),
                uptime: state.uptime().as_secs(),
            },
            Command::Ping => Reply::Pong,
            Command::Unknown(token) => {
                tracing::debug!(%token, "unknown command");
                Reply::UnknownCommand
            }
        }
    }
}
