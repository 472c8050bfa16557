//! Wire protocol for the ParkSense sensor ingest endpoint.
//!
//! A parking sensor multiplexes three message kinds over one TCP stream:
//! raw JSON telemetry, `IMAGE:`-prefixed base64 uploads and
//! `COMMAND:`-prefixed control commands. This crate owns framing,
//! classification and the reply shapes; sockets and side effects live in
//! the server crate.

pub mod command;
pub mod constants;
pub mod error;
pub mod frame;
pub mod image;
pub mod message;
pub mod reply;
pub mod telemetry;

pub use command::Command;
pub use error::ProtocolError;
pub use message::Message;
pub use reply::Reply;
pub use telemetry::{ParkingId, TelemetryEvent};
