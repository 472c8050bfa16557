//! Protocol constants shared by the server and sensor clients.

/// Prefix that marks an image upload.
pub const IMAGE_PREFIX: &str = "IMAGE:";

/// Prefix that marks a control command.
pub const COMMAND_PREFIX: &str = "COMMAND:";

/// Default bind host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Size of the big-endian length header preceding each frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default upper bound on a single frame payload (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Rendered in place of a missing or unusable parking id.
pub const UNASSIGNED_PARKING_ID: &str = "N/A";
