//! Image upload payloads.
//!
//! Images travel as standard base64 after the `IMAGE:` prefix. The server
//! picks the stored name from the receipt time and the sender's address.

use std::net::IpAddr;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeZone};

use crate::error::ProtocolError;

/// Prefix of every stored image name.
pub const IMAGE_FILE_PREFIX: &str = "parking_";

/// Extension of every stored image name.
pub const IMAGE_FILE_EXTENSION: &str = "jpg";

/// Decodes the base64 text of an upload.
///
/// ASCII whitespace is ignored so line-wrapped encoders are accepted.
/// Anything else outside the standard alphabet, or bad padding, is an error.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, ProtocolError> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }

    Ok(STANDARD.decode(compact.as_bytes())?)
}

/// Encodes raw image bytes for upload.
pub fn encode_image_payload(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Builds the stored name: `parking_<YYYYMMDD_HHMMSS>_<peer-ip>.jpg`.
///
/// Names have one-second resolution, so two uploads from the same peer in
/// the same second map to the same name and the later one wins.
/// IPv6 colons are replaced with dashes to keep the name portable.
pub fn image_filename<Tz>(received_at: &DateTime<Tz>, peer_ip: IpAddr) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let ip = peer_ip.to_canonical().to_string().replace(':', "-");
    format!(
        "{IMAGE_FILE_PREFIX}{}_{ip}.{IMAGE_FILE_EXTENSION}",
        received_at.format("%Y%m%d_%H%M%S")
    )
}
