//! Port handshake published to the coordinator at startup.

use crate::error::PullError;

/// The bound port as a big-endian 32-bit integer.
pub fn serialize_meta(port: u16) -> [u8; 4] {
    i32::from(port).to_be_bytes()
}

pub fn deserialize_meta(meta: &[u8]) -> Result<u16, PullError> {
    let raw: [u8; 4] = meta
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| PullError::Metadata(format!("expected 4 bytes, got {}", meta.len())))?;
    let port = i32::from_be_bytes(raw);
    u16::try_from(port).map_err(|_| PullError::Metadata(format!("port {} out of range", port)))
}
