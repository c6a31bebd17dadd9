//! `CORE` chunk payload framing (§3.2): the routing prefix that lets a
//! reader resolve a block's track without touching the (opaque, possibly
//! encrypted/compressed) blob that follows it.
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic      = b"H4TB"
//!    4      2   track_id   LE u16
//!    6      2   reserved   = 0
//!    8      N   opaque_blob
//! ```

use thiserror::Error;

pub const CORE_MAGIC: &[u8; 4] = b"H4TB";
pub const CORE_PREFIX_SIZE: usize = 4 + 2 + 2;

#[derive(Error, Debug)]
pub enum CoreChunkError {
    #[error("CORE payload of {0} bytes is shorter than the {CORE_PREFIX_SIZE}-byte H4TB prefix")]
    Truncated(usize),
    #[error("CORE payload does not begin with the H4TB magic")]
    BadMagic,
}

/// Wrap an opaque blob with the `H4TB || track_id || reserved` prefix.
pub fn wrap_core_payload(track_id: u16, blob: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CORE_PREFIX_SIZE + blob.len());
    out.extend_from_slice(CORE_MAGIC);
    out.extend_from_slice(&track_id.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(blob);
    out
}

/// Split a `CORE` chunk payload into `(track_id, blob)`.
pub fn unwrap_core_payload(payload: &[u8]) -> Result<(u16, &[u8]), CoreChunkError> {
    if payload.len() < CORE_PREFIX_SIZE {
        return Err(CoreChunkError::Truncated(payload.len()));
    }
    if &payload[0..4] != CORE_MAGIC {
        return Err(CoreChunkError::BadMagic);
    }
    let track_id = u16::from_le_bytes(payload[4..6].try_into().unwrap());
    Ok((track_id, &payload[CORE_PREFIX_SIZE..]))
}
