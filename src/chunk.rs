//! Chunk codec (C2) — typed, length-prefixed, CRC-protected framing units.
//!
//! # On-disk layout (all fields little-endian except the tag itself)
//!
//! ```text
//! Offset  Size        Field
//!    0      4         tag          4 ASCII bytes, e.g. b"CORE"
//!    4      4         flags        LE u32
//!    8      4         payload_len  LE u32
//!   12      N         payload      payload_len bytes
//! 12+N      4         crc32        CRC32(tag || flags || payload_len || payload)
//! ```
//!
//! CRC-32 is checked before any other interpretation of the payload, the
//! same cheapest-check-first ordering the reference crate uses for its own
//! block headers (see `block.rs`'s header CRC note).

use crate::hash::crc32;
use thiserror::Error;

/// Fixed byte length of a chunk's tag + flags + payload_len prefix.
pub const CHUNK_PREFIX_SIZE: usize = 4 + 4 + 4;
/// Byte length of the trailing CRC32 field.
pub const CHUNK_CRC_SIZE: usize = 4;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("chunk tag must be exactly 4 bytes, got {0}")]
    BadTagLength(usize),
    #[error("chunk payload of {0} bytes exceeds the 32-bit length field")]
    PayloadTooLarge(usize),
    #[error("chunk truncated: need at least {needed} bytes at offset {offset}, have {available}")]
    Malformed {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("chunk CRC32 mismatch at offset {offset}: expected {expected:#010x}, got {stored:#010x}")]
    CrcMismatch {
        offset: usize,
        expected: u32,
        stored: u32,
    },
}

/// A decoded chunk header plus payload slice, and the offset immediately
/// following it (where the next chunk, if any, begins).
#[derive(Debug, Clone)]
pub struct DecodedChunk<'a> {
    pub tag: [u8; 4],
    pub flags: u32,
    pub payload: &'a [u8],
    pub next_offset: usize,
}

impl<'a> DecodedChunk<'a> {
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

/// Encode one chunk: `tag || flags || payload_len || payload || crc32`.
///
/// `tag` must be exactly 4 bytes (ASCII, though this is not itself checked —
/// the wire format only requires 4 raw bytes). Zero-length payloads are
/// permitted.
pub fn encode_chunk(tag: &[u8], flags: u32, payload: &[u8]) -> Result<Vec<u8>, ChunkError> {
    if tag.len() != 4 {
        return Err(ChunkError::BadTagLength(tag.len()));
    }
    if payload.len() > u32::MAX as usize {
        return Err(ChunkError::PayloadTooLarge(payload.len()));
    }

    let mut out = Vec::with_capacity(CHUNK_PREFIX_SIZE + payload.len() + CHUNK_CRC_SIZE);
    out.extend_from_slice(tag);
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);

    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Decode one chunk starting at `offset` within `bytes`.
///
/// Verifies the CRC32 before returning. No partially-validated payload is
/// retained on error: a failure returns only the error, never a slice into
/// untrusted data.
pub fn decode_chunk(bytes: &[u8], offset: usize) -> Result<DecodedChunk<'_>, ChunkError> {
    let prefix_end = offset + CHUNK_PREFIX_SIZE;
    if prefix_end > bytes.len() {
        return Err(ChunkError::Malformed {
            offset,
            needed: CHUNK_PREFIX_SIZE,
            available: bytes.len().saturating_sub(offset),
        });
    }

    let tag: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
    let flags = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap());
    let payload_len = u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().unwrap()) as usize;

    let payload_end = prefix_end + payload_len;
    let crc_end = payload_end + CHUNK_CRC_SIZE;
    if crc_end > bytes.len() {
        return Err(ChunkError::Malformed {
            offset,
            needed: crc_end - offset,
            available: bytes.len() - offset,
        });
    }

    let covered = &bytes[offset..payload_end];
    let expected_crc = crc32(covered);
    let stored_crc = u32::from_le_bytes(bytes[payload_end..crc_end].try_into().unwrap());
    if expected_crc != stored_crc {
        return Err(ChunkError::CrcMismatch {
            offset,
            expected: expected_crc,
            stored: stored_crc,
        });
    }

    Ok(DecodedChunk {
        tag,
        flags,
        payload: &bytes[prefix_end..payload_end],
        next_offset: crc_end,
    })
}
