//! Track table (`TRAK` chunk) and block type/flags packing (§3.3, §3.4).
//!
//! A track is declared once in the `TRAK` chunk's JSON track list. Every
//! `CORE` chunk names the track it belongs to via the 16-bit `track_id`
//! field in its `H4TB` routing prefix (see `core_chunk.rs`); the
//! presentation timestamp and block type are packed into the chunk's
//! 32-bit `flags` word, not the payload, so a reader can classify a block
//! without touching its (possibly encrypted, possibly compressed) payload.

use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Maximum representable presentation timestamp: `pts_ms` fits in 28 bits (I7).
pub const PTS_MS_MAX: u32 = (1u32 << 28) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    I = 0,
    P = 1,
    B = 2,
}

impl BlockType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(BlockType::I),
            1 => Some(BlockType::P),
            2 => Some(BlockType::B),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum FlagsError {
    #[error("pts_ms {0} exceeds the 28-bit field (max {PTS_MS_MAX})")]
    PtsOverflow(u32),
    #[error("reserved block_type bits {0:#x} do not name a known block type")]
    UnknownBlockType(u32),
}

/// Pack `(pts_ms, block_type)` into a `CORE` chunk's 32-bit `flags` word.
///
/// Layout: bits 0..27 = pts_ms, bits 28..29 = block_type, bits 30..31 reserved (zero).
pub fn pack_core_flags(pts_ms: u32, block_type: BlockType) -> Result<u32, FlagsError> {
    if pts_ms > PTS_MS_MAX {
        return Err(FlagsError::PtsOverflow(pts_ms));
    }
    Ok((pts_ms & PTS_MS_MAX) | ((block_type as u32) << 28))
}

/// Unpack a `CORE` chunk's `flags` word into `(pts_ms, block_type)`.
pub fn unpack_core_flags(flags: u32) -> Result<(u32, BlockType), FlagsError> {
    let pts_ms = flags & PTS_MS_MAX;
    let type_bits = (flags >> 28) & 0b11;
    let block_type = BlockType::from_u8(type_bits as u8)
        .ok_or(FlagsError::UnknownBlockType(type_bits))?;
    Ok((pts_ms, block_type))
}

/// One declared track. `extra` preserves any unknown JSON fields verbatim
/// so re-emitting an untouched `TRAK` chunk reproduces the same bytes (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub track_id: u16,
    pub name: String,
    pub kind: String,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TrackTable {
    pub tracks: Vec<Track>,
}

#[derive(Error, Debug)]
pub enum TrackTableError {
    #[error("duplicate track_id {0} in TRAK chunk")]
    DuplicateTrackId(u16),
    #[error("track {0} is missing a required field")]
    MissingField(u16),
    #[error("invalid TRAK JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackTable {
    pub fn validate(&self) -> Result<(), TrackTableError> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.tracks {
            if !seen.insert(t.track_id) {
                return Err(TrackTableError::DuplicateTrackId(t.track_id));
            }
            if t.name.is_empty() || t.kind.is_empty() || t.codec.is_empty() {
                return Err(TrackTableError::MissingField(t.track_id));
            }
        }
        Ok(())
    }

    pub fn contains(&self, track_id: u16) -> bool {
        self.tracks.iter().any(|t| t.track_id == track_id)
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, TrackTableError> {
        self.validate()?;
        Ok(crate::canonical::to_canonical_bytes(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrackTableError> {
        let table: TrackTable = crate::canonical::from_bytes(bytes)?;
        table.validate()?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let flags = pack_core_flags(123_456, BlockType::P).unwrap();
        let (pts, bt) = unpack_core_flags(flags).unwrap();
        assert_eq!(pts, 123_456);
        assert_eq!(bt, BlockType::P);
    }

    #[test]
    fn pts_overflow_rejected() {
        assert!(pack_core_flags(PTS_MS_MAX + 1, BlockType::I).is_err());
    }

    #[test]
    fn pts_max_is_exactly_representable() {
        let flags = pack_core_flags(PTS_MS_MAX, BlockType::B).unwrap();
        let (pts, bt) = unpack_core_flags(flags).unwrap();
        assert_eq!(pts, PTS_MS_MAX);
        assert_eq!(bt, BlockType::B);
    }

    #[test]
    fn duplicate_track_id_rejected() {
        let table = TrackTable {
            tracks: vec![
                Track {
                    track_id: 1,
                    name: "a".into(),
                    kind: "audio".into(),
                    codec: "ref".into(),
                    sample_rate: None,
                    channels: None,
                    note: None,
                    extra: JsonMap::new(),
                },
                Track {
                    track_id: 1,
                    name: "b".into(),
                    kind: "audio".into(),
                    codec: "ref".into(),
                    sample_rate: None,
                    channels: None,
                    note: None,
                    extra: JsonMap::new(),
                },
            ],
        };
        assert!(matches!(
            table.validate(),
            Err(TrackTableError::DuplicateTrackId(1))
        ));
    }

    #[test]
    fn unknown_fields_round_trip_verbatim() {
        let bytes = br#"{"tracks":[{"track_id":1,"name":"a","kind":"audio","codec":"ref","future_field":"x"}]}"#;
        let table = TrackTable::from_bytes(bytes).unwrap();
        let out = table.to_canonical_bytes().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\"future_field\":\"x\""));
    }
}
