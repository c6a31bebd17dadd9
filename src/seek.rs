//! Seek index (C3) — per-track keyframe lookup and GOP-bounded decode chains.
//!
//! Two independent pieces:
//! - `TSEK` chunk wire framing: a flat array of `(pts_ms, core_chunk_index)`
//!   pairs, one per I-block, per track.
//! - The seek algorithms (`seek_keyframe`, `decode_chain`), which operate on
//!   plain slices so they can be exercised without a whole container —
//!   the container reader supplies the slices from its parsed chunk list.

use crate::track::BlockType;
use thiserror::Error;

pub const TSEK_MAGIC: &[u8; 4] = b"H4SK";
const TSEK_PREFIX_SIZE: usize = 4 + 2 + 2 + 4;
const TSEK_ENTRY_SIZE: usize = 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    pub pts_ms: u32,
    pub core_chunk_index: u32,
}

/// A CORE chunk's routing-relevant metadata, used by `decode_chain` to walk
/// a track's blocks in file order without re-parsing payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreBlockDescriptor {
    pub core_chunk_index: u32,
    pub pts_ms: u32,
    pub block_type: BlockType,
}

#[derive(Error, Debug)]
pub enum SeekError {
    #[error("TSEK payload of {0} bytes is shorter than the minimum {TSEK_PREFIX_SIZE}-byte prefix")]
    Truncated(usize),
    #[error("TSEK payload does not begin with the H4SK magic")]
    BadMagic,
    #[error("TSEK declares {declared} entries but only {available} bytes remain")]
    CountMismatch { declared: u32, available: usize },
}

/// Encode a track's seek entries into a `TSEK` chunk payload.
pub fn encode_tsek_payload(track_id: u16, entries: &[SeekEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TSEK_PREFIX_SIZE + entries.len() * TSEK_ENTRY_SIZE);
    out.extend_from_slice(TSEK_MAGIC);
    out.extend_from_slice(&track_id.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for e in entries {
        out.extend_from_slice(&e.pts_ms.to_le_bytes());
        out.extend_from_slice(&e.core_chunk_index.to_le_bytes());
    }
    out
}

/// Decode a `TSEK` chunk payload into `(track_id, entries)`.
pub fn decode_tsek_payload(payload: &[u8]) -> Result<(u16, Vec<SeekEntry>), SeekError> {
    if payload.len() < TSEK_PREFIX_SIZE {
        return Err(SeekError::Truncated(payload.len()));
    }
    if &payload[0..4] != TSEK_MAGIC {
        return Err(SeekError::BadMagic);
    }
    let track_id = u16::from_le_bytes(payload[4..6].try_into().unwrap());
    let count = u32::from_le_bytes(payload[8..12].try_into().unwrap());

    let available = payload.len() - TSEK_PREFIX_SIZE;
    let needed = count as usize * TSEK_ENTRY_SIZE;
    if needed > available {
        return Err(SeekError::CountMismatch {
            declared: count,
            available,
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut pos = TSEK_PREFIX_SIZE;
    for _ in 0..count {
        let pts_ms = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap());
        let core_chunk_index = u32::from_le_bytes(payload[pos + 4..pos + 8].try_into().unwrap());
        entries.push(SeekEntry { pts_ms, core_chunk_index });
        pos += TSEK_ENTRY_SIZE;
    }
    Ok((track_id, entries))
}

/// Binary search `entries` (sorted ascending by `pts_ms`) for the entry with
/// the greatest `pts_ms <= target_pts_ms`.
///
/// Tie-break: if multiple entries share `pts_ms` (forbidden by I6 but
/// handled defensively here), returns the one with the smallest index.
/// Returns `None` if `target_pts_ms` precedes the first entry.
pub fn seek_keyframe(entries: &[SeekEntry], target_pts_ms: u32) -> Option<(usize, u32, u32)> {
    let idx = entries.partition_point(|e| e.pts_ms <= target_pts_ms);
    if idx == 0 {
        return None;
    }
    let max_pts = entries[idx - 1].pts_ms;
    let first = entries[..idx].partition_point(|e| e.pts_ms < max_pts);
    Some((first, max_pts, entries[first].core_chunk_index))
}

/// Build the decode chain for `target_pts_ms`: the keyframe found by
/// `seek_keyframe`, plus every subsequent same-track block in file order,
/// stopping exclusively at the next I-block or a `pts_ms` exceeding the
/// target, whichever comes first.
///
/// `blocks` must be the track's CORE chunks in file (ascending
/// `core_chunk_index`) order.
pub fn decode_chain(
    entries: &[SeekEntry],
    blocks: &[CoreBlockDescriptor],
    target_pts_ms: u32,
) -> Vec<u32> {
    let Some((_, _, start_chunk_index)) = seek_keyframe(entries, target_pts_ms) else {
        return Vec::new();
    };
    let Some(start_pos) = blocks
        .iter()
        .position(|b| b.core_chunk_index == start_chunk_index)
    else {
        return Vec::new();
    };

    let mut chain = vec![blocks[start_pos].core_chunk_index];
    for b in &blocks[start_pos + 1..] {
        if b.block_type == BlockType::I {
            break;
        }
        if b.pts_ms > target_pts_ms {
            break;
        }
        chain.push(b.core_chunk_index);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<SeekEntry> {
        vec![
            SeekEntry { pts_ms: 0, core_chunk_index: 0 },
            SeekEntry { pts_ms: 100, core_chunk_index: 3 },
            SeekEntry { pts_ms: 200, core_chunk_index: 6 },
        ]
    }

    #[test]
    fn tsek_roundtrip() {
        let e = entries();
        let payload = encode_tsek_payload(7, &e);
        let (track_id, decoded) = decode_tsek_payload(&payload).unwrap();
        assert_eq!(track_id, 7);
        assert_eq!(decoded, e);
    }

    #[test]
    fn tsek_empty_roundtrip() {
        let payload = encode_tsek_payload(1, &[]);
        let (track_id, decoded) = decode_tsek_payload(&payload).unwrap();
        assert_eq!(track_id, 1);
        assert!(decoded.is_empty());
    }

    #[test]
    fn seek_before_first_entry_is_none() {
        assert_eq!(seek_keyframe(&entries(), 0).map(|(_, pts, _)| pts), Some(0));
    }

    #[test]
    fn seek_returns_greatest_not_exceeding() {
        assert_eq!(seek_keyframe(&entries(), 50), Some((0, 0, 0)));
        assert_eq!(seek_keyframe(&entries(), 150), Some((1, 100, 3)));
        assert_eq!(seek_keyframe(&entries(), 999), Some((2, 200, 6)));
    }

    #[test]
    fn seek_tie_break_picks_smallest_index() {
        let dupes = vec![
            SeekEntry { pts_ms: 50, core_chunk_index: 1 },
            SeekEntry { pts_ms: 50, core_chunk_index: 2 },
        ];
        assert_eq!(seek_keyframe(&dupes, 50), Some((0, 50, 1)));
    }

    #[test]
    fn decode_chain_stops_at_next_i_block() {
        let e = vec![SeekEntry { pts_ms: 0, core_chunk_index: 0 }];
        let blocks = vec![
            CoreBlockDescriptor { core_chunk_index: 0, pts_ms: 0, block_type: BlockType::I },
            CoreBlockDescriptor { core_chunk_index: 1, pts_ms: 33, block_type: BlockType::P },
            CoreBlockDescriptor { core_chunk_index: 2, pts_ms: 66, block_type: BlockType::P },
            CoreBlockDescriptor { core_chunk_index: 3, pts_ms: 100, block_type: BlockType::I },
        ];
        assert_eq!(decode_chain(&e, &blocks, 80), vec![0, 1, 2]);
    }

    #[test]
    fn decode_chain_stops_at_pts_beyond_target() {
        let e = vec![SeekEntry { pts_ms: 0, core_chunk_index: 0 }];
        let blocks = vec![
            CoreBlockDescriptor { core_chunk_index: 0, pts_ms: 0, block_type: BlockType::I },
            CoreBlockDescriptor { core_chunk_index: 1, pts_ms: 33, block_type: BlockType::P },
            CoreBlockDescriptor { core_chunk_index: 2, pts_ms: 66, block_type: BlockType::P },
        ];
        assert_eq!(decode_chain(&e, &blocks, 40), vec![0, 1]);
    }
}
