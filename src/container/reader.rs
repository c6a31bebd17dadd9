//! Read path (§4.4): the seven-step validation pipeline, each step
//! refusing to proceed on failure, plus the query surface exposed to
//! callers (`tracks`, `get_chunks`, `iter_core_blocks`, `seek`,
//! `decode_chain`).

use super::{FileHeader, CONTAINER_CRC_SIZE, FILE_HEADER_SIZE};
use crate::chunk::{decode_chunk, ChunkError};
use crate::core_chunk::{unwrap_core_payload, CoreChunkError};
use crate::hash::{crc32, sha256};
use crate::seek::{decode_tsek_payload, seek_keyframe, CoreBlockDescriptor, SeekEntry, SeekError};
use crate::track::{unpack_core_flags, BlockType, FlagsError, TrackTable, TrackTableError};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("file is only {0} bytes, shorter than the 16-byte header")]
    TooShort(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("container CRC32 mismatch: expected {expected:#010x}, stored {stored:#010x}")]
    ContainerCrcMismatch { expected: u32, stored: u32 },
    #[error(transparent)]
    ChunkCrcMismatch(#[from] ChunkError),
    #[error(transparent)]
    TrackTableInvalid(#[from] TrackTableError),
    #[error("CORE chunk at index {0} names undeclared track {1}")]
    UnknownTrack(usize, u16),
    #[error("CORE chunk at index {0} is malformed: {1}")]
    MalformedCore(usize, CoreChunkError),
    #[error("CORE chunk at index {0} has invalid flags: {1}")]
    BadFlags(usize, FlagsError),
    #[error(transparent)]
    SeekMalformed(#[from] SeekError),
    #[error("seek index inconsistent: {0}")]
    SeekIndexInconsistent(String),
    #[error("no VERI chunk present")]
    MissingVeri,
    #[error("required chunk {0} is missing")]
    MissingChunk(&'static str),
    #[error("VERI sha256 mismatch: expected {expected}, computed {computed}")]
    VeriMismatch { expected: String, computed: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One parsed CORE block, as exposed by `iter_core_blocks`.
#[derive(Debug, Clone)]
pub struct CoreBlockView {
    pub core_chunk_index: u32,
    pub track_id: u16,
    pub pts_ms: u32,
    pub block_type: BlockType,
    /// The raw (possibly compressed, possibly encrypted) opaque payload.
    pub payload: Vec<u8>,
}

/// A validated, parsed H4MK file. Read-only over its source bytes; safe to
/// share for concurrent reads (§5 shared-resource policy).
pub struct Reader {
    pub header: FileHeader,
    tracks: TrackTable,
    core_blocks: Vec<CoreBlockView>,
    seek_indices: HashMap<u16, Vec<SeekEntry>>,
    other_chunks: Vec<(String, Vec<u8>)>,
    veri_sha256_hex: String,
}

impl Reader {
    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    pub fn get_chunks(&self, tag: &str) -> Vec<&[u8]> {
        self.other_chunks
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, payload)| payload.as_slice())
            .collect()
    }

    pub fn iter_core_blocks(&self, track: Option<u16>) -> impl Iterator<Item = &CoreBlockView> {
        self.core_blocks
            .iter()
            .filter(move |b| track.is_none_or(|t| b.track_id == t))
    }

    pub fn veri_sha256_hex(&self) -> &str {
        &self.veri_sha256_hex
    }

    pub fn seek(&self, track: u16, target_pts_ms: u32) -> Option<(usize, u32, u32)> {
        let entries = self.seek_indices.get(&track)?;
        seek_keyframe(entries, target_pts_ms)
    }

    pub fn decode_chain(&self, track: u16, target_pts_ms: u32) -> Vec<u32> {
        let Some(entries) = self.seek_indices.get(&track) else {
            return Vec::new();
        };
        let descriptors: Vec<CoreBlockDescriptor> = self
            .core_blocks
            .iter()
            .filter(|b| b.track_id == track)
            .map(|b| CoreBlockDescriptor {
                core_chunk_index: b.core_chunk_index,
                pts_ms: b.pts_ms,
                block_type: b.block_type,
            })
            .collect();
        crate::seek::decode_chain(entries, &descriptors, target_pts_ms)
    }
}

/// Parse and validate a complete H4MK file per the seven-step pipeline.
pub fn read(bytes: &[u8]) -> Result<Reader, ReaderError> {
    // Step 1.
    if bytes.len() < FILE_HEADER_SIZE + CONTAINER_CRC_SIZE {
        return Err(ReaderError::TooShort(bytes.len()));
    }
    let header_bytes: [u8; FILE_HEADER_SIZE] = bytes[0..FILE_HEADER_SIZE].try_into().unwrap();
    let header = FileHeader::decode(&header_bytes).ok_or(ReaderError::BadMagic)?;
    if header.version != super::FILE_VERSION {
        return Err(ReaderError::UnsupportedVersion(header.version));
    }

    // Step 2.
    let crc_start = bytes.len() - CONTAINER_CRC_SIZE;
    let stored_crc = u32::from_le_bytes(bytes[crc_start..].try_into().unwrap());
    let expected_crc = crc32(&bytes[..crc_start]);
    if expected_crc != stored_crc {
        return Err(ReaderError::ContainerCrcMismatch { expected: expected_crc, stored: stored_crc });
    }

    // Step 3: iterate chunks, verifying each CRC (decode_chunk does this).
    struct RawChunk {
        tag: [u8; 4],
        flags: u32,
        start: usize,
        payload_range: std::ops::Range<usize>,
        end: usize,
    }
    let mut raw_chunks = Vec::new();
    let mut offset = FILE_HEADER_SIZE;
    while offset < crc_start {
        let d = decode_chunk(bytes, offset)?;
        let payload_start = d.next_offset - crate::chunk::CHUNK_CRC_SIZE - d.payload.len();
        raw_chunks.push(RawChunk {
            tag: d.tag,
            flags: d.flags,
            start: offset,
            payload_range: payload_start..payload_start + d.payload.len(),
            end: d.next_offset,
        });
        offset = d.next_offset;
    }

    // Step 4: TRAK.
    let trak = raw_chunks
        .iter()
        .find(|c| &c.tag == b"TRAK")
        .map(|c| &bytes[c.payload_range.clone()])
        .ok_or(ReaderError::MissingChunk("TRAK"))?;
    let tracks = TrackTable::from_bytes(trak)?;

    // Step 5: CORE chunks.
    let mut core_blocks = Vec::new();
    let mut core_chunk_index: u32 = 0;
    for chunk in raw_chunks.iter().filter(|c| &c.tag == b"CORE") {
        let payload = &bytes[chunk.payload_range.clone()];
        let (track_id, blob) = unwrap_core_payload(payload)
            .map_err(|e| ReaderError::MalformedCore(core_chunk_index as usize, e))?;
        if !tracks.contains(track_id) {
            return Err(ReaderError::UnknownTrack(core_chunk_index as usize, track_id));
        }
        let (pts_ms, block_type) = unpack_core_flags(chunk.flags)
            .map_err(|e| ReaderError::BadFlags(core_chunk_index as usize, e))?;
        core_blocks.push(CoreBlockView {
            core_chunk_index,
            track_id,
            pts_ms,
            block_type,
            payload: blob.to_vec(),
        });
        core_chunk_index += 1;
    }

    // Step 6: TSEK, cross-checked against CORE chunks (I6).
    let mut seek_indices: HashMap<u16, Vec<SeekEntry>> = HashMap::new();
    for chunk in raw_chunks.iter().filter(|c| &c.tag == b"TSEK") {
        let payload = &bytes[chunk.payload_range.clone()];
        let (track_id, entries) = decode_tsek_payload(payload)?;
        validate_seek_entries(track_id, &entries, &core_blocks)?;
        seek_indices.insert(track_id, entries);
    }

    // Step 7: META/SAFE/NOTE (opaque to this layer) + VERI.
    let veri_chunk = raw_chunks
        .iter()
        .rev()
        .find(|c| &c.tag == b"VERI")
        .ok_or(ReaderError::MissingVeri)?;
    let veri_json: serde_json::Value = serde_json::from_slice(&bytes[veri_chunk.payload_range.clone()])?;
    let expected_sha256 = veri_json
        .get("sha256")
        .and_then(|v| v.as_str())
        .ok_or(ReaderError::MissingVeri)?
        .to_string();

    // VERI's sha256 covers every chunk preceding it, not VERI itself (the
    // builder computes it from `chunks.concat()` before appending VERI).
    let covered_start = FILE_HEADER_SIZE;
    let covered_end = veri_chunk.start;
    let computed_sha256 = hex::encode(sha256(&bytes[covered_start..covered_end]));

    if computed_sha256 != expected_sha256 {
        return Err(ReaderError::VeriMismatch { expected: expected_sha256, computed: computed_sha256 });
    }

    let other_chunks = raw_chunks
        .iter()
        .filter(|c| !matches!(&c.tag, b"TRAK" | b"CORE" | b"TSEK"))
        .map(|c| (String::from_utf8_lossy(&c.tag).into_owned(), bytes[c.payload_range.clone()].to_vec()))
        .collect();

    Ok(Reader {
        header,
        tracks,
        core_blocks,
        seek_indices,
        other_chunks,
        veri_sha256_hex: computed_sha256,
    })
}

fn validate_seek_entries(
    track_id: u16,
    entries: &[SeekEntry],
    core_blocks: &[CoreBlockView],
) -> Result<(), ReaderError> {
    for pair in entries.windows(2) {
        if pair[1].pts_ms <= pair[0].pts_ms {
            return Err(ReaderError::SeekIndexInconsistent(format!(
                "track {track_id} TSEK pts_ms is not strictly increasing"
            )));
        }
    }
    for entry in entries {
        let block = core_blocks
            .iter()
            .find(|b| b.core_chunk_index == entry.core_chunk_index)
            .ok_or_else(|| {
                ReaderError::SeekIndexInconsistent(format!(
                    "track {track_id} TSEK references missing core_chunk_index {}",
                    entry.core_chunk_index
                ))
            })?;
        if block.track_id != track_id || block.pts_ms != entry.pts_ms {
            return Err(ReaderError::SeekIndexInconsistent(format!(
                "track {track_id} TSEK entry at pts_ms {} does not match its referenced CORE chunk",
                entry.pts_ms
            )));
        }
        if block.block_type != BlockType::I {
            return Err(ReaderError::SeekIndexInconsistent(format!(
                "track {track_id} TSEK references a non-I block at core_chunk_index {}",
                entry.core_chunk_index
            )));
        }
    }
    Ok(())
}
