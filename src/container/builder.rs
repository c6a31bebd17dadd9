//! Write path (§4.3): the six-step pipeline from tracks + blocks to a
//! byte-identical-for-identical-input H4MK file.
//!
//! Per §2's write-path data flow, each block is compressed (C5) and then,
//! optionally, encrypted (C7) before it is wrapped into a `CORE` chunk (C2)
//! — compression always precedes encryption, never the reverse, so the
//! compressor never has to make sense of ciphertext.

use super::{FileHeader, CONTAINER_CRC_SIZE};
use crate::canonical;
use crate::chunk::{encode_chunk, ChunkError};
use crate::cipher::SenderState;
use crate::core_chunk::wrap_core_payload;
use crate::engine::{CompressionEngine, EngineError};
use crate::hash::sha256;
use crate::seek::{encode_tsek_payload, SeekEntry};
use crate::track::{pack_core_flags, BlockType, FlagsError, Track, TrackTable, TrackTableError};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use thiserror::Error;

/// One input block: one opaque payload for one track at one presentation
/// time. Payload is compressed by the active engine during `build`, then
/// (if a cipher session was supplied) encrypted in the same pass — the
/// builder never asks the caller to pre-encrypt, since that would run
/// compression over ciphertext instead of plaintext (§2's compress-then-
/// encrypt data flow).
#[derive(Debug, Clone)]
pub struct Block {
    pub track_id: u16,
    pub pts_ms: u32,
    pub block_type: BlockType,
    pub payload: Vec<u8>,
}

/// A cipher session plus the per-block AAD the caller wants bound into each
/// block's ciphertext (§4.7.6's context binding — typically `core_context`
/// over the track id, pts_ms, and core chunk index). `build` cannot derive
/// this AAD itself: `core_context` also binds `container_veri_hex`, which
/// does not exist until after `VERI` is computed, so the caller supplies
/// whatever binding it has settled on (e.g. a placeholder digest agreed out
/// of band, or the previous file's VERI for a chained sequence).
pub struct CipherOptions<'a> {
    pub sender: &'a mut SenderState,
    pub aad: &'a dyn Fn(&Block, u32) -> Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub meta_overrides: Option<JsonValue>,
    pub safe: Option<JsonValue>,
    pub note: Option<String>,
    /// Value written to the file header timestamp; 0 when unset (§6.3 —
    /// the core never reads the wall clock).
    pub header_timestamp_ms: u64,
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    TrackTableInvalid(#[from] TrackTableError),
    #[error("block for track {track_id} has pts_ms {pts_ms} exceeding the 28-bit field")]
    PtsOverflow { track_id: u16, pts_ms: u32 },
    #[error("track {0} has a non-monotonic pts_ms sequence")]
    PtsNonMonotonic(u16),
    #[error("track {0}'s first block is not type I")]
    FirstBlockNotI(u16),
    #[error("block names track {0} which is not declared in the track table")]
    UnknownTrack(u16),
    #[error("compression failed: {0}")]
    CompressionFailed(#[from] EngineError),
    #[error(transparent)]
    Flags(#[from] FlagsError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Build a complete H4MK file. Blocks may be supplied in any order; the
/// builder groups them by track to validate per-track monotonicity (I5),
/// then re-interleaves them into the total multitrack schedule
/// `(pts_ms asc, track_id asc)` for emission (§5 ordering guarantees).
pub fn build(
    tracks: &TrackTable,
    blocks: &[Block],
    engine: &dyn CompressionEngine,
    cipher: Option<CipherOptions>,
    opts: &BuildOptions,
) -> Result<Vec<u8>, BuildError> {
    tracks.validate()?;

    validate_per_track_ordering(tracks, blocks)?;

    let mut schedule: Vec<&Block> = blocks.iter().collect();
    schedule.sort_by_key(|b| (b.pts_ms, b.track_id));

    let mut chunks: Vec<Vec<u8>> = Vec::new();

    // Step 1: TRAK.
    chunks.push(encode_chunk(b"TRAK", 0, &tracks.to_canonical_bytes()?)?);

    // Step 2: CORE chunks. Compression of each block is independent of the
    // others, so it may run on a thread pool (§5); only the resulting chunk
    // assembly below is strictly ordered, to keep emission order fixed.
    let compressed_payloads = compress_schedule(engine, &schedule)?;

    // Encryption, if requested, runs after compression and before the CORE
    // chunk is assembled (§2). The sender's chain key ratchets per message,
    // so this step is inherently sequential regardless of the `parallel`
    // feature.
    let core_payloads: Vec<Vec<u8>> = match cipher {
        Some(CipherOptions { sender, aad }) => schedule
            .iter()
            .zip(compressed_payloads)
            .enumerate()
            .map(|(core_chunk_index, (block, compressed))| {
                let block_aad = aad(*block, core_chunk_index as u32);
                let envelope = sender.encrypt(&compressed, &block_aad);
                let mut wire = Vec::with_capacity(4 + envelope.header.len() + envelope.ciphertext.len());
                wire.extend_from_slice(&(envelope.header.len() as u32).to_le_bytes());
                wire.extend_from_slice(&envelope.header);
                wire.extend_from_slice(&envelope.ciphertext);
                wire
            })
            .collect(),
        None => compressed_payloads,
    };

    let mut seek_entries: HashMap<u16, Vec<SeekEntry>> = HashMap::new();
    for (core_chunk_index, (block, payload)) in schedule.iter().zip(core_payloads).enumerate() {
        let wrapped = wrap_core_payload(block.track_id, &payload);
        let flags = pack_core_flags(block.pts_ms, block.block_type)?;
        chunks.push(encode_chunk(b"CORE", flags, &wrapped)?);

        if block.block_type == BlockType::I {
            seek_entries.entry(block.track_id).or_default().push(SeekEntry {
                pts_ms: block.pts_ms,
                core_chunk_index: core_chunk_index as u32,
            });
        }
    }

    // Step 3: one TSEK per track, in track declaration order.
    for track in &tracks.tracks {
        let entries = seek_entries.get(&track.track_id).cloned().unwrap_or_default();
        let payload = encode_tsek_payload(track.track_id, &entries);
        chunks.push(encode_chunk(b"TSEK", 0, &payload)?);
    }

    // Step 4: META, with the active engine's info() injected before VERI.
    let mut meta = opts.meta_overrides.clone().unwrap_or_else(|| json!({}));
    if let JsonValue::Object(map) = &mut meta {
        map.insert("compression".to_string(), serde_json::to_value(engine.info())?);
    }
    chunks.push(encode_chunk(b"META", 0, &canonical::to_canonical_bytes(&meta)?)?);

    // Step 5: SAFE, optional NOTE, then VERI.
    let safe = opts.safe.clone().unwrap_or_else(|| json!({}));
    chunks.push(encode_chunk(b"SAFE", 0, &canonical::to_canonical_bytes(&safe)?)?);
    if let Some(note) = &opts.note {
        chunks.push(encode_chunk(b"NOTE", 0, note.as_bytes())?);
    }

    let veri_sha256 = sha256(&chunks.concat());
    let veri = json!({
        "sha256": hex::encode(veri_sha256),
        "format_version": 1,
    });
    chunks.push(encode_chunk(b"VERI", 0, &canonical::to_canonical_bytes(&veri)?)?);

    // Step 6: header + container CRC.
    let header = FileHeader {
        version: super::FILE_VERSION,
        flags: 0,
        timestamp_ms: opts.header_timestamp_ms,
    };

    let mut out = Vec::with_capacity(
        super::FILE_HEADER_SIZE + chunks.iter().map(Vec::len).sum::<usize>() + CONTAINER_CRC_SIZE,
    );
    out.extend_from_slice(&header.encode());
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    let crc = super::container_crc(&out);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Compress each scheduled block's payload, in order. With the `parallel`
/// feature, compression runs across a `rayon` thread pool since each call
/// is independent of the others; the resulting `Vec` preserves the input
/// order regardless, so emission order (§5) is unaffected either way.
#[cfg(feature = "parallel")]
fn compress_schedule(engine: &dyn CompressionEngine, schedule: &[&Block]) -> Result<Vec<Vec<u8>>, EngineError> {
    use rayon::prelude::*;
    schedule.par_iter().map(|b| engine.compress(&b.payload)).collect()
}

#[cfg(not(feature = "parallel"))]
fn compress_schedule(engine: &dyn CompressionEngine, schedule: &[&Block]) -> Result<Vec<Vec<u8>>, EngineError> {
    schedule.iter().map(|b| engine.compress(&b.payload)).collect()
}

fn validate_per_track_ordering(tracks: &TrackTable, blocks: &[Block]) -> Result<(), BuildError> {
    let declared: std::collections::HashSet<u16> = tracks.tracks.iter().map(|t: &Track| t.track_id).collect();

    let mut per_track: HashMap<u16, Vec<&Block>> = HashMap::new();
    for block in blocks {
        if !declared.contains(&block.track_id) {
            return Err(BuildError::UnknownTrack(block.track_id));
        }
        if block.pts_ms > crate::track::PTS_MS_MAX {
            return Err(BuildError::PtsOverflow { track_id: block.track_id, pts_ms: block.pts_ms });
        }
        per_track.entry(block.track_id).or_default().push(block);
    }

    for (track_id, track_blocks) in &per_track {
        if track_blocks.first().map(|b| b.block_type) != Some(BlockType::I) {
            return Err(BuildError::FirstBlockNotI(*track_id));
        }
        for pair in track_blocks.windows(2) {
            if pair[1].pts_ms < pair[0].pts_ms {
                return Err(BuildError::PtsNonMonotonic(*track_id));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReferenceEngine;
    use crate::track::Track;
    use serde_json::Map as JsonMap;

    fn single_track() -> TrackTable {
        TrackTable {
            tracks: vec![Track {
                track_id: 1,
                name: "main".into(),
                kind: "audio".into(),
                codec: "ref".into(),
                sample_rate: None,
                channels: None,
                note: None,
                extra: JsonMap::new(),
            }],
        }
    }

    fn s1_blocks() -> Vec<Block> {
        vec![
            Block { track_id: 1, pts_ms: 0, block_type: BlockType::I, payload: b"AA".to_vec() },
            Block { track_id: 1, pts_ms: 33, block_type: BlockType::P, payload: b"BB".to_vec() },
            Block { track_id: 1, pts_ms: 66, block_type: BlockType::P, payload: b"CC".to_vec() },
        ]
    }

    #[test]
    fn s1_build_has_expected_chunk_shape() {
        let bytes = build(&single_track(), &s1_blocks(), &ReferenceEngine, None, &BuildOptions::default()).unwrap();
        assert_eq!(&bytes[0..4], super::super::FILE_MAGIC);
        assert_eq!(bytes[4], 1);

        let mut offset = super::super::FILE_HEADER_SIZE;
        let mut tags = Vec::new();
        while offset < bytes.len() - CONTAINER_CRC_SIZE {
            let d = crate::chunk::decode_chunk(&bytes, offset).unwrap();
            tags.push(d.tag_str());
            offset = d.next_offset;
        }
        assert_eq!(
            tags,
            vec!["TRAK", "CORE", "CORE", "CORE", "TSEK", "META", "SAFE", "VERI"]
        );
    }

    #[test]
    fn build_is_deterministic() {
        let a = build(&single_track(), &s1_blocks(), &ReferenceEngine, None, &BuildOptions::default()).unwrap();
        let b = build(&single_track(), &s1_blocks(), &ReferenceEngine, None, &BuildOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_i_first_block() {
        let blocks = vec![Block { track_id: 1, pts_ms: 0, block_type: BlockType::P, payload: b"x".to_vec() }];
        let err = build(&single_track(), &blocks, &ReferenceEngine, None, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, BuildError::FirstBlockNotI(1)));
    }

    #[test]
    fn rejects_non_monotonic_pts() {
        let blocks = vec![
            Block { track_id: 1, pts_ms: 10, block_type: BlockType::I, payload: b"a".to_vec() },
            Block { track_id: 1, pts_ms: 5, block_type: BlockType::P, payload: b"b".to_vec() },
        ];
        let err = build(&single_track(), &blocks, &ReferenceEngine, None, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, BuildError::PtsNonMonotonic(1)));
    }

    #[test]
    fn rejects_unknown_track() {
        let blocks = vec![Block { track_id: 9, pts_ms: 0, block_type: BlockType::I, payload: b"a".to_vec() }];
        let err = build(&single_track(), &blocks, &ReferenceEngine, None, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownTrack(9)));
    }

    #[test]
    fn rejects_pts_overflow() {
        let blocks = vec![Block {
            track_id: 1,
            pts_ms: crate::track::PTS_MS_MAX + 1,
            block_type: BlockType::I,
            payload: b"a".to_vec(),
        }];
        let err = build(&single_track(), &blocks, &ReferenceEngine, None, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, BuildError::PtsOverflow { .. }));
    }
}
