//! # h4mk — a seekable, multitrack media container
//!
//! Format guarantees:
//! - All numeric fields are little-endian; never negotiated
//! - Every chunk is self-describing (tag, flags, length) and CRC32-protected;
//!   the CRC is checked before any other interpretation of the payload
//! - The whole container carries a trailing CRC32 over everything before it
//! - A track is declared once in `TRAK`; every `CORE` chunk names its track
//!   via the `H4TB` routing prefix, independent of the chunk's own flags
//! - The `TSEK` seek index is a flat array of `(pts_ms, core_chunk_index)`
//!   pairs, one per I-block, strictly increasing in `pts_ms`
//! - Compression is pluggable behind the `CompressionEngine` trait; a
//!   dynamically loaded core is sealed (identity-verified) before use
//! - The optional cipher (`cipher.rs`) is a unidirectional, forward-secure
//!   AEAD stream; `build` applies it per block, after compression and
//!   before the `CORE` chunk is assembled, when given a `CipherOptions`

pub mod canonical;
pub mod chunk;
pub mod cipher;
pub mod config;
pub mod container;
pub mod core_chunk;
pub mod engine;
pub mod facade;
pub mod hash;
pub mod sealing;
pub mod seek;
pub mod track;

use thiserror::Error;

// Flat re-exports for the most common types.
pub use canonical::{from_bytes, to_canonical_bytes};
pub use chunk::{decode_chunk, encode_chunk, ChunkError, DecodedChunk};
pub use config::Config;
pub use container::{build, read, Block, BuildOptions, CipherOptions, FileHeader, Reader};
pub use core_chunk::{unwrap_core_payload, wrap_core_payload};
pub use engine::{CompressionEngine, EngineInfo, ReferenceEngine};
pub use sealing::{attest, get_engine, verify_attestation, Attestation, SealedEngine};
pub use seek::{decode_chain, seek_keyframe, SeekEntry};
pub use track::{BlockType, Track, TrackTable};

/// Aggregated top-level error: every subsystem's error type converts into
/// this via `#[from]`, so a caller can match on one enum instead of
/// importing each module's error type separately (§7).
#[derive(Error, Debug)]
pub enum H4mkError {
    #[error(transparent)]
    Chunk(#[from] chunk::ChunkError),
    #[error(transparent)]
    TrackTable(#[from] track::TrackTableError),
    #[error(transparent)]
    Flags(#[from] track::FlagsError),
    #[error(transparent)]
    CoreChunk(#[from] core_chunk::CoreChunkError),
    #[error(transparent)]
    Seek(#[from] seek::SeekError),
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
    #[error(transparent)]
    Sealing(#[from] sealing::SealingError),
    #[error(transparent)]
    Cipher(#[from] cipher::CipherError),
    #[error(transparent)]
    Build(#[from] container::BuildError),
    #[error(transparent)]
    Reader(#[from] container::ReaderError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
