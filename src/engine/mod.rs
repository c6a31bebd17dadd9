//! Compression engine interface (C5): a stable trait implemented first by
//! the reference RLE codec and, optionally, by a dynamically loaded core
//! (`core.rs`). Sealing (engine-identity verification at load time) is a
//! separate concern layered on top in `crate::sealing`.

pub mod core;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dynamic compression core at {0:?} could not be opened or is missing a mandatory symbol")]
    CoreMissing(std::path::PathBuf),
    #[error("dynamic core reports engine_id {actual:?}, expected {expected:?}")]
    CoreMismatch { expected: String, actual: String },
    #[error("dynamic core reports fingerprint {actual}, expected {expected}")]
    CoreAltered { expected: String, actual: String },
    #[error("compression failed: {0}")]
    CompressionFailed(String),
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
    #[error("engine produced non-deterministic output for identical input")]
    EngineDeterminismViolation,
}

/// The `engine` discriminant in an engine's `info()` projection and in the
/// `META.compression` chunk. Matches spec wire values exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Reference,
    Core,
    None,
}

/// `info()` projection written verbatim into `META.compression` by the
/// container builder before `VERI` is computed (the META→VERI ordering the
/// builder's state machine enforces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub engine: EngineKind,
    pub engine_id: String,
    /// 32-byte SHA-256 fingerprint, hex-encoded.
    pub fingerprint: String,
    pub deterministic: bool,
    pub sealed: bool,
    pub identity_safe: bool,
    pub opaque: bool,
}

/// A compression engine: deterministic, lossless, stateless across calls,
/// and never deriving identity-bearing features from its input (payloads
/// are opaque bytes — see `identity_safe` in `EngineInfo`).
pub trait CompressionEngine: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError>;
    fn info(&self) -> EngineInfo;
}

/// Reference implementation: `value, run-length(u8, 1..=255)` pairs. Not a
/// useful codec — it exists as a stable, auditable determinism gold-reference
/// and is always available regardless of configuration.
pub struct ReferenceEngine;

pub const REFERENCE_ENGINE_ID: &str = "h4mk-reference-rle-1";

impl CompressionEngine for ReferenceEngine {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            let mut run = 1usize;
            while i + run < data.len() && data[i + run] == byte && run < 255 {
                run += 1;
            }
            out.push(byte);
            out.push(run as u8);
            i += run;
        }
        Ok(out)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        if data.len() % 2 != 0 {
            return Err(EngineError::DecompressionFailed(format!(
                "RLE stream length {} is not a multiple of 2",
                data.len()
            )));
        }
        let mut out = Vec::with_capacity(data.len());
        for pair in data.chunks_exact(2) {
            let (byte, run) = (pair[0], pair[1]);
            if run == 0 {
                return Err(EngineError::DecompressionFailed(
                    "RLE run length of 0 is invalid".into(),
                ));
            }
            out.extend(std::iter::repeat(byte).take(run as usize));
        }
        Ok(out)
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            engine: EngineKind::Reference,
            engine_id: REFERENCE_ENGINE_ID.to_string(),
            fingerprint: hex::encode(crate::hash::sha256(REFERENCE_ENGINE_ID.as_bytes())),
            deterministic: true,
            sealed: false,
            identity_safe: true,
            opaque: true,
        }
    }
}

/// The "no compression occurred" identity engine. Still required to produce
/// an `info()` projection (`engine="none"`) so the META→VERI binding is
/// total even when compression was never requested (spec §4.3 step 4).
pub struct NoneEngine;

impl CompressionEngine for NoneEngine {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(data.to_vec())
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            engine: EngineKind::None,
            engine_id: "none".to_string(),
            fingerprint: hex::encode([0u8; 32]),
            deterministic: true,
            sealed: false,
            identity_safe: true,
            opaque: true,
        }
    }
}
