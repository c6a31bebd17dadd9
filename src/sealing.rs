//! Compression sealing (C6): engine-identity verification at load time,
//! attestation, and the CI guardrail that refuses dynamic cores outright.
//!
//! The builder always writes an engine's `info()` projection into
//! `META.compression` *before* `VERI` is computed (enforced by the
//! container builder's state machine in `container::mod`), so any mismatch
//! between the engine actually used and the engine named in `META`
//! invalidates `VERI` on read — sealing and the container format are bound
//! by construction, not by a runtime check a caller could skip.

use crate::config::EngineConfig;
use crate::engine::core::CoreEngine;
use crate::engine::{CompressionEngine, EngineError, EngineInfo, ReferenceEngine};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SealingError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("ci_guardrail is set: refusing to load a dynamic compression core")]
    CiGuardrailRefusal,
}

/// A compression engine wrapped with its sealing verdict. `sealed` is true
/// iff at least one identity/fingerprint check was performed and passed
/// (spec §4.6 step 6) — an engine loaded with no expectations configured is
/// never considered sealed, even if it loaded successfully.
pub struct SealedEngine {
    inner: Box<dyn CompressionEngine>,
    sealed: bool,
}

impl CompressionEngine for SealedEngine {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.inner.compress(data)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.inner.decompress(data)
    }

    fn info(&self) -> EngineInfo {
        let mut info = self.inner.info();
        info.sealed = self.sealed;
        info
    }
}

/// Select and load the engine named by `cfg`, applying the load sequence
/// from spec §4.6:
///
/// 1. No `core_path` → reference engine, `sealed=false`.
/// 2. Otherwise open the library and resolve the mandatory symbols. If this
///    fails and neither `expected_engine_id` nor `expected_engine_fp` is
///    set, fall back to the reference engine (§6.3: a `core_path` with no
///    identity expectations is advisory, not a hard requirement); if either
///    expectation is set, the caller has committed to a specific core and
///    load failure is `CoreMissing`.
/// 3. Compare the library's reported id/fingerprint against any configured
///    expectations, failing `CoreMismatch`/`CoreAltered` on divergence.
/// 4. Mark `sealed=true` iff at least one such check ran and passed.
pub fn get_engine(cfg: &EngineConfig) -> Result<SealedEngine, SealingError> {
    let Some(core_path) = &cfg.core_path else {
        return Ok(SealedEngine {
            inner: Box::new(ReferenceEngine),
            sealed: false,
        });
    };

    if cfg.ci_guardrail {
        return Err(SealingError::CiGuardrailRefusal);
    }

    let core = match CoreEngine::load(core_path) {
        Ok(core) => core,
        Err(e) => {
            if cfg.expected_engine_id.is_none() && cfg.expected_engine_fp.is_none() {
                return Ok(SealedEngine {
                    inner: Box::new(ReferenceEngine),
                    sealed: false,
                });
            }
            return Err(SealingError::Engine(e));
        }
    };

    let mut checked = false;

    if let Some(expected_id) = &cfg.expected_engine_id {
        let actual = core.engine_id().ok_or_else(|| {
            SealingError::Engine(EngineError::CoreMissing(core_path.clone()))
        })?;
        if actual != expected_id {
            return Err(SealingError::Engine(EngineError::CoreMismatch {
                expected: expected_id.clone(),
                actual: actual.to_string(),
            }));
        }
        checked = true;
    }

    if let Some(expected_fp) = &cfg.expected_engine_fp {
        let actual = core.fingerprint().ok_or_else(|| {
            SealingError::Engine(EngineError::CoreMissing(core_path.clone()))
        })?;
        if &actual != expected_fp {
            return Err(SealingError::Engine(EngineError::CoreAltered {
                expected: hex::encode(expected_fp),
                actual: hex::encode(actual),
            }));
        }
        checked = true;
    }

    Ok(SealedEngine {
        inner: Box::new(core),
        sealed: checked,
    })
}

/// A signed-at-a-point-in-time assertion of the active engine's identity.
/// `timestamp_unix` is caller-supplied — the core never reads the wall
/// clock (§9 design note).
#[derive(Debug, Clone, PartialEq)]
pub struct Attestation {
    pub engine_id: String,
    pub fingerprint: String,
    pub timestamp_unix: u64,
    pub attestation_hash: [u8; 32],
    pub sealed: bool,
}

fn attestation_hash(engine_id: &str, fingerprint: &str, timestamp_unix: u64) -> [u8; 32] {
    crate::hash::sha256_chain([
        engine_id.as_bytes(),
        b"|",
        fingerprint.as_bytes(),
        b"|",
        timestamp_unix.to_string().as_bytes(),
    ])
}

/// Produce an attestation for `engine` at `timestamp_unix`.
pub fn attest(engine: &dyn CompressionEngine, timestamp_unix: u64) -> Attestation {
    let info = engine.info();
    let hash = attestation_hash(&info.engine_id, &info.fingerprint, timestamp_unix);
    Attestation {
        engine_id: info.engine_id,
        fingerprint: info.fingerprint,
        timestamp_unix,
        attestation_hash: hash,
        sealed: info.sealed,
    }
}

/// Recompute `att.attestation_hash` and re-check it against `engine`'s live
/// info. Returns `false` if either the hash no longer matches its own
/// fields or the engine's current identity no longer matches the
/// attestation (the engine state changed).
pub fn verify_attestation(att: &Attestation, engine: &dyn CompressionEngine) -> bool {
    let recomputed = attestation_hash(&att.engine_id, &att.fingerprint, att.timestamp_unix);
    if recomputed != att.attestation_hash {
        return false;
    }
    let live = engine.info();
    live.engine_id == att.engine_id && live.fingerprint == att.fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReferenceEngine;

    #[test]
    fn unset_core_path_yields_unsealed_reference_engine() {
        let cfg = EngineConfig::default();
        let engine = get_engine(&cfg).unwrap();
        let info = engine.info();
        assert!(!info.sealed);
        assert_eq!(info.engine_id, crate::engine::REFERENCE_ENGINE_ID);
    }

    #[test]
    fn missing_core_path_fails_core_missing_when_an_identity_is_expected() {
        let cfg = EngineConfig {
            core_path: Some("/tmp/h4mk-does-not-exist.so".into()),
            expected_engine_id: Some("h4core-x-1".to_string()),
            ..Default::default()
        };
        let err = get_engine(&cfg).unwrap_err();
        assert!(matches!(
            err,
            SealingError::Engine(EngineError::CoreMissing(_))
        ));
    }

    #[test]
    fn missing_core_path_falls_back_to_reference_when_no_identity_is_expected() {
        let cfg = EngineConfig {
            core_path: Some("/tmp/h4mk-does-not-exist.so".into()),
            ..Default::default()
        };
        let engine = get_engine(&cfg).unwrap();
        let info = engine.info();
        assert!(!info.sealed);
        assert_eq!(info.engine_id, crate::engine::REFERENCE_ENGINE_ID);
    }

    #[test]
    fn ci_guardrail_refuses_dynamic_core_unconditionally() {
        let cfg = EngineConfig {
            core_path: Some("/tmp/h4mk-does-not-exist.so".into()),
            ci_guardrail: true,
            ..Default::default()
        };
        assert!(matches!(
            get_engine(&cfg),
            Err(SealingError::CiGuardrailRefusal)
        ));
    }

    #[test]
    fn attestation_round_trips_against_unchanged_engine() {
        let engine = ReferenceEngine;
        let att = attest(&engine, 1_700_000_000);
        assert!(verify_attestation(&att, &engine));
    }

    #[test]
    fn attestation_fails_if_hash_field_is_tampered() {
        let engine = ReferenceEngine;
        let mut att = attest(&engine, 1_700_000_000);
        att.attestation_hash[0] ^= 0xFF;
        assert!(!verify_attestation(&att, &engine));
    }
}
