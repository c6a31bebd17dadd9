//! Public facade (C8): one flat namespace gathering the operations a caller
//! actually reaches for — build, read, seek, engine selection, attestation,
//! and the cipher — so most integrations only ever need `use h4mk::facade::*`,
//! the same way the reference crate's top-level `lib.rs` re-exports its
//! `Archive` facade over the lower-level reader/writer/codec/crypto modules.

pub use crate::cipher::{core_context, CipherError, Envelope, ReceiverState, SenderState};
pub use crate::config::{Config, EngineConfig};
pub use crate::container::{build, read, Block, BuildError, BuildOptions, CipherOptions, Reader, ReaderError};
pub use crate::engine::{CompressionEngine, EngineInfo};
pub use crate::sealing::{attest, get_engine, verify_attestation, Attestation, SealedEngine, SealingError};
pub use crate::seek::{decode_chain, seek_keyframe, SeekEntry};
pub use crate::track::{Track, TrackTable};

/// Construct a sender-side cipher session from `cfg`'s suite and a shared
/// secret (§4.7.1). The suite is validated against `cfg.cipher_suite` so a
/// caller who configured a suite this build doesn't implement fails fast
/// rather than silently encrypting under a different one.
pub fn init_cipher_sender(cfg: &Config, shared_secret: &[u8; 32]) -> Result<SenderState, CipherError> {
    if cfg.cipher_suite != crate::cipher::SUITE_AES256_GCM {
        return Err(CipherError::SuiteMismatch {
            configured: cfg.cipher_suite.clone(),
            header: crate::cipher::SUITE_AES256_GCM.to_string(),
        });
    }
    Ok(SenderState::init(shared_secret))
}

/// Construct a receiver-side cipher session from `cfg`'s suite, replay
/// window, and gap bound (§4.7.1/§6.3).
pub fn init_cipher_receiver(cfg: &Config, shared_secret: &[u8; 32]) -> Result<ReceiverState, CipherError> {
    if cfg.cipher_suite != crate::cipher::SUITE_AES256_GCM {
        return Err(CipherError::SuiteMismatch {
            configured: cfg.cipher_suite.clone(),
            header: crate::cipher::SUITE_AES256_GCM.to_string(),
        });
    }
    Ok(ReceiverState::init(shared_secret, cfg.replay_window_w, cfg.gap_bound_g))
}

/// Encrypt one block's plaintext payload under the given context-binding
/// AAD (§4.7.6). Thin wrapper so callers never need to import `cipher`
/// directly; `build` itself calls `SenderState::encrypt` the same way once
/// per block, after compression, when given a `CipherOptions`.
pub fn encrypt(sender: &mut SenderState, plaintext: &[u8], aad: &[u8]) -> Envelope {
    sender.encrypt(plaintext, aad)
}

/// Decrypt one envelope, enforcing replay/gap/transcript checks (§4.7.5).
pub fn decrypt(receiver: &mut ReceiverState, envelope: &Envelope, aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    receiver.decrypt(envelope, aad)
}
