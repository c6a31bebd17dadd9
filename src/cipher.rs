//! Living Cipher v3 (C7): a forward-secure, transcript-bound AEAD stream
//! cipher for optional per-CORE-block encryption. Scope is strictly
//! unidirectional transport (one sender, one receiver state); bidirectional
//! ratcheting is out of scope.
//!
//! Built from `hkdf` + `sha2` + `aes-gcm` — the same crate family the
//! reference crate already uses for its own AES-256-GCM encryption
//! (`crypto/mod.rs`), generalized here from a single password-derived key
//! into a ratcheting per-message key schedule. Nonces are derived, never
//! drawn from an RNG, so sender output is reproducible given the same
//! initial secret and message sequence (D1).

use crate::hash::{hkdf_expand, sha256_chain};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::collections::HashMap;
use thiserror::Error;

pub const SUITE_AES256_GCM: &str = "AES256-GCM|HKDF-SHA256|SHA256";
const HEADER_MAGIC: &[u8; 5] = b"H4LC3";

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("cipher header is malformed: {0}")]
    HeaderMalformed(String),
    #[error("cipher suite mismatch: configured {configured:?}, header named {header:?}")]
    SuiteMismatch { configured: String, header: String },
    #[error("AEAD authentication failed for counter {0}")]
    AuthFail(u64),
    #[error("counter {0} is a replay or has fallen outside the replay window")]
    ReplayOrOutOfWindow(u64),
    #[error("forward gap of {gap} from {highest_delivered} exceeds bound {bound}")]
    GapTooLarge { gap: u64, highest_delivered: u64, bound: u64 },
    #[error("transcript mismatch: session state has diverged from the sender")]
    TranscriptMismatch,
}

/// Per-message derived material. Cached for up to `replay_window_w` entries
/// on the receive path so out-of-order deliveries within the window can
/// still be decrypted without re-deriving the whole chain.
#[derive(Clone)]
struct MessageKeys {
    k_msg: [u8; 32],
    nonce: [u8; 12],
}

fn derive_message_keys(chain_key: &[u8; 32], counter: u64) -> (MessageKeys, [u8; 32]) {
    let n = counter.to_be_bytes();

    let mut msg_info = Vec::with_capacity(11 + 8);
    msg_info.extend_from_slice(b"H4LC3/msg/");
    msg_info.extend_from_slice(&n);
    let k_msg: [u8; 32] = hkdf_expand(chain_key, &msg_info);

    let mut nonce_info = Vec::with_capacity(13 + 8);
    nonce_info.extend_from_slice(b"H4LC3/nonce/");
    nonce_info.extend_from_slice(&n);
    let nonce_full: [u8; 32] = hkdf_expand(chain_key, &nonce_info);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&nonce_full[0..12]);

    let next_chain_key: [u8; 32] = hkdf_expand(chain_key, b"H4LC3/advance");

    (MessageKeys { k_msg, nonce }, next_chain_key)
}

/// A sealed cipher header + ciphertext ready to transmit.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub header: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

fn encode_header(suite: &str, counter: u64, transcript_in: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(HEADER_MAGIC);
    out.extend_from_slice(&(suite.len() as u16).to_le_bytes());
    out.extend_from_slice(suite.as_bytes());
    out.extend_from_slice(&counter.to_le_bytes());
    out.extend_from_slice(transcript_in);
    out.push(0u8); // flags: no root-ratchet boundary in the unidirectional v3 profile
    out
}

struct DecodedHeader<'a> {
    suite: &'a str,
    counter: u64,
    transcript_in: [u8; 32],
}

fn decode_header(bytes: &[u8]) -> Result<DecodedHeader<'_>, CipherError> {
    if bytes.len() < 5 + 2 {
        return Err(CipherError::HeaderMalformed("shorter than the fixed prefix".into()));
    }
    if &bytes[0..5] != HEADER_MAGIC {
        return Err(CipherError::HeaderMalformed("bad magic".into()));
    }
    let suite_len = u16::from_le_bytes(bytes[5..7].try_into().unwrap()) as usize;
    let suite_end = 7 + suite_len;
    if bytes.len() < suite_end + 8 + 32 + 1 {
        return Err(CipherError::HeaderMalformed("truncated before flags".into()));
    }
    let suite = std::str::from_utf8(&bytes[7..suite_end])
        .map_err(|_| CipherError::HeaderMalformed("suite is not valid UTF-8".into()))?;
    let counter = u64::from_le_bytes(bytes[suite_end..suite_end + 8].try_into().unwrap());
    let mut transcript_in = [0u8; 32];
    transcript_in.copy_from_slice(&bytes[suite_end + 8..suite_end + 8 + 32]);
    let flags = bytes[suite_end + 8 + 32];
    if flags & 1 != 0 {
        return Err(CipherError::HeaderMalformed(
            "root-ratchet boundary (bidirectional v2.1+) is not supported in this build".into(),
        ));
    }
    Ok(DecodedHeader { suite, counter, transcript_in })
}

fn advance_transcript(transcript_in: &[u8; 32], header: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    sha256_chain([transcript_in.as_slice(), header, ciphertext])
}

fn aead_encrypt(k_msg: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k_msg));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .expect("AES-256-GCM encryption of a bounded plaintext cannot fail")
}

fn aead_decrypt(k_msg: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k_msg));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .ok()
}

/// Sender-side cipher state (§4.7.1). Exclusively owned: cloning or sharing
/// it across concurrent send calls would violate the single-writer
/// discipline the cipher's forward-secrecy guarantee depends on, so this
/// type derives neither `Clone` nor `Copy`.
pub struct SenderState {
    suite: String,
    chain_key: [u8; 32],
    counter: u64,
    transcript: [u8; 32],
}

impl SenderState {
    /// Initialize from a 32-byte shared secret (§4.7.1). `root_key` is
    /// derived for symmetry with the receiver/spec but, in the
    /// unidirectional v3 profile, only `chain_key` feeds the message
    /// ratchet.
    pub fn init(shared_secret: &[u8; 32]) -> Self {
        let _root_key: [u8; 32] = hkdf_expand(shared_secret, b"H4LC3/root");
        let chain_key: [u8; 32] = hkdf_expand(shared_secret, b"H4LC3/chain");
        Self {
            suite: SUITE_AES256_GCM.to_string(),
            chain_key,
            counter: 0,
            transcript: [0u8; 32],
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Encrypt `plaintext` under `caller_aad` (the `CoreContext`, §4.7.6),
    /// advancing the ratchet and transcript. Deterministic: the same state
    /// and inputs always produce the same envelope (D1).
    pub fn encrypt(&mut self, plaintext: &[u8], caller_aad: &[u8]) -> Envelope {
        let header = encode_header(&self.suite, self.counter, &self.transcript);
        let (keys, next_chain_key) = derive_message_keys(&self.chain_key, self.counter);

        let mut aad = Vec::with_capacity(header.len() + caller_aad.len());
        aad.extend_from_slice(&header);
        aad.extend_from_slice(caller_aad);

        let ciphertext = aead_encrypt(&keys.k_msg, &keys.nonce, plaintext, &aad);
        self.transcript = advance_transcript(&self.transcript, &header, &ciphertext);
        self.chain_key = next_chain_key;
        self.counter += 1;

        Envelope { header, ciphertext }
    }
}

/// Receiver-side cipher state (§4.7.1/§4.7.5): a chain key plus a bounded
/// replay window. `AuthFail` and `TranscriptMismatch` are terminal — the
/// caller must discard this state and re-establish a session on either.
pub struct ReceiverState {
    suite: String,
    chain_key: [u8; 32],
    highest_delivered: Option<u64>,
    replay_window_w: u32,
    gap_bound_g: u32,
    /// counter -> (chain_key at derivation time, keys), retained for exactly
    /// `replay_window_w` entries so out-of-order deliveries within the
    /// window can still decrypt without re-running the whole chain.
    cached: HashMap<u64, MessageKeys>,
    delivered: std::collections::HashSet<u64>,
    /// counter -> transcript state immediately after that counter was
    /// authenticated. Verifying message `n`'s claimed `transcript_in`
    /// against `transcript_after[n-1]` (rather than a single rolling
    /// pointer) is what makes transcript checking compatible with
    /// out-of-order delivery within the window: a message whose
    /// predecessor hasn't been seen yet simply can't be transcript-checked
    /// against it, so that check is deferred rather than failed.
    transcript_after: HashMap<u64, [u8; 32]>,
}

impl ReceiverState {
    pub fn init(shared_secret: &[u8; 32], replay_window_w: u32, gap_bound_g: u32) -> Self {
        let chain_key: [u8; 32] = hkdf_expand(shared_secret, b"H4LC3/chain");
        Self {
            suite: SUITE_AES256_GCM.to_string(),
            chain_key,
            highest_delivered: None,
            replay_window_w,
            gap_bound_g,
            cached: HashMap::new(),
            delivered: std::collections::HashSet::new(),
            transcript_after: HashMap::new(),
        }
    }

    fn within_window(&self, n: u64) -> bool {
        match self.highest_delivered {
            None => true,
            Some(h) => n + u64::from(self.replay_window_w) > h,
        }
    }

    fn evict_outside_window(&mut self) {
        let Some(h) = self.highest_delivered else { return };
        let w = u64::from(self.replay_window_w);
        // Mirrors `within_window`'s `n + w > h` test exactly (rather than
        // `n > h - w`) so counters near zero aren't evicted prematurely by
        // a saturating subtraction when `h < w`.
        let keep = |n: u64| n + w > h;
        self.cached.retain(|&n, _| keep(n));
        self.delivered.retain(|&n| keep(n));
        self.transcript_after.retain(|&n, _| keep(n));
    }

    /// Decrypt one envelope per the receive path (§4.7.5), steps 1-6.
    pub fn decrypt(&mut self, envelope: &Envelope, caller_aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let decoded = decode_header(&envelope.header)?;

        if decoded.suite != self.suite {
            return Err(CipherError::SuiteMismatch {
                configured: self.suite.clone(),
                header: decoded.suite.to_string(),
            });
        }

        let n = decoded.counter;

        if self.delivered.contains(&n) {
            return Err(CipherError::ReplayOrOutOfWindow(n));
        }
        if !self.within_window(n) {
            return Err(CipherError::ReplayOrOutOfWindow(n));
        }

        let mut aad = Vec::with_capacity(envelope.header.len() + caller_aad.len());
        aad.extend_from_slice(&envelope.header);
        aad.extend_from_slice(caller_aad);

        let keys = match self.highest_delivered {
            Some(h) if n <= h => self
                .cached
                .get(&n)
                .cloned()
                .ok_or(CipherError::ReplayOrOutOfWindow(n))?,
            _ => {
                let start = self.highest_delivered.map(|h| h + 1).unwrap_or(0);
                let gap = n.saturating_sub(start);
                if gap > u64::from(self.gap_bound_g) {
                    return Err(CipherError::GapTooLarge {
                        gap,
                        highest_delivered: self.highest_delivered.unwrap_or(0),
                        bound: u64::from(self.gap_bound_g),
                    });
                }
                let mut chain_key = self.chain_key;
                let mut target_keys = None;
                for i in start..=n {
                    let (keys, next) = derive_message_keys(&chain_key, i);
                    self.cached.insert(i, keys.clone());
                    chain_key = next;
                    if i == n {
                        target_keys = Some(keys);
                    }
                }
                self.chain_key = chain_key;
                target_keys.expect("loop always visits n")
            }
        };

        let plaintext = aead_decrypt(&keys.k_msg, &keys.nonce, &envelope.ciphertext, &aad)
            .ok_or(CipherError::AuthFail(n))?;

        let expected_predecessor = if n == 0 {
            Some([0u8; 32])
        } else {
            self.transcript_after.get(&(n - 1)).copied()
        };
        if let Some(expected) = expected_predecessor {
            if decoded.transcript_in != expected {
                return Err(CipherError::TranscriptMismatch);
            }
        }

        let post = advance_transcript(&decoded.transcript_in, &envelope.header, &envelope.ciphertext);
        self.transcript_after.insert(n, post);
        self.highest_delivered = Some(self.highest_delivered.map_or(n, |h| h.max(n)));
        self.delivered.insert(n);
        self.evict_outside_window();

        Ok(plaintext)
    }
}

/// Caller-supplied AAD binding a ciphertext to a specific container, track,
/// timestamp, and block index (§4.7.6). Reusing an encrypted CORE chunk
/// inside a different container fails authentication ("transplant
/// resistance") because `container_veri_hex` differs.
pub fn core_context(
    engine_id: &str,
    fingerprint: &[u8; 32],
    container_veri_hex: &str,
    track_id: u16,
    pts_ms: u64,
    chunk_index: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(engine_id.as_bytes());
    out.push(0x1F);
    out.extend_from_slice(fingerprint);
    out.push(0x1F);
    out.extend_from_slice(container_veri_hex.as_bytes());
    out.push(0x1F);
    out.extend_from_slice(&track_id.to_be_bytes());
    out.push(0x1F);
    out.extend_from_slice(&pts_ms.to_be_bytes());
    out.push(0x1F);
    out.extend_from_slice(&chunk_index.to_be_bytes());
    out
}
