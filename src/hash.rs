//! Hash/CRC/KDF primitives shared by every other module (C1).
//!
//! - SHA-256: VERI whole-file integrity (I9) and cipher attestation hashes.
//! - CRC-32: per-chunk and whole-container integrity (I2/I3).
//! - HKDF-SHA-256: cipher key schedule (root/chain/message/nonce derivation).
//!
//! Nothing here reads the wall clock or touches the filesystem; these are
//! pure functions over byte slices, matching the reference crate's own
//! `crc32fast`-only usage in `block.rs`/`superblock.rs`.

use crc32fast::Hasher as Crc32Hasher;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

/// CRC-32 (IEEE 802.3 polynomial, via `crc32fast`) over a single buffer.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    let mut h = Crc32Hasher::new();
    h.update(data);
    h.finalize()
}

/// CRC-32 accumulated over several buffers in order, without concatenating
/// them first. Used for `ContainerCRC32` (I3), which covers every preceding
/// chunk's bytes without materializing the whole file.
pub fn crc32_chain<'a, I: IntoIterator<Item = &'a [u8]>>(parts: I) -> u32 {
    let mut h = Crc32Hasher::new();
    for part in parts {
        h.update(part);
    }
    h.finalize()
}

/// SHA-256 of a single buffer.
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

/// SHA-256 accumulated over several buffers in order (used by VERI, which
/// hashes the concatenation of every preceding chunk's canonical byte range
/// without requiring the caller to allocate that concatenation).
pub fn sha256_chain<'a, I: IntoIterator<Item = &'a [u8]>>(parts: I) -> [u8; 32] {
    let mut h = Sha256::new();
    for part in parts {
        h.update(part);
    }
    h.finalize().into()
}

/// HKDF-SHA-256 over `ikm`, with empty salt, expanding `info` into exactly
/// `N` output bytes. Used throughout the cipher's key schedule (§4.7.1/4.7.2).
///
/// Panics only if `N` exceeds HKDF-SHA-256's maximum output (255 * 32 bytes),
/// which no caller in this crate ever approaches — an internal contract
/// violation, not a runtime condition callers need to handle.
pub fn hkdf_expand<const N: usize>(ikm: &[u8], info: &[u8]) -> [u8; N] {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; N];
    hk.expand(info, &mut out)
        .expect("HKDF output length must fit within RFC 5869 bounds");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_chained_and_flat() {
        let a = b"hello, ";
        let b = b"world!";
        let mut flat = Vec::new();
        flat.extend_from_slice(a);
        flat.extend_from_slice(b);
        assert_eq!(crc32(&flat), crc32_chain([a.as_slice(), b.as_slice()]));
    }

    #[test]
    fn sha256_matches_chained_and_flat() {
        let a = b"abc";
        let b = b"def";
        let mut flat = Vec::new();
        flat.extend_from_slice(a);
        flat.extend_from_slice(b);
        assert_eq!(sha256(&flat), sha256_chain([a.as_slice(), b.as_slice()]));
    }

    #[test]
    fn hkdf_is_deterministic_and_domain_separated() {
        let ikm = [0x42u8; 32];
        let a: [u8; 32] = hkdf_expand(&ikm, b"H4LC3/root");
        let b: [u8; 32] = hkdf_expand(&ikm, b"H4LC3/root");
        let c: [u8; 32] = hkdf_expand(&ikm, b"H4LC3/chain");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
