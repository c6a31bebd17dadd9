//! Canonical JSON encoding for every JSON-payload chunk (`TRAK`, `META`,
//! `SAFE`, `VERI`).
//!
//! Determinism (§4.3) requires byte-identical output for identical input.
//! `serde_json::Map` is backed by a `BTreeMap` (sorted by key) as long as
//! the `preserve_order` feature is not enabled anywhere in the dependency
//! graph — this crate never enables it, so `serde_json::to_vec` already
//! produces sorted-key, whitespace-free, UTF-8 output satisfying the
//! "canonical JSON" design note in spec §9. This module exists so that
//! invariant is named and tested in one place rather than relied upon
//! implicitly at every call site.

use serde::Serialize;
use serde_json::Error as JsonError;

/// Serialize `value` to its canonical byte representation: sorted keys, no
/// insignificant whitespace, UTF-8, RFC 8259 escaping.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, JsonError> {
    serde_json::to_vec(value)
}

/// Parse canonical (or any valid) JSON bytes into `T`. Unknown fields are
/// the caller's concern — types that must round-trip untouched fields
/// verbatim should use `#[serde(flatten)]` with a `serde_json::Map` catch-all.
pub fn from_bytes<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, JsonError> {
    serde_json::from_slice(bytes)
}
