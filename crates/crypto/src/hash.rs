//! SHA-256 family hash helpers.
//!
//! Block identifiers are double-SHA-256 digests; script-hash addressing and
//! plot-identity digests use Hash160 (RIPEMD-160 over SHA-256).

use crate::Hash;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Compute the SHA-256 digest of multiple slices without concatenating them.
#[inline]
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Compute `SHA256(SHA256(data))`, the block identifier digest.
#[inline]
pub fn double_sha256(data: &[u8]) -> Hash {
    sha256(&sha256(data))
}

/// Compute `RIPEMD160(SHA256(data))`, the 20-byte script-hash digest.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(sha256(data));
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}
