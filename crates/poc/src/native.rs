//! The native proof family.

use alloy_primitives::U256;
use capcore_crypto::{sha256_concat, Hash};
use serde::{Deserialize, Serialize};

use crate::{
    filter::passes_plot_filter, quality::hash_quality, PocError, ProofType, Result,
    QUALITY_CONSTANT_POST_FORK,
};

/// Serialized length of a native proof.
pub const NATIVE_PROOF_LEN: usize = 17;

/// A native proof: a pair `(x, x')` of `bl`-bit integers.
///
/// With plot seed `s` (the digest of the builder public key), a valid proof
/// satisfies
///
/// 1. `P(x; s, bl) == flip(P(x'; s, bl), bl)` - the images are a bit-flip
///    pair, and
/// 2. `F(x, x'; s, bl) == challenge mod 2^bl` - the pair answers the current
///    challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeProof {
    /// First element of the pair, in `bl`-bit range.
    pub x: u64,
    /// Second element of the pair, in `bl`-bit range.
    pub x_prime: u64,
    /// Bit length; even, in `[24, 40]`.
    pub bl: u8,
}

impl NativeProof {
    /// Construct a proof, masking the pair into `bl`-bit range.
    pub fn new(x: u64, x_prime: u64, bl: u8) -> Self {
        let mask = bit_mask(bl as usize);
        Self {
            x: x & mask,
            x_prime: x_prime & mask,
            bl,
        }
    }

    /// Bit length of the underlying plot.
    pub fn bit_length(&self) -> usize {
        self.bl as usize
    }

    /// Encode to 17 bytes: `x(LE8) || x'(LE8) || bl`.
    pub fn encode(&self) -> [u8; NATIVE_PROOF_LEN] {
        let mut out = [0u8; NATIVE_PROOF_LEN];
        out[..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..16].copy_from_slice(&self.x_prime.to_le_bytes());
        out[16] = self.bl;
        out
    }

    /// Decode from the 17-byte layout, masking values to `bl` bits.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != NATIVE_PROOF_LEN {
            return Err(PocError::DecodeDataSize);
        }
        let x = u64::from_le_bytes(data[..8].try_into().expect("8 bytes"));
        let x_prime = u64::from_le_bytes(data[8..16].try_into().expect("8 bytes"));
        Ok(Self::new(x, x_prime, data[16]))
    }

    /// Verify the proof against `(plot_seed, challenge)`.
    pub fn verify(&self, plot_seed: &Hash, challenge: &Hash, filter: bool) -> Result<()> {
        let bl = self.bl as usize;
        if !ProofType::Native.ensure_bit_length(bl) {
            return Err(PocError::InvalidBitLength);
        }

        if filter && !passes_plot_filter(plot_seed, challenge) {
            return Err(PocError::NotPassingFilter);
        }

        let y = plot_p(self.x, bl, plot_seed);
        let y_prime = plot_p(self.x_prime, bl, plot_seed);
        if y != flip_value(y_prime, bl) {
            return Err(PocError::InvalidFlipValue);
        }

        let z = plot_f(self.x, self.x_prime, bl, plot_seed);
        if z != cut_hash(challenge, bl) {
            return Err(PocError::InvalidChallenge);
        }

        Ok(())
    }

    /// Quality of the proof for `(slot, height)`.
    ///
    /// `Q1 = bl * 2^bl`, multiplied by 512 once the full fork is active, over
    /// `256 - log2(H)` with `H` the proof hash value.
    pub fn quality(&self, slot: u64, height: u64, post_fork: bool) -> U256 {
        let bl = self.bl as usize;
        let mut q1 = (1u128 << bl) as f64 * bl as f64;
        if post_fork {
            q1 *= QUALITY_CONSTANT_POST_FORK as f64;
        }
        hash_quality(q1, &self.hash_val(slot, height))
    }

    /// `SHA256(slot || x || x' || height)` over a fixed 32-byte layout:
    /// slot LE8 at 0, the `bl`-bit pair at 8 and 16, height LE8 at 24.
    pub fn hash_val(&self, slot: u64, height: u64) -> Hash {
        let mut buf = [0u8; 32];
        buf[..8].copy_from_slice(&slot.to_le_bytes());
        let nbytes = (self.bl as usize + 7) / 8;
        buf[8..8 + nbytes].copy_from_slice(&self.x.to_le_bytes()[..nbytes]);
        buf[16..16 + nbytes].copy_from_slice(&self.x_prime.to_le_bytes()[..nbytes]);
        buf[24..].copy_from_slice(&height.to_le_bytes());
        capcore_crypto::sha256(&buf)
    }
}

/// All-ones mask of `bl` bits.
fn bit_mask(bl: usize) -> u64 {
    if bl >= 64 {
        u64::MAX
    } else {
        (1u64 << bl) - 1
    }
}

/// The plot function `P`: a `bl`-bit image of `x` under the plot seed.
fn plot_p(x: u64, bl: usize, seed: &Hash) -> u64 {
    let digest = sha256_concat(&[&x.to_le_bytes(), seed]);
    u64::from_le_bytes(digest[..8].try_into().expect("8 bytes")) & bit_mask(bl)
}

/// The pairing function `F` over `(x, x')`.
fn plot_f(x: u64, x_prime: u64, bl: usize, seed: &Hash) -> u64 {
    let digest = sha256_concat(&[&x.to_le_bytes(), &x_prime.to_le_bytes(), seed]);
    u64::from_le_bytes(digest[..8].try_into().expect("8 bytes")) & bit_mask(bl)
}

/// Bit-flip of a `bl`-bit value: `v XOR (2^bl - 1)`.
pub fn flip_value(v: u64, bl: usize) -> u64 {
    v ^ bit_mask(bl)
}

/// The challenge truncated to its top `bl` bits.
pub fn cut_hash(challenge: &Hash, bl: usize) -> u64 {
    let top = u64::from_be_bytes(challenge[..8].try_into().expect("8 bytes"));
    top >> (64 - bl)
}

/// Search a seed's full plot for a pair answering `challenge`.
///
/// Exhaustive over the `2^bl` space, so only usable for the small bit
/// lengths test fixtures run at. Real miners precompute the plot.
pub fn solve(plot_seed: &Hash, challenge: &Hash, bl: usize) -> Option<NativeProof> {
    let target = cut_hash(challenge, bl);
    let space = 1u64 << bl;
    // Index images by value so the flip pair lookup is O(1).
    let mut by_image = std::collections::HashMap::with_capacity(space as usize);
    for x in 0..space {
        by_image.insert(plot_p(x, bl, plot_seed), x);
    }
    for x in 0..space {
        let y = plot_p(x, bl, plot_seed);
        if let Some(&x_prime) = by_image.get(&flip_value(y, bl)) {
            if plot_f(x, x_prime, bl, plot_seed) == target {
                return Some(NativeProof::new(x, x_prime, bl as u8));
            }
        }
    }
    None
}
