//! Quality evaluation shared by both proof families.
//!
//! The standard quality of a proof is `(H / 2^256) ^ (1 / Q1)` for a hash
//! value `H`; the chain uses the equivalent monotone form
//! `quality = Q1 / (256 - log2(H))`, so more capacity yields a higher
//! expected quality. A block is acceptable when `quality >= target`.

use alloy_primitives::U256;
use capcore_crypto::Hash;

use crate::ProofType;

/// Plot size in bytes for a family/bit-length pair; zero for invalid input.
pub fn plot_size(proof_type: ProofType, bl: usize) -> u64 {
    if !proof_type.ensure_bit_length(bl) {
        return 0;
    }
    match proof_type {
        ProofType::Native => (bl as u64) << (bl - 2),
        ProofType::Pos => (2 * bl as u64 + 1) << (bl - 1),
        ProofType::Empty => 0,
    }
}

/// Evaluate `Q1 / (256 - log2(H))` over a 32-byte hash value, floored into
/// an integer quality.
pub fn hash_quality(q1: f64, hash_val: &Hash) -> U256 {
    let log2_h = match log2_be_bytes(hash_val) {
        Some(v) => v,
        None => return U256::ZERO, // H == 0
    };
    let q2 = 256.0 - log2_h;
    if q2 <= 0.0 {
        return U256::ZERO;
    }
    let quality = q1 / q2;
    if quality <= 0.0 {
        return U256::ZERO;
    }
    U256::from(quality as u128)
}

/// log2 of a big-endian 256-bit integer, or `None` for zero.
///
/// The top eight bytes of the value are lifted into an `f64`, which is exact
/// far beyond the precision the quality quotient can observe.
fn log2_be_bytes(bytes: &Hash) -> Option<f64> {
    let first = bytes.iter().position(|&b| b != 0)?;
    let end = (first + 8).min(32);
    let mut top = 0u64;
    for &b in &bytes[first..end] {
        top = (top << 8) | b as u64;
    }
    // value = top * 2^(8 * trailing bytes)
    Some((top as f64).log2() + (8 * (32 - end)) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_sizes() {
        // native: bl * 2^(bl-2)
        assert_eq!(plot_size(ProofType::Native, 24), 24 << 22);
        // pos: (2k+1) * 2^(k-1)
        assert_eq!(plot_size(ProofType::Pos, 32), 65u64 << 31);
        assert_eq!(plot_size(ProofType::Native, 23), 0);
        assert_eq!(plot_size(ProofType::Empty, 24), 0);
    }

    #[test]
    fn test_log2_of_powers_of_two() {
        let mut h = [0u8; 32];
        h[31] = 1; // H = 1, log2 = 0
        assert_eq!(log2_be_bytes(&h), Some(0.0));

        let mut h = [0u8; 32];
        h[0] = 0x80; // H = 2^255
        assert_eq!(log2_be_bytes(&h), Some(255.0));
    }

    #[test]
    fn test_zero_hash_has_zero_quality() {
        assert_eq!(hash_quality(1000.0, &[0u8; 32]), U256::ZERO);
    }

    #[test]
    fn test_quality_grows_with_hash_value() {
        let mut low = [0u8; 32];
        low[16] = 1; // small H -> small quality
        let mut high = [0u8; 32];
        high[0] = 0xff; // large H -> large quality
        let q_low = hash_quality(1_000_000.0, &low);
        let q_high = hash_quality(1_000_000.0, &high);
        assert!(q_high > q_low);
    }

    #[test]
    fn test_quality_scales_with_q1() {
        let mut h = [0u8; 32];
        h[0] = 0x01;
        let q1 = hash_quality(1_000.0, &h);
        let q2 = hash_quality(2_000.0, &h);
        assert!(q2 >= q1 * U256::from(2) - U256::from(1));
    }
}
