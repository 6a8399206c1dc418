//! # CapCore Proof of Capacity
//!
//! Two proof families coexist on the chain:
//!
//! - [`NativeProof`] - the native construction: a pair `(x, x')` of small
//!   integers in `bl`-bit form whose images under the plot function are a
//!   bit-flip pair matching the challenge.
//! - [`PosProof`] - an external plot-file construction verified through a
//!   [`PosQualityVerifier`], which recomputes a quality byte string from
//!   `(plot_id, proof, challenge, k)`.
//!
//! Every valid proof evaluates to a scalar *quality* used both for the
//! mining target comparison and for best-chain tie-breaks.

pub mod filter;
pub mod native;
pub mod pos;
pub mod quality;
pub mod verifier;

pub use filter::passes_plot_filter;
pub use native::NativeProof;
pub use pos::PosProof;
pub use quality::{hash_quality, plot_size};
pub use verifier::{PosQualityVerifier, SyntheticPosVerifier};

use alloy_primitives::U256;
use capcore_crypto::Hash;
use serde::{Deserialize, Serialize};

/// Seconds per proof slot; timestamps are compared at slot granularity.
pub const POC_SLOT: u64 = 3;

/// Smallest valid native proof bit length.
pub const MIN_NATIVE_BIT_LENGTH: usize = 24;

/// Largest valid native proof bit length.
pub const MAX_NATIVE_BIT_LENGTH: usize = 40;

/// Smallest valid PoS plot parameter `k`.
pub const MIN_POS_K: usize = 32;

/// Largest valid PoS plot parameter `k`.
pub const MAX_POS_K: usize = 50;

/// Post-fork quality multiplier compensating the plot-filter prior.
pub const QUALITY_CONSTANT_POST_FORK: u64 = 512;

/// Cross-family validity factor applied to PoS qualities.
pub const QUALITY_CONSTANT_POS_VALIDITY: f64 = 0.329;

/// Errors produced by proof decoding and verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PocError {
    /// Serialized proof has an invalid length.
    #[error("invalid data length on decode proof")]
    DecodeDataSize,

    /// Bit length outside the valid range for the family.
    #[error("invalid bit length")]
    InvalidBitLength,

    /// `x` and `x'` are not a bit-flip pair.
    #[error("invalid flip value")]
    InvalidFlipValue,

    /// Proof does not match the challenge.
    #[error("invalid challenge")]
    InvalidChallenge,

    /// PoS verifier returned an empty quality.
    #[error("empty pos quality")]
    EmptyPosQuality,

    /// Embedded plot id does not match the derived plot id.
    #[error("mismatched plot id")]
    MismatchedPlotId,

    /// Proof does not pass the plot filter.
    #[error("not passing plot filter")]
    NotPassingFilter,

    /// Operation applied to the wrong proof family.
    #[error("proof type mismatched")]
    TypeMismatch,

    /// External verifier failure.
    #[error("pos verifier: {0}")]
    Verifier(String),
}

/// Result alias for proof operations.
pub type Result<T> = std::result::Result<T, PocError>;

/// Discriminates the proof families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProofType {
    /// Native proof-of-capacity pair.
    Native = 0,
    /// External PoS plot-file proof.
    Pos = 1,
    /// Placeholder proof carried by synthetic headers; never minable.
    Empty = 0xff,
}

impl ProofType {
    /// Whether `bl` is a valid bit length (native) or plot `k` (pos).
    pub fn ensure_bit_length(&self, bl: usize) -> bool {
        match self {
            ProofType::Native => {
                (MIN_NATIVE_BIT_LENGTH..=MAX_NATIVE_BIT_LENGTH).contains(&bl) && bl % 2 == 0
            }
            ProofType::Pos => (MIN_POS_K..=MAX_POS_K).contains(&bl),
            ProofType::Empty => false,
        }
    }

    /// The single-byte tag used by binding scripts and codecs.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Parse a proof-type tag.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ProofType::Native),
            1 => Some(ProofType::Pos),
            0xff => Some(ProofType::Empty),
            _ => None,
        }
    }
}

/// A capacity proof: one of the two live families, or the empty placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proof {
    /// Native `(x, x')` pair proof.
    Native(NativeProof),
    /// External PoS plot-file proof.
    Pos(PosProof),
    /// Empty placeholder.
    Empty,
}

impl Proof {
    /// The family this proof belongs to.
    pub fn proof_type(&self) -> ProofType {
        match self {
            Proof::Native(_) => ProofType::Native,
            Proof::Pos(_) => ProofType::Pos,
            Proof::Empty => ProofType::Empty,
        }
    }

    /// Bit length (native) or plot parameter `k` (pos).
    pub fn bit_length(&self) -> usize {
        match self {
            Proof::Native(p) => p.bit_length(),
            Proof::Pos(p) => p.k as usize,
            Proof::Empty => usize::from(u8::MAX),
        }
    }

    /// Serialize the proof.
    ///
    /// Native proofs are a fixed 17 bytes; PoS proofs are self-describing
    /// with a trailing family tag; the empty proof encodes to nothing.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Proof::Native(p) => p.encode().to_vec(),
            Proof::Pos(p) => p.encode(),
            Proof::Empty => Vec::new(),
        }
    }

    /// Deserialize a proof, dispatching on the self-describing layout.
    pub fn decode(data: &[u8]) -> Result<Self> {
        match data.len() {
            0 => Ok(Proof::Empty),
            native::NATIVE_PROOF_LEN => Ok(Proof::Native(NativeProof::decode(data)?)),
            _ => Ok(Proof::Pos(PosProof::decode(data)?)),
        }
    }

    /// Verify this proof against `(plot_seed, challenge)`.
    ///
    /// `plot_seed` is the digest of the builder public key for native proofs
    /// and the plot id for PoS proofs; `filter` enables the plot-filter
    /// predicate.
    pub fn verify(
        &self,
        plot_seed: &Hash,
        challenge: &Hash,
        filter: bool,
        verifier: &dyn PosQualityVerifier,
    ) -> Result<()> {
        match self {
            Proof::Native(p) => p.verify(plot_seed, challenge, filter),
            Proof::Pos(p) => p.verify(challenge, filter, verifier).map(|_| ()),
            Proof::Empty => Ok(()),
        }
    }

    /// Verify the proof, then evaluate its quality.
    ///
    /// `slot` is `timestamp / POC_SLOT`; `post_fork` applies the 512x quality
    /// multiplier to native proofs (PoS proofs always carry it).
    pub fn verified_quality(
        &self,
        plot_seed: &Hash,
        challenge: &Hash,
        filter: bool,
        slot: u64,
        height: u64,
        post_fork: bool,
        verifier: &dyn PosQualityVerifier,
    ) -> Result<U256> {
        match self {
            Proof::Native(p) => {
                p.verify(plot_seed, challenge, filter)?;
                Ok(p.quality(slot, height, post_fork))
            }
            Proof::Pos(p) => {
                let quality_bytes = p.verify(challenge, filter, verifier)?;
                Ok(p.quality(&quality_bytes, slot, height))
            }
            Proof::Empty => Ok(U256::ZERO),
        }
    }
}

impl Default for Proof {
    fn default() -> Self {
        Proof::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_type_tags_roundtrip() {
        for pt in [ProofType::Native, ProofType::Pos, ProofType::Empty] {
            assert_eq!(ProofType::from_u8(pt.as_u8()), Some(pt));
        }
        assert_eq!(ProofType::from_u8(7), None);
    }

    #[test]
    fn test_native_bit_length_range() {
        assert!(ProofType::Native.ensure_bit_length(24));
        assert!(ProofType::Native.ensure_bit_length(40));
        assert!(!ProofType::Native.ensure_bit_length(25)); // odd
        assert!(!ProofType::Native.ensure_bit_length(22));
        assert!(!ProofType::Native.ensure_bit_length(42));
    }

    #[test]
    fn test_pos_k_range() {
        assert!(ProofType::Pos.ensure_bit_length(32));
        assert!(ProofType::Pos.ensure_bit_length(50));
        assert!(!ProofType::Pos.ensure_bit_length(31));
        assert!(!ProofType::Pos.ensure_bit_length(51));
    }

    #[test]
    fn test_empty_proof_encodes_to_nothing() {
        assert!(Proof::Empty.encode().is_empty());
        assert_eq!(Proof::decode(&[]).unwrap(), Proof::Empty);
    }
}
