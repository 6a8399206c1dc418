//! The seam to the external PoS proof verifier.

use capcore_crypto::{sha256_concat, Hash};

use crate::{PocError, Result};

/// Recomputes the quality string of a PoS plot-file proof.
///
/// The block-acceptance core does not interpret plot files; implementations
/// may be pure in-process code or link a native prover library. An empty
/// quality string means the proof does not answer the challenge.
pub trait PosQualityVerifier: Send + Sync {
    /// Verify `proof` for `(plot_id, challenge, k)` and return its quality
    /// string, empty when the proof is invalid for the challenge.
    fn verify_quality(
        &self,
        plot_id: &Hash,
        challenge: &Hash,
        proof: &[u8],
        k: u8,
    ) -> Result<Vec<u8>>;
}

/// A deterministic in-process verifier for tests and simnets.
///
/// A proof is considered valid iff it equals the digest chain produced by
/// [`SyntheticPosVerifier::make_proof`] for the same `(plot_id, challenge,
/// k)`; its quality string is a digest over the proof and challenge. This
/// stands in for a plot-file prover without any plot on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticPosVerifier;

impl SyntheticPosVerifier {
    /// Produce the unique proof bytes this verifier accepts for
    /// `(plot_id, challenge, k)`.
    pub fn make_proof(plot_id: &Hash, challenge: &Hash, k: u8) -> Vec<u8> {
        sha256_concat(&[b"pos-proof", plot_id, challenge, &[k]]).to_vec()
    }
}

impl PosQualityVerifier for SyntheticPosVerifier {
    fn verify_quality(
        &self,
        plot_id: &Hash,
        challenge: &Hash,
        proof: &[u8],
        k: u8,
    ) -> Result<Vec<u8>> {
        if proof.is_empty() {
            return Err(PocError::Verifier("empty proof".into()));
        }
        if proof != Self::make_proof(plot_id, challenge, k) {
            // Not an error: the proof simply has no quality for this challenge.
            return Ok(Vec::new());
        }
        Ok(sha256_concat(&[b"pos-quality", proof, challenge]).to_vec())
    }
}
