//! The external PoS plot-file proof family.

use alloy_primitives::U256;
use capcore_crypto::{sha256_concat, BlsPublicKey, Hash};
use serde::{Deserialize, Serialize};

use crate::{
    filter::passes_plot_filter, quality::hash_quality, verifier::PosQualityVerifier, PocError,
    ProofType, Result, QUALITY_CONSTANT_POST_FORK, QUALITY_CONSTANT_POS_VALIDITY,
};

/// Minimum serialized length: `k || plot_id || pool_pk || plot_pk || len || tag`.
const POS_PROOF_MIN_LEN: usize = 1 + 32 + 48 + 48 + 2 + 1;

/// A self-describing PoS plot-file proof.
///
/// The proof bytes come straight out of the plot file; the chain never
/// interprets them, it only hands them to the [`PosQualityVerifier`] which
/// recomputes the quality string for the current challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosProof {
    /// Plot parameter, in `[32, 50]`.
    pub k: u8,
    /// Embedded plot identity; must match the identity derived from the keys.
    pub plot_id: Hash,
    /// Pool public key the plot was created for.
    pub pool_pk: BlsPublicKey,
    /// Per-plot public key.
    pub plot_pk: BlsPublicKey,
    /// Raw proof bytes from the plot file.
    pub proof: Vec<u8>,
}

impl PosProof {
    /// The plot identity derived from the embedded keys.
    ///
    /// `SHA256(pool_pk || plot_pk)`; binding targets and the plot filter key
    /// off this digest.
    pub fn derived_plot_id(&self) -> Hash {
        sha256_concat(&[&self.pool_pk.to_bytes(), &self.plot_pk.to_bytes()])
    }

    /// Encode: `k || plot_id(32) || pool_pk(48) || plot_pk(48) ||
    /// proof_len(u16 LE) || proof || tag`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(POS_PROOF_MIN_LEN + self.proof.len());
        out.push(self.k);
        out.extend_from_slice(&self.plot_id);
        out.extend_from_slice(&self.pool_pk.to_bytes());
        out.extend_from_slice(&self.plot_pk.to_bytes());
        out.extend_from_slice(&(self.proof.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.proof);
        out.push(ProofType::Pos.as_u8());
        out
    }

    /// Decode the layout produced by [`PosProof::encode`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < POS_PROOF_MIN_LEN {
            return Err(PocError::DecodeDataSize);
        }
        if data[data.len() - 1] != ProofType::Pos.as_u8() {
            return Err(PocError::TypeMismatch);
        }
        let k = data[0];
        let mut plot_id = [0u8; 32];
        plot_id.copy_from_slice(&data[1..33]);
        let pool_pk = BlsPublicKey::from_bytes(&data[33..81])
            .map_err(|e| PocError::Verifier(e.to_string()))?;
        let plot_pk = BlsPublicKey::from_bytes(&data[81..129])
            .map_err(|e| PocError::Verifier(e.to_string()))?;
        let proof_len = u16::from_le_bytes(data[129..131].try_into().expect("2 bytes")) as usize;
        if data.len() != POS_PROOF_MIN_LEN + proof_len {
            return Err(PocError::DecodeDataSize);
        }
        let proof = data[131..131 + proof_len].to_vec();
        Ok(Self {
            k,
            plot_id,
            pool_pk,
            plot_pk,
            proof,
        })
    }

    /// Verify the proof and return the verifier's quality string.
    ///
    /// Valid iff the plot parameter is in range, the embedded plot id
    /// matches the derived one, the plot filter passes (when enabled), and
    /// the external verifier returns a non-empty quality.
    pub fn verify(
        &self,
        challenge: &Hash,
        filter: bool,
        verifier: &dyn PosQualityVerifier,
    ) -> Result<Vec<u8>> {
        if !ProofType::Pos.ensure_bit_length(self.k as usize) {
            return Err(PocError::InvalidBitLength);
        }
        if self.plot_id != self.derived_plot_id() {
            return Err(PocError::MismatchedPlotId);
        }
        if filter && !passes_plot_filter(&self.plot_id, challenge) {
            return Err(PocError::NotPassingFilter);
        }
        let quality = verifier.verify_quality(&self.plot_id, challenge, &self.proof, self.k)?;
        if quality.is_empty() {
            return Err(PocError::EmptyPosQuality);
        }
        Ok(quality)
    }

    /// Quality of the proof for `(slot, height)` given the verifier's
    /// quality string.
    ///
    /// `Q1 = 4 * (2k+1) * 2^(k-1) * 512 * 0.329` over `256 - log2(H)` with
    /// `H = SHA256(slot || quality_bytes || height)`.
    pub fn quality(&self, quality_bytes: &[u8], slot: u64, height: u64) -> U256 {
        let k = self.k as u32;
        let q1 = (1u128 << (k - 1)) as f64
            * 4.0
            * (2 * k + 1) as f64
            * QUALITY_CONSTANT_POST_FORK as f64
            * QUALITY_CONSTANT_POS_VALIDITY;
        hash_quality(q1, &hash_val_pos(quality_bytes, slot, height))
    }
}

/// `SHA256(slot LE8 || quality_bytes || height LE8)`.
fn hash_val_pos(quality_bytes: &[u8], slot: u64, height: u64) -> Hash {
    sha256_concat(&[&slot.to_le_bytes(), quality_bytes, &height.to_le_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::SyntheticPosVerifier;
    use capcore_crypto::BlsPrivateKey;

    fn sample_keys() -> (BlsPublicKey, BlsPublicKey) {
        (
            BlsPrivateKey::from_seed(&[5u8; 32]).public_key(),
            BlsPrivateKey::from_seed(&[6u8; 32]).public_key(),
        )
    }

    fn sample_proof(challenge: &Hash) -> PosProof {
        let (pool_pk, plot_pk) = sample_keys();
        let plot_id = sha256_concat(&[&pool_pk.to_bytes(), &plot_pk.to_bytes()]);
        PosProof {
            k: 32,
            plot_id,
            pool_pk,
            plot_pk,
            proof: SyntheticPosVerifier::make_proof(&plot_id, challenge, 32),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let proof = sample_proof(&challenge);
        let decoded = PosProof::decode(&proof.encode()).unwrap();
        assert_eq!(proof, decoded);
    }

    #[test]
    fn test_decode_rejects_bad_tag() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let mut data = sample_proof(&challenge).encode();
        *data.last_mut().unwrap() = 0;
        assert!(PosProof::decode(&data).is_err());
    }

    #[test]
    fn test_verify_against_synthetic_verifier() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let proof = sample_proof(&challenge);
        let verifier = SyntheticPosVerifier;
        let quality = proof.verify(&challenge, false, &verifier).unwrap();
        assert!(!quality.is_empty());
    }

    #[test]
    fn test_verify_rejects_wrong_challenge() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let other = capcore_crypto::sha256(b"other");
        let proof = sample_proof(&challenge);
        assert!(proof.verify(&other, false, &SyntheticPosVerifier).is_err());
    }

    #[test]
    fn test_verify_rejects_forged_plot_id() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let mut proof = sample_proof(&challenge);
        proof.plot_id = capcore_crypto::sha256(b"forged");
        assert_eq!(
            proof.verify(&challenge, false, &SyntheticPosVerifier),
            Err(PocError::MismatchedPlotId)
        );
    }

    #[test]
    fn test_k_out_of_range_rejected() {
        let challenge = capcore_crypto::sha256(b"challenge");
        let mut proof = sample_proof(&challenge);
        proof.k = 31;
        assert_eq!(
            proof.verify(&challenge, false, &SyntheticPosVerifier),
            Err(PocError::InvalidBitLength)
        );
    }
}
