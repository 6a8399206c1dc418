//! Block headers and their codec modes.

use alloy_primitives::U256;
use capcore_poc::{Proof, POC_SLOT};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ByteWriter, Error, NodePubKey, NodeSignature, Result, H256};

/// First block version; native proofs only.
pub const BLOCK_VERSION_V1: u64 = 1;

/// Second block version; adds PoS proofs and the binding root commitment.
pub const BLOCK_VERSION_V2: u64 = 2;

/// Header serialization modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    /// Every field in fixed order; hashed into the block id.
    Id,
    /// `Id` without the signature, so the signature can cover the digest.
    Poc,
    /// `Poc` without the chain id; the genesis-only self-hash input.
    ChainId,
    /// Storage form used by the database and the import/export stream.
    Db,
}

/// A block header.
///
/// `chain_id` equals the double hash of the genesis header in `ChainId`
/// mode and is constant across the chain. `binding_root` commits to the
/// binding state trie after this block's effects and must be zero on V1
/// headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Chain identifier.
    pub chain_id: H256,
    /// Header version; >= 2 from the warm-up fork height on.
    pub version: u64,
    /// Block height; parent height + 1, or 0 for genesis.
    pub height: u64,
    /// Unix timestamp, second precision.
    pub timestamp: u64,
    /// Parent header hash; zero for genesis.
    pub previous: H256,
    /// Merkle root over transaction ids.
    pub transaction_root: H256,
    /// Merkle root over witness transaction ids.
    pub witness_root: H256,
    /// Merkle root over the proposal area.
    pub proposal_root: H256,
    /// Difficulty target the proof quality must reach.
    pub target: U256,
    /// Proof challenge, derived from ancestor headers.
    pub challenge: H256,
    /// Builder public key; family matches the proof.
    pub pub_key: NodePubKey,
    /// Capacity proof.
    pub proof: Proof,
    /// Signature over the PoC digest.
    pub signature: NodeSignature,
    /// Public keys newly banned by this block, pairwise with the
    /// punishment area.
    pub ban_list: Vec<NodePubKey>,
    /// Binding trie root after this block (V2); zero on V1.
    pub binding_root: H256,
}

impl BlockHeader {
    /// Encode the header in the given mode.
    ///
    /// `ChainId` mode is only defined for genesis headers.
    pub fn encode(&self, mode: CodecMode) -> Result<Vec<u8>> {
        match mode {
            CodecMode::Db => {
                bincode::serialize(self).map_err(|e| Error::Decode(e.to_string()))
            }
            CodecMode::ChainId if self.height != 0 => Err(Error::InvalidCodecMode(
                "chain id is only computed for the genesis header".into(),
            )),
            _ => Ok(self.wire_encode(mode)),
        }
    }

    /// Decode a header from its `Db` form.
    pub fn decode(bytes: &[u8], mode: CodecMode) -> Result<Self> {
        match mode {
            CodecMode::Db => {
                bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))
            }
            _ => Err(Error::InvalidCodecMode(
                "only the Db mode is decodable".into(),
            )),
        }
    }

    fn wire_encode(&self, mode: CodecMode) -> Vec<u8> {
        let mut w = ByteWriter::new();
        if mode != CodecMode::ChainId {
            w.put_hash(&self.chain_id);
        }
        w.put_u64_le(self.version);
        w.put_u64_le(self.height);
        w.put_u64_le(self.timestamp);
        w.put_hash(&self.previous);
        w.put_hash(&self.transaction_root);
        w.put_hash(&self.witness_root);
        w.put_hash(&self.proposal_root);
        w.put_var_bytes(&self.target.to_be_bytes_trimmed_vec());
        w.put_hash(&self.challenge);
        w.put_var_bytes(&self.pub_key.serialize());
        w.put_var_bytes(&self.proof.encode());
        if mode == CodecMode::Id {
            w.put_var_bytes(&self.signature.serialize());
        }
        w.put_u16_le(self.ban_list.len() as u16);
        for pk in &self.ban_list {
            w.put_var_bytes(&pk.serialize());
        }
        if self.version >= BLOCK_VERSION_V2 {
            w.put_hash(&self.binding_root);
        }
        w.into_bytes()
    }

    /// The block identifier: double SHA-256 of the `Id` encoding.
    pub fn block_hash(&self) -> H256 {
        H256::double_sha256(&self.wire_encode(CodecMode::Id))
    }

    /// The PoC digest: double SHA-256 of the `Poc` encoding (signature
    /// excluded).
    pub fn poc_hash(&self) -> H256 {
        H256::double_sha256(&self.wire_encode(CodecMode::Poc))
    }

    /// The message actually signed: `SHA256(poc_hash)`.
    pub fn poc_digest(&self) -> [u8; 32] {
        capcore_crypto::sha256(self.poc_hash().as_bytes())
    }

    /// Compute the chain id from a genesis header.
    pub fn compute_chain_id(&self) -> Result<H256> {
        Ok(H256::double_sha256(&self.encode(CodecMode::ChainId)?))
    }

    /// Verify the header signature over the PoC digest.
    pub fn verify_sig(&self) -> bool {
        let digest = self.poc_digest();
        match (&self.signature, &self.pub_key) {
            (NodeSignature::Secp(sig), NodePubKey::Secp(pk)) => sig.verify_hash(&digest, pk),
            (NodeSignature::Bls(sig), NodePubKey::Bls(pk)) => sig.verify(&digest, pk),
            _ => false,
        }
    }

    /// Proof slot of this header's timestamp.
    pub fn slot(&self) -> u64 {
        self.timestamp / POC_SLOT
    }

    /// Plot seed for proof verification: SHA-256 of the serialized builder
    /// public key.
    pub fn plot_seed(&self) -> [u8; 32] {
        capcore_crypto::sha256(&self.pub_key.serialize())
    }

    /// Version-dependent structural constraints.
    ///
    /// V1 headers carry secp keys, native proofs and an empty binding root;
    /// V2 headers pair the key and signature family with the proof family.
    pub fn check_version_constraint(&self) -> Result<()> {
        let fail = |reason: &str| Err(Error::Decode(format!("header constraint: {reason}")));
        match self.version {
            0 => fail("version zero"),
            BLOCK_VERSION_V1 => {
                if !self.pub_key.is_secp() {
                    return fail("v1 requires a secp public key");
                }
                if self.proof.proof_type() != capcore_poc::ProofType::Native {
                    return fail("v1 allows only native proofs");
                }
                if !matches!(self.signature, NodeSignature::Secp(_)) {
                    return fail("v1 requires a secp signature");
                }
                if self.ban_list.iter().any(|pk| !pk.is_secp()) {
                    return fail("v1 ban list must hold secp keys");
                }
                if !self.binding_root.is_zero() {
                    return fail("v1 requires an empty binding root");
                }
                Ok(())
            }
            _ => match self.proof.proof_type() {
                capcore_poc::ProofType::Native => {
                    if !self.pub_key.is_secp() || !matches!(self.signature, NodeSignature::Secp(_))
                    {
                        return fail("native proofs require secp key material");
                    }
                    Ok(())
                }
                capcore_poc::ProofType::Pos => {
                    if !self.pub_key.is_bls() || !matches!(self.signature, NodeSignature::Bls(_)) {
                        return fail("pos proofs require bls key material");
                    }
                    Ok(())
                }
                capcore_poc::ProofType::Empty => fail("empty proof is not minable"),
            },
        }
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "header #{} ({}, previous {})",
            self.height,
            self.block_hash(),
            self.previous
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_crypto::PrivateKey;
    use capcore_poc::NativeProof;

    fn sample_header() -> (BlockHeader, PrivateKey) {
        let sk = PrivateKey::from_bytes(&[21u8; 32]).unwrap();
        let mut header = BlockHeader {
            chain_id: H256::sha256(b"chain"),
            version: BLOCK_VERSION_V1,
            height: 10,
            timestamp: 90_000,
            previous: H256::sha256(b"previous"),
            transaction_root: H256::sha256(b"txroot"),
            witness_root: H256::sha256(b"witroot"),
            proposal_root: H256::sha256(b"proot"),
            target: U256::from(1_000u64),
            challenge: H256::sha256(b"challenge"),
            pub_key: NodePubKey::Secp(sk.public_key()),
            proof: Proof::Native(NativeProof::new(3, 5, 24)),
            signature: NodeSignature::Secp(sk.sign(b"placeholder")),
            ban_list: Vec::new(),
            binding_root: H256::ZERO,
        };
        let digest = header.poc_digest();
        header.signature = NodeSignature::Secp(sk.sign_hash(&digest));
        (header, sk)
    }

    #[test]
    fn test_db_roundtrip() {
        let (header, _) = sample_header();
        let bytes = header.encode(CodecMode::Db).unwrap();
        let decoded = BlockHeader::decode(&bytes, CodecMode::Db).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.block_hash(), header.block_hash());
    }

    #[test]
    fn test_poc_mode_excludes_signature() {
        let (mut header, sk) = sample_header();
        let before = header.poc_hash();
        let id_before = header.block_hash();
        header.signature = NodeSignature::Secp(sk.sign(b"different"));
        assert_eq!(header.poc_hash(), before);
        assert_ne!(header.block_hash(), id_before);
    }

    #[test]
    fn test_signature_verifies() {
        let (header, _) = sample_header();
        assert!(header.verify_sig());
        let mut tampered = header.clone();
        tampered.height += 1;
        assert!(!tampered.verify_sig());
    }

    #[test]
    fn test_chain_id_only_for_genesis() {
        let (header, _) = sample_header();
        assert!(header.compute_chain_id().is_err());
        let mut genesis = header;
        genesis.height = 0;
        assert!(genesis.compute_chain_id().is_ok());
    }

    #[test]
    fn test_v1_constraints() {
        let (header, _) = sample_header();
        assert!(header.check_version_constraint().is_ok());

        let mut bad = header.clone();
        bad.binding_root = H256::sha256(b"root");
        assert!(bad.check_version_constraint().is_err());

        let mut bad = header;
        bad.version = 0;
        assert!(bad.check_version_constraint().is_err());
    }

    #[test]
    fn test_v2_appends_binding_root_to_id() {
        let (mut header, sk) = sample_header();
        header.version = BLOCK_VERSION_V2;
        header.binding_root = H256::sha256(b"binding");
        let digest = header.poc_digest();
        header.signature = NodeSignature::Secp(sk.sign_hash(&digest));
        let id = header.block_hash();
        header.binding_root = H256::sha256(b"other");
        assert_ne!(header.block_hash(), id);
    }

    #[test]
    fn test_slot_granularity() {
        let (mut header, _) = sample_header();
        header.timestamp = 30_000;
        assert_eq!(header.slot(), 10_000);
        header.timestamp = 30_002;
        assert_eq!(header.slot(), 10_000);
        header.timestamp = 30_003;
        assert_eq!(header.slot(), 10_001);
    }
}
