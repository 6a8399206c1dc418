//! The proposal area: double-signing punishment records.

use serde::{Deserialize, Serialize};

use crate::{merkle_root, BlockHeader, Error, NodePubKey, Result, H256};

/// Evidence that a public key signed two different headers at the same
/// height.
///
/// Once published in a block's punishment area the key appears in that
/// block's ban list, is recorded persistently, and any descendant block
/// built by it is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPubKey {
    /// The offending public key.
    pub pub_key: NodePubKey,
    /// The two conflicting headers signed by it.
    pub testimony: Box<[BlockHeader; 2]>,
}

impl FaultPubKey {
    /// Construct a record from two conflicting headers.
    pub fn new(pub_key: NodePubKey, first: BlockHeader, second: BlockHeader) -> Self {
        Self {
            pub_key,
            testimony: Box::new([first, second]),
        }
    }

    /// Height at which the double-signing happened.
    pub fn height(&self) -> u64 {
        self.testimony[0].height
    }

    /// Structural and cryptographic validity of the evidence.
    ///
    /// Both testimonies must be built by `pub_key`, at the same height,
    /// with different block hashes, and both signatures must verify.
    pub fn validate(&self) -> Result<()> {
        let [a, b] = self.testimony.as_ref();
        if a.pub_key != self.pub_key || b.pub_key != self.pub_key {
            return Err(Error::Decode("testimony key mismatch".into()));
        }
        if a.height != b.height {
            return Err(Error::Decode("testimony heights differ".into()));
        }
        if a.block_hash() == b.block_hash() {
            return Err(Error::Decode("testimonies are the same block".into()));
        }
        if !a.verify_sig() || !b.verify_sig() {
            return Err(Error::Decode("testimony signature invalid".into()));
        }
        Ok(())
    }

    /// Storage encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Decode the storage encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Hash identifying this record in the proposal merkle tree.
    pub fn hash(&self) -> Result<H256> {
        Ok(H256::double_sha256(&self.encode()?))
    }
}

/// The proposal area of a block; currently punishment records only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalArea {
    /// Fault-pubkey punishment records, pairwise with the header ban list.
    pub punishments: Vec<FaultPubKey>,
}

impl ProposalArea {
    /// An empty proposal area.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of punishment records.
    pub fn punishment_count(&self) -> usize {
        self.punishments.len()
    }

    /// Merkle root over the punishment records.
    pub fn merkle_root(&self) -> Result<H256> {
        let leaves = self
            .punishments
            .iter()
            .map(|p| p.hash())
            .collect::<Result<Vec<_>>>()?;
        Ok(merkle_root(leaves))
    }
}
