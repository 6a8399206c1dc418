//! Complete blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{merkle_root, BlockHeader, Error, ProposalArea, Result, Transaction, H256};

/// A block: header, proposal area and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Punishment proposals committed by `proposal_root`.
    pub proposals: ProposalArea,
    /// Transactions; the first must be the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Construct a block.
    pub fn new(header: BlockHeader, proposals: ProposalArea, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            proposals,
            transactions,
        }
    }

    /// The block hash (hash of the header).
    pub fn block_hash(&self) -> H256 {
        self.header.block_hash()
    }

    /// The block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Merkle root over transaction ids; witness form when `witness` is set.
    pub fn compute_transaction_root(&self, witness: bool) -> H256 {
        merkle_root(
            self.transactions
                .iter()
                .map(|tx| if witness { tx.witness_hash() } else { tx.tx_hash() })
                .collect(),
        )
    }

    /// Serialized size of the block in storage form.
    pub fn plain_size(&self) -> usize {
        self.encode().map(|b| b.len()).unwrap_or(usize::MAX)
    }

    /// Storage encoding, also used by the import/export stream.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Decode the storage encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block #{} ({}, {} txs)",
            self.header.height,
            self.block_hash(),
            self.transactions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodePubKey, NodeSignature, OutPoint, TxInput, TxOutput};
    use alloy_primitives::U256;
    use capcore_crypto::PrivateKey;
    use capcore_poc::{NativeProof, Proof};

    fn sample_block() -> Block {
        let sk = PrivateKey::from_bytes(&[41u8; 32]).unwrap();
        let mut coinbase = Transaction::new();
        coinbase.inputs.push(TxInput::new(OutPoint::null()));
        coinbase.outputs.push(TxOutput::new(100, vec![0, 32]));

        let mut header = BlockHeader {
            chain_id: H256::sha256(b"chain"),
            version: 1,
            height: 1,
            timestamp: 6000,
            previous: H256::sha256(b"genesis"),
            transaction_root: H256::ZERO,
            witness_root: H256::ZERO,
            proposal_root: H256::ZERO,
            target: U256::from(5u64),
            challenge: H256::sha256(b"challenge"),
            pub_key: NodePubKey::Secp(sk.public_key()),
            proof: Proof::Native(NativeProof::new(0, 0, 24)),
            signature: NodeSignature::Secp(sk.sign(b"x")),
            ban_list: Vec::new(),
            binding_root: H256::ZERO,
        };

        let block = Block::new(header.clone(), ProposalArea::new(), vec![coinbase]);
        header.transaction_root = block.compute_transaction_root(false);
        header.witness_root = block.compute_transaction_root(true);
        Block::new(header, block.proposals, block.transactions)
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let block = sample_block();
        let decoded = Block::decode(&block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.block_hash(), block.block_hash());
    }

    #[test]
    fn test_transaction_root_changes_with_content() {
        let mut block = sample_block();
        let root = block.compute_transaction_root(false);
        block.transactions[0].outputs[0].value += 1;
        assert_ne!(block.compute_transaction_root(false), root);
    }

    #[test]
    fn test_plain_size_positive() {
        assert!(sample_block().plain_size() > 0);
    }
}
