//! Input-transaction views used by connect-level validation.

use capcore_types::{Transaction, H256};
use std::collections::HashMap;

/// A referenced transaction from the point of view of the block being
/// connected.
#[derive(Debug, Clone)]
pub struct TxData {
    /// The transaction.
    pub tx: Transaction,
    /// Height of the block containing it (the current height for in-block
    /// references).
    pub block_height: u64,
    /// Hash of the containing block (zero until known for in-block
    /// references).
    pub block_hash: H256,
    /// Index within the containing block.
    pub tx_index: u32,
    /// Spent flags per output, updated as the block's inputs are checked.
    pub spent: Vec<bool>,
}

impl TxData {
    /// Build an unspent view of a transaction.
    pub fn new(tx: Transaction, block_height: u64) -> Self {
        let spent = vec![false; tx.outputs.len()];
        Self {
            tx,
            block_height,
            block_hash: H256::ZERO,
            tx_index: 0,
            spent,
        }
    }

    /// Build a view with its full location.
    pub fn located(
        tx: Transaction,
        block_height: u64,
        block_hash: H256,
        tx_index: u32,
        spent: Vec<bool>,
    ) -> Self {
        Self {
            tx,
            block_height,
            block_hash,
            tx_index,
            spent,
        }
    }

    /// Whether every output is spent.
    pub fn fully_spent(&self) -> bool {
        self.spent.iter().all(|&s| s)
    }
}

/// All input transactions a block references, keyed by hash.
pub type TxStore = HashMap<H256, TxData>;
