//! The per-script-hash transaction indexer.
//!
//! For every connected block, every output created or consumed is
//! classified; holders of pay-to-witness-script-hash, staking and binding
//! outputs get an index entry `(script_hash, height, tx index, tx size)`.
//! Detaching a block during a reorg removes exactly the entries its height
//! contributed.

use capcore_script::{script_info, ScriptClass};
use capcore_storage::{ChainDb, WriteBatch};
use capcore_types::{Block, Transaction};
use std::collections::HashSet;

use crate::error::{ConnectError, Result};
use crate::txstore::TxStore;

/// The address indexer; stateless over the chain database.
pub struct AddrIndexer {
    db: ChainDb,
}

impl AddrIndexer {
    /// Build an indexer over `db`.
    pub fn new(db: ChainDb) -> Self {
        Self { db }
    }

    /// Stage index entries for a block being attached.
    pub fn stage_attach(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        tx_store: &TxStore,
    ) -> Result<()> {
        let height = block.height();
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let tx_size = tx.plain_size() as u32;
            for script_hash in involved_script_hashes(tx, tx_store)? {
                self.db
                    .stage_script_tx(batch, &script_hash, height, tx_index as u32, tx_size);
            }
        }
        Ok(())
    }

    /// Stage removal of every entry the block's height contributed.
    pub fn stage_detach(&self, batch: &mut WriteBatch, block: &Block) -> Result<()> {
        self.db.stage_script_tx_removal_at(batch, block.height())?;
        Ok(())
    }

    /// Every transaction within `[from_height, to_height)` whose inputs or
    /// outputs involve any of `script_hashes`, as `(height, transaction)`.
    pub fn fetch_script_hash_related_tx(
        &self,
        script_hashes: &[[u8; 32]],
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<(u64, Transaction)>> {
        let hits = self
            .db
            .fetch_script_hash_related_tx(script_hashes, from_height, to_height)?;
        let mut out = Vec::with_capacity(hits.len());
        let mut cached: Option<(u64, Block)> = None;
        for (height, tx_index, _) in hits {
            if cached.as_ref().map(|(h, _)| *h) != Some(height) {
                let block = self
                    .db
                    .fetch_block_by_height(height)?
                    .ok_or(ConnectError::MissingTx)?;
                cached = Some((height, block));
            }
            let Some((_, block)) = cached.as_ref() else {
                return Err(ConnectError::MissingTx.into());
            };
            let tx = block
                .transactions
                .get(tx_index as usize)
                .ok_or(ConnectError::MissingTx)?;
            out.push((height, tx.clone()));
        }
        Ok(out)
    }
}

/// Script hashes a transaction touches: holders of its outputs plus holders
/// of the outputs it consumes.
fn involved_script_hashes(tx: &Transaction, tx_store: &TxStore) -> Result<HashSet<[u8; 32]>> {
    let mut hashes = HashSet::new();
    for output in &tx.outputs {
        if let Some(hash) = holder_script_hash(&output.pk_script) {
            hashes.insert(hash);
        }
    }
    if !tx.is_coinbase() {
        for input in &tx.inputs {
            let outpoint = &input.previous_outpoint;
            let prev = tx_store
                .get(&outpoint.hash)
                .ok_or(ConnectError::MissingTx)?;
            let prev_out = prev
                .tx
                .outputs
                .get(outpoint.index as usize)
                .ok_or(ConnectError::MissingTx)?;
            if let Some(hash) = holder_script_hash(&prev_out.pk_script) {
                hashes.insert(hash);
            }
        }
    } else {
        // Coinbase binding inputs (pre-fork regime) index their holders too.
        for input in tx.inputs.iter().skip(1) {
            let outpoint = &input.previous_outpoint;
            if let Some(prev) = tx_store.get(&outpoint.hash) {
                if let Some(prev_out) = prev.tx.outputs.get(outpoint.index as usize) {
                    if let Some(hash) = holder_script_hash(&prev_out.pk_script) {
                        hashes.insert(hash);
                    }
                }
            }
        }
    }
    Ok(hashes)
}

/// The holder script hash of a standard output; nonstandard outputs are
/// not indexed.
fn holder_script_hash(pk_script: &[u8]) -> Option<[u8; 32]> {
    let info = script_info(pk_script);
    match info.class {
        ScriptClass::NonStandard => None,
        _ => info.script_hash(),
    }
}
