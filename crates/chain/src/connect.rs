//! Connect-level validation: inputs, fees, locks, coinbase, binding state
//! and script execution.

use capcore_consensus::{enforce_fork_warmup, ChainParams};
use capcore_script::{verify_input, ScriptFlags};
use capcore_storage::{ChainDb, StakingRank};
use capcore_trie::Trie;
use capcore_types::{Amount, Block, Transaction, H256};

use crate::coinbase::validate_coinbase;
use crate::error::{BindingError, BlockError, ConnectError, Result, SanityError};
use crate::payload::decode_payload;
use crate::state::apply_block_bindings;
use crate::txstore::{TxData, TxStore};
use crate::validate::{check_transaction_sanity, SequenceLock};
use crate::BehaviorFlags;

/// Everything connect-level validation needs from the chain.
pub struct ConnectEnv<'a> {
    /// Chain parameters.
    pub params: &'a ChainParams,
    /// The chain database, positioned at the block's parent.
    pub db: &'a ChainDb,
    /// Median time past of the parent.
    pub median_time_past: u64,
    /// Height of the latest checkpoint, if any; blocks at or below it skip
    /// script execution.
    pub latest_checkpoint_height: Option<u64>,
    /// Staking ranks at the block height.
    pub staking_ranks: Vec<StakingRank>,
}

/// Fetch every transaction the block's inputs reference.
///
/// Main-chain references resolve through the transaction index; in-block
/// references resolve to the block's own transactions.
pub fn fetch_input_transactions(db: &ChainDb, block: &Block) -> Result<TxStore> {
    let mut store = TxStore::new();

    let mut wanted: Vec<H256> = Vec::new();
    for tx in &block.transactions {
        let skip_null = usize::from(tx.is_coinbase());
        for input in tx.inputs.iter().skip(skip_null) {
            wanted.push(input.previous_outpoint.hash);
        }
    }

    for hash in wanted {
        if store.contains_key(&hash) {
            continue;
        }
        let Some(location) = db.fetch_tx_location(&hash)? else {
            continue; // reported as MissingTx at the use site
        };
        let Some(container) = db.fetch_block_by_height(location.height)? else {
            continue;
        };
        let Some(tx) = container.transactions.get(location.tx_index as usize) else {
            continue;
        };
        store.insert(
            hash,
            TxData::located(
                tx.clone(),
                location.height,
                location.block_hash,
                location.tx_index,
                location.spent.clone(),
            ),
        );
    }

    // In-block transactions are spendable by later ones in the same block.
    let block_hash = block.block_hash();
    for (tx_index, tx) in block.transactions.iter().enumerate() {
        store.insert(
            tx.tx_hash(),
            TxData::located(
                tx.clone(),
                block.height(),
                block_hash,
                tx_index as u32,
                vec![false; tx.outputs.len()],
            ),
        );
    }

    Ok(store)
}

/// Reject blocks that would overwrite a not-fully-spent duplicate of an
/// existing transaction.
pub fn check_dup_tx(db: &ChainDb, block: &Block) -> Result<()> {
    for tx in &block.transactions {
        if let Some(location) = db.fetch_tx_location(&tx.tx_hash())? {
            if !location.fully_spent() {
                return Err(ConnectError::OverwriteTx.into());
            }
        }
    }
    Ok(())
}

/// Check one transaction's inputs and return its fee.
///
/// Coinbase transactions must carry no witness data and pay no fee; their
/// extra binding inputs are summed by the coinbase validator instead.
pub fn check_transaction_inputs(
    params: &ChainParams,
    tx: &Transaction,
    tx_height: u64,
    tx_store: &mut TxStore,
) -> Result<Amount> {
    if tx.is_coinbase() {
        for input in &tx.inputs {
            if !input.witness.is_empty() {
                return Err(ConnectError::CoinbaseWitness.into());
            }
        }
        return Ok(Amount::ZERO);
    }

    let mut total_in = Amount::ZERO;
    for input in &tx.inputs {
        let outpoint = &input.previous_outpoint;
        let prev = tx_store
            .get_mut(&outpoint.hash)
            .ok_or(ConnectError::MissingTx)?;
        let index = outpoint.index as usize;

        if prev.tx.is_coinbase() {
            let confirmations = tx_height.saturating_sub(prev.block_height);
            if confirmations < params.coinbase_maturity {
                tracing::warn!(
                    next_height = tx_height,
                    input_height = prev.block_height,
                    maturity = params.coinbase_maturity,
                    "attempt to spend immature coinbase"
                );
                return Err(ConnectError::ImmatureSpend.into());
            }
        }

        if index >= prev.spent.len() {
            return Err(SanityError::BadTxInput.into());
        }
        if prev.spent[index] {
            tracing::debug!(outpoint = %outpoint, "double spend detected");
            return Err(ConnectError::DoubleSpend.into());
        }

        let value = Amount::from_u64(prev.tx.outputs[index].value)
            .map_err(|_| SanityError::BadTxOutValue)?;
        total_in = total_in
            .checked_add(value)
            .map_err(|_| ConnectError::BadFees)?;
        prev.spent[index] = true;
    }

    let mut total_out = Amount::ZERO;
    for output in &tx.outputs {
        total_out = total_out
            .checked_add(Amount::from_u64(output.value).map_err(|_| SanityError::BadTxOutValue)?)
            .map_err(|_| ConnectError::BadFees)?;
    }

    total_in
        .checked_sub(total_out)
        .map_err(|_| ConnectError::BadFees.into())
}

/// Full connect-level validation of `block` on top of its parent.
///
/// `working_trie` starts as a copy of the parent's binding state and holds
/// the block's effects afterwards. Returns the input-transaction store so
/// the caller can stage index writes from the same view.
pub fn check_connect_block(
    env: &ConnectEnv<'_>,
    block: &Block,
    flags: BehaviorFlags,
    working_trie: &mut Trie,
) -> Result<TxStore> {
    let params = env.params;
    let height = block.height();

    if block.block_hash() == params.genesis_hash {
        return Err(ConnectError::ConnectGenesis.into());
    }

    check_dup_tx(env.db, block)?;

    let mut tx_store = fetch_input_transactions(env.db, block)?;

    // Re-run the sanity-level sig-op budget against the fully resolved
    // transactions.
    let mut total_sig_ops = 0usize;
    for tx in &block.transactions {
        total_sig_ops = total_sig_ops.saturating_add(capcore_script::count_sig_ops(tx));
        if total_sig_ops > crate::validate::MAX_SIG_OPS_PER_BLOCK {
            return Err(SanityError::TooManySigOps.into());
        }
    }

    let warmup = enforce_fork_warmup(params, height);
    let mut total_fees = Amount::ZERO;
    for (i, tx) in block.transactions.iter().enumerate() {
        let fee = check_transaction_inputs(params, tx, height, &mut tx_store)?;
        if i != 0 && warmup {
            if let Some(bind) = decode_payload(&tx.payload) {
                if fee < params.pool_coinbase_bind_fee {
                    return Err(ConnectError::FeeForPoolCoinbase.into());
                }
                debug_assert_ne!(bind.nonce, 0);
            }
        }
        total_fees = total_fees
            .checked_add(fee)
            .map_err(|_| ConnectError::BadFees)?;
    }

    for tx in block.transactions.iter().skip(1) {
        let mut lock = SequenceLock::none();
        for input in &tx.inputs {
            let prev = tx_store
                .get(&input.previous_outpoint.hash)
                .ok_or(ConnectError::MissingTx)?;
            lock.fold_input(input.sequence, prev.block_height, env.median_time_past);
        }
        if !lock.active(height, env.median_time_past) {
            return Err(ConnectError::SequenceNotSatisfied.into());
        }
    }

    validate_coinbase(
        params,
        block,
        &mut tx_store,
        total_fees,
        working_trie,
        &env.staking_ranks,
    )?;

    // Binding-state transitions; the resulting root must match the header
    // commitment on V2 blocks, and V1 blocks leave the trie empty.
    if warmup {
        apply_block_bindings(working_trie, params, block, &tx_store)?;
        let root = H256::new(working_trie.hash());
        if root != block.header.binding_root {
            tracing::warn!(
                computed = %root,
                header = %block.header.binding_root,
                height,
                "binding root mismatch"
            );
            return Err(BindingError::InvalidRoot.into());
        }
    }

    // Script execution last; it dominates the cost and the cheap checks
    // above already rejected most garbage.
    let below_checkpoint = env
        .latest_checkpoint_height
        .map(|cp| height <= cp)
        .unwrap_or(false);
    if !below_checkpoint && !flags.fast_import {
        let script_flags = ScriptFlags {
            binding_locked_period: warmup.then_some(params.binding_locked_period),
        };
        for tx in block.transactions.iter().skip(1) {
            // Re-check sanity so malformed scripts fail with a precise kind.
            check_transaction_sanity(tx)?;
            for (input_index, input) in tx.inputs.iter().enumerate() {
                let prev = tx_store
                    .get(&input.previous_outpoint.hash)
                    .ok_or(ConnectError::MissingTx)?;
                let prev_out = prev
                    .tx
                    .outputs
                    .get(input.previous_outpoint.index as usize)
                    .ok_or(ConnectError::MissingTx)?;
                verify_input(tx, input_index, &prev_out.pk_script, script_flags)
                    .map_err(ConnectError::Script)?;
            }
        }
    }

    Ok(tx_store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_storage::MemoryKv;
    use capcore_types::{OutPoint, TxInput, TxOutput};
    use std::sync::Arc;

    fn store_with(tx: Transaction, height: u64) -> (H256, TxStore) {
        let hash = tx.tx_hash();
        let mut store = TxStore::new();
        store.insert(hash, TxData::new(tx, height));
        (hash, store)
    }

    fn funded_prev() -> Transaction {
        let mut prev = Transaction::new();
        prev.inputs
            .push(TxInput::new(OutPoint::new(H256::sha256(b"root"), 0)));
        prev.outputs.push(TxOutput::new(100, vec![0]));
        prev.outputs.push(TxOutput::new(50, vec![0]));
        prev
    }

    #[test]
    fn test_fee_computation() {
        let params = ChainParams::regtest();
        let (prev_hash, mut store) = store_with(funded_prev(), 1);

        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(prev_hash, 0)));
        tx.outputs.push(TxOutput::new(90, vec![0]));
        let fee = check_transaction_inputs(&params, &tx, 10, &mut store).unwrap();
        assert_eq!(fee.grains(), 10);
    }

    #[test]
    fn test_double_spend_detected() {
        let params = ChainParams::regtest();
        let (prev_hash, mut store) = store_with(funded_prev(), 1);

        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(prev_hash, 0)));
        tx.outputs.push(TxOutput::new(1, vec![0]));
        check_transaction_inputs(&params, &tx, 10, &mut store).unwrap();

        let mut tx2 = Transaction::new();
        tx2.inputs.push(TxInput::new(OutPoint::new(prev_hash, 0)));
        tx2.outputs.push(TxOutput::new(1, vec![0]));
        assert!(matches!(
            check_transaction_inputs(&params, &tx2, 10, &mut store),
            Err(BlockError::Connect(ConnectError::DoubleSpend))
        ));
    }

    #[test]
    fn test_missing_input_detected() {
        let params = ChainParams::regtest();
        let mut store = TxStore::new();
        let mut tx = Transaction::new();
        tx.inputs
            .push(TxInput::new(OutPoint::new(H256::sha256(b"gone"), 0)));
        tx.outputs.push(TxOutput::new(1, vec![0]));
        assert!(matches!(
            check_transaction_inputs(&params, &tx, 10, &mut store),
            Err(BlockError::Connect(ConnectError::MissingTx))
        ));
    }

    #[test]
    fn test_immature_coinbase_spend() {
        let params = ChainParams::regtest();
        let mut coinbase = Transaction::new();
        coinbase.inputs.push(TxInput::new(OutPoint::null()));
        coinbase.outputs.push(TxOutput::new(100, vec![0]));
        let (cb_hash, mut store) = store_with(coinbase, 9);

        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(cb_hash, 0)));
        tx.outputs.push(TxOutput::new(1, vec![0]));

        // One confirmation, maturity is two.
        assert!(matches!(
            check_transaction_inputs(&params, &tx, 10, &mut store),
            Err(BlockError::Connect(ConnectError::ImmatureSpend))
        ));
        // Enough confirmations.
        let (cb_hash, mut store) = store_with(
            {
                let mut cb = Transaction::new();
                cb.inputs.push(TxInput::new(OutPoint::null()));
                cb.outputs.push(TxOutput::new(100, vec![0]));
                cb
            },
            5,
        );
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(cb_hash, 0)));
        tx.outputs.push(TxOutput::new(1, vec![0]));
        check_transaction_inputs(&params, &tx, 10, &mut store).unwrap();
    }

    #[test]
    fn test_inputs_below_outputs_is_bad_fees() {
        let params = ChainParams::regtest();
        let (prev_hash, mut store) = store_with(funded_prev(), 1);
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(prev_hash, 0)));
        tx.outputs.push(TxOutput::new(101, vec![0]));
        assert!(matches!(
            check_transaction_inputs(&params, &tx, 10, &mut store),
            Err(BlockError::Connect(ConnectError::BadFees))
        ));
    }

    #[test]
    fn test_dup_tx_overwrite_guard() {
        let params = ChainParams::regtest();
        let db = ChainDb::new(Arc::new(MemoryKv::new()));
        let block = params.genesis_block.clone();

        // Record the genesis coinbase as known and unspent.
        let mut batch = capcore_storage::WriteBatch::new();
        let tx = &block.transactions[0];
        db.stage_tx_location(
            &mut batch,
            &tx.tx_hash(),
            &capcore_storage::TxLocation {
                height: 0,
                block_hash: block.block_hash(),
                tx_index: 0,
                spent: vec![false],
            },
        )
        .unwrap();
        db.apply(batch).unwrap();

        assert!(matches!(
            check_dup_tx(&db, &block),
            Err(BlockError::Connect(ConnectError::OverwriteTx))
        ));
    }
}
