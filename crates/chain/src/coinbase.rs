//! Coinbase validation: binding requirement, pool-coinbase assignment,
//! staking payouts and the reward ceiling.

use capcore_consensus::{
    calc_block_subsidy, enforce_fork, enforce_fork_warmup, required_binding, ChainParams,
    ConsensusError,
};
use capcore_poc::{plot_size, Proof};
use capcore_script::{pay_to_witness_script_hash, script_info, ScriptClass};
use capcore_storage::StakingRank;
use capcore_trie::Trie;
use capcore_types::{Amount, Block, Transaction};

use crate::error::{BindingError, BlockError, ConnectError, Result, SanityError};
use crate::payload::CoinbasePayload;
use crate::state::{self, BindingInfo};
use crate::txstore::TxStore;

/// Validate the coinbase of `block` against the regime in force.
///
/// `parent_binding_state` is a read view of the parent's trie (the working
/// copy the block's own effects have NOT been applied to); `staking_ranks`
/// is the rank list at the block height.
#[allow(clippy::too_many_arguments)]
pub fn validate_coinbase(
    params: &ChainParams,
    block: &Block,
    tx_store: &mut TxStore,
    total_fees: Amount,
    parent_binding_state: &Trie,
    staking_ranks: &[StakingRank],
) -> Result<()> {
    let coinbase = &block.transactions[0];
    let header = &block.header;
    let height = block.height();

    let mut has_valid_binding = false;
    if !enforce_fork_warmup(params, height) {
        // Pre-fork regime: extra coinbase inputs are old-form binding
        // outputs committing coin to the builder's key.
        let builder_digest = capcore_crypto::hash160(&header.pub_key.serialize());
        let total_binding =
            check_coinbase_inputs(params, coinbase, tx_store, &builder_digest, height)?;
        let required = required_binding(
            params,
            height,
            0,
            header.proof.bit_length(),
            Amount::ZERO,
        )
        .map_err(map_consensus_err)?;
        has_valid_binding = total_binding >= required;
    } else if enforce_fork(params, height) {
        // Full regime: the plot must be bound in the parent state, and a
        // pool-bound PoS builder must pay the assigned coinbase script.
        let plot_identity: Vec<u8> = match &header.proof {
            Proof::Pos(pos) => {
                let assignment =
                    state::get_pool_pk_coinbase(parent_binding_state, &pos.pool_pk.to_bytes())?;
                if let (Some(script_hash), _) = assignment {
                    check_assigned_coinbase(coinbase, &script_hash)?;
                }
                pos.plot_id.to_vec()
            }
            Proof::Native(_) => header.pub_key.serialize(),
            Proof::Empty => return Err(SanityError::InvalidVersion.into()),
        };

        let binding_key = capcore_script::binding_target(
            &plot_identity,
            header.proof.proof_type().as_u8(),
            header.proof.bit_length() as u8,
        );
        let Some(bound) = parent_binding_state.try_get(&binding_key)? else {
            // Minting without binding is disallowed in this regime.
            return Err(BindingError::PlotNotBound.into());
        };

        let bound_amount = Amount::from_u64(BindingInfo::decode(&bound).amount)
            .map_err(|e| BlockError::Decode(e.to_string()))?;
        let network_binding = state::get_network_binding(parent_binding_state)?;
        let required = required_binding(
            params,
            height,
            plot_size(header.proof.proof_type(), header.proof.bit_length()),
            header.proof.bit_length(),
            network_binding,
        )
        .map_err(map_consensus_err)?;
        if bound_amount < required {
            tracing::debug!(
                bound = %bound_amount,
                required = %required,
                height,
                "insufficient binding for mint"
            );
            return Err(ConnectError::InsufficientBinding.into());
        }
        has_valid_binding = true;
    }
    // Warm-up window: minting needs no binding and earns no binding reward;
    // `has_valid_binding` stays false and the subsidy path ignores it.

    let total_reward = check_coinbase_outputs(
        params,
        coinbase,
        staking_ranks,
        height,
        has_valid_binding,
    )?;

    let max_out = total_reward
        .checked_add(total_fees)
        .map_err(|_| ConnectError::BadFees)?;
    let mut total_out = Amount::ZERO;
    for output in &coinbase.outputs {
        total_out = total_out
            .checked_add(Amount::from_u64(output.value).map_err(|_| SanityError::BadTxOutValue)?)
            .map_err(|_| ConnectError::BadCoinbaseValue)?;
    }
    if total_out > max_out {
        tracing::debug!(
            actual = %total_out,
            allowed = %max_out,
            height,
            "coinbase pays more than reward plus fees"
        );
        return Err(ConnectError::BadCoinbaseValue.into());
    }

    Ok(())
}

fn map_consensus_err(e: ConsensusError) -> BlockError {
    match e {
        ConsensusError::BindingRequired => BindingError::PlotNotBound.into(),
        other => BlockError::Decode(other.to_string()),
    }
}

/// A pool-bound builder must pay the assigned script with the final
/// coinbase output.
fn check_assigned_coinbase(coinbase: &Transaction, script_hash: &[u8]) -> Result<()> {
    let mut expected = [0u8; 32];
    if script_hash.len() != 32 {
        return Err(ConnectError::UnexpectedCoinbase.into());
    }
    expected.copy_from_slice(script_hash);
    let script = pay_to_witness_script_hash(&expected);
    match coinbase.outputs.last() {
        Some(output) if output.pk_script == script => Ok(()),
        _ => {
            tracing::warn!("coinbase does not pay the pool-assigned script");
            Err(ConnectError::UnexpectedCoinbase.into())
        }
    }
}

/// Validate the extra (binding) inputs of a pre-fork coinbase and sum
/// their value.
fn check_coinbase_inputs(
    params: &ChainParams,
    coinbase: &Transaction,
    tx_store: &mut TxStore,
    builder_digest: &[u8; 20],
    next_height: u64,
) -> Result<Amount> {
    let mut total = Amount::ZERO;
    for input in coinbase.inputs.iter().skip(1) {
        let outpoint = &input.previous_outpoint;
        let prev = tx_store
            .get_mut(&outpoint.hash)
            .ok_or(ConnectError::MissingTx)?;
        let index = outpoint.index as usize;
        let Some(prev_out) = prev.tx.outputs.get(index) else {
            return Err(SanityError::BadTxInput.into());
        };

        let confirmations = next_height.saturating_sub(prev.block_height);
        let maturity = if prev.tx.is_coinbase() {
            params.coinbase_maturity
        } else {
            params.transaction_maturity
        };
        if confirmations < maturity {
            return Err(ConnectError::ImmatureSpend.into());
        }

        if prev.spent.get(index).copied().unwrap_or(true) {
            return Err(ConnectError::DoubleSpend.into());
        }

        let info = script_info(&prev_out.pk_script);
        if info.class != ScriptClass::BindingScriptHash {
            return Err(ConnectError::BindingPubKey.into());
        }
        let binding_hash = info.binding_script_hash().unwrap_or_default();
        if binding_hash.len() != 20 {
            return Err(BindingError::InvalidBindingScript.into());
        }
        if binding_hash != builder_digest {
            tracing::debug!(height = next_height, "coinbase binding input targets another key");
            return Err(ConnectError::BindingPubKey.into());
        }

        total = total
            .checked_add(Amount::from_u64(prev_out.value).map_err(|_| SanityError::BadTxOutValue)?)
            .map_err(|_| ConnectError::BadFees)?;
        prev.spent[index] = true;
    }
    Ok(total)
}

/// Check staking payouts and return the total allowed reward.
fn check_coinbase_outputs(
    params: &ChainParams,
    coinbase: &Transaction,
    staking_ranks: &[StakingRank],
    height: u64,
    has_valid_binding: bool,
) -> Result<Amount> {
    let payload = CoinbasePayload::from_bytes(&coinbase.payload)
        .ok_or(SanityError::IncompleteCoinbasePayload)?;
    if payload.num_staking_reward as usize > staking_ranks.len() {
        return Err(ConnectError::BadStakingRewardNum.into());
    }

    let (miner, supernode) =
        calc_block_subsidy(params, height, has_valid_binding, !staking_ranks.is_empty())
            .map_err(map_consensus_err)?;

    let total_weight: u128 = staking_ranks.iter().map(|rank| rank.weight).sum();

    let mut paid = 0u32;
    for (i, rank) in staking_ranks.iter().enumerate() {
        let expected = supernode
            .mul_div(rank.weight, total_weight.max(1))
            .map_err(|_| ConnectError::BadStakingReward)?;
        if expected.is_zero() {
            break;
        }
        let Some(output) = coinbase.outputs.get(i) else {
            return Err(ConnectError::BadStakingReward.into());
        };
        if output.value != expected.as_u64() {
            tracing::debug!(
                index = i,
                actual = output.value,
                expected = expected.as_u64(),
                "wrong staking reward value"
            );
            return Err(ConnectError::BadStakingReward.into());
        }
        if output.pk_script != pay_to_witness_script_hash(&rank.script_hash) {
            return Err(ConnectError::BadStakingReward.into());
        }
        paid += 1;
    }
    if paid != payload.num_staking_reward {
        return Err(ConnectError::BadStakingRewardNum.into());
    }

    miner
        .checked_add(supernode)
        .map_err(|_| ConnectError::BadCoinbaseValue.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_types::{OutPoint, TxInput, TxOutput};

    fn coinbase_with(height: u64, staking: u32, outputs: Vec<TxOutput>) -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::null()));
        tx.outputs = outputs;
        tx.payload = CoinbasePayload::new(height, staking).to_bytes();
        tx
    }

    #[test]
    fn test_staking_payouts_checked_in_rank_order() {
        let params = ChainParams::regtest();
        let ranks = vec![
            StakingRank {
                script_hash: [1u8; 32],
                value: 300,
                weight: 300,
            },
            StakingRank {
                script_hash: [2u8; 32],
                value: 100,
                weight: 100,
            },
        ];
        let (_, supernode) = calc_block_subsidy(&params, 5, true, true).unwrap();
        let first = supernode.mul_div(300, 400).unwrap();
        let second = supernode.mul_div(100, 400).unwrap();

        let good = coinbase_with(
            5,
            2,
            vec![
                TxOutput::new(first.as_u64(), pay_to_witness_script_hash(&[1u8; 32])),
                TxOutput::new(second.as_u64(), pay_to_witness_script_hash(&[2u8; 32])),
                TxOutput::new(1, pay_to_witness_script_hash(&[3u8; 32])),
            ],
        );
        check_coinbase_outputs(&params, &good, &ranks, 5, true).unwrap();

        // Swapped rank order is rejected.
        let swapped = coinbase_with(
            5,
            2,
            vec![
                TxOutput::new(second.as_u64(), pay_to_witness_script_hash(&[2u8; 32])),
                TxOutput::new(first.as_u64(), pay_to_witness_script_hash(&[1u8; 32])),
            ],
        );
        assert!(check_coinbase_outputs(&params, &swapped, &ranks, 5, true).is_err());

        // Over-declared staking count is rejected.
        let over = coinbase_with(5, 3, vec![]);
        assert!(matches!(
            check_coinbase_outputs(&params, &over, &ranks, 5, true),
            Err(BlockError::Connect(ConnectError::BadStakingRewardNum))
        ));
    }

    #[test]
    fn test_no_staking_means_zero_declared() {
        let params = ChainParams::regtest();
        let coinbase = coinbase_with(5, 0, vec![TxOutput::new(1, vec![0])]);
        check_coinbase_outputs(&params, &coinbase, &[], 5, true).unwrap();

        let wrong = coinbase_with(5, 1, vec![TxOutput::new(1, vec![0])]);
        assert!(check_coinbase_outputs(&params, &wrong, &[], 5, true).is_err());
    }
}
