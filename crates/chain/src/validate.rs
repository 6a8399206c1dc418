//! Context-free and contextual block checks.

use alloy_primitives::U256;
use capcore_consensus::{block_version_for, enforce_fork, ChainParams};
use capcore_poc::{PosQualityVerifier, ProofType};
use capcore_script::count_sig_ops;
use capcore_types::transaction::{
    LOCK_TIME_THRESHOLD, MAX_TX_IN_SEQUENCE, SEQUENCE_LOCK_TIME_DISABLED,
    SEQUENCE_LOCK_TIME_GRANULARITY, SEQUENCE_LOCK_TIME_IS_SECONDS, SEQUENCE_LOCK_TIME_MASK,
};
use capcore_types::{
    Amount, Block, BlockHeader, ByteWriter, FaultPubKey, ProposalArea, Transaction, H256,
    MAX_BLOCK_PAYLOAD, MAX_TX_PER_BLOCK,
};
use std::collections::HashSet;

use crate::error::{PocCheckError, Result, SanityError};
use crate::payload::CoinbasePayload;
use crate::BehaviorFlags;

/// Maximum signature operations per block.
pub const MAX_SIG_OPS_PER_BLOCK: usize =
    MAX_BLOCK_PAYLOAD / 150 * capcore_script::MAX_PUBKEYS_PER_MULTISIG;

/// Context-free transaction checks.
pub fn check_transaction_sanity(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() {
        return Err(SanityError::NoTxInputs.into());
    }
    if tx.outputs.is_empty() {
        return Err(SanityError::NoTxOutputs.into());
    }
    if tx.plain_size() > MAX_BLOCK_PAYLOAD {
        return Err(SanityError::TxTooBig.into());
    }

    let mut total = Amount::ZERO;
    for output in &tx.outputs {
        let value = Amount::from_u64(output.value).map_err(|_| SanityError::BadTxOutValue)?;
        total = total
            .checked_add(value)
            .map_err(|_| SanityError::BadTxOutValue)?;
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_outpoint) {
            return Err(SanityError::DuplicateTxInputs.into());
        }
    }

    // The null outpoint may only appear as the first coinbase input.
    let skip_first = usize::from(tx.is_coinbase());
    for input in tx.inputs.iter().skip(skip_first) {
        if input.previous_outpoint.is_null() {
            return Err(SanityError::BadTxInput.into());
        }
    }

    Ok(())
}

/// Target range and proof verification; returns the verified quality.
///
/// `poc_limit` is the chain-wide lower bound (overridden to zero for
/// punishment-testimony checks).
pub fn check_proof_of_capacity(
    params: &ChainParams,
    header: &BlockHeader,
    poc_limit: U256,
    verifier: &dyn PosQualityVerifier,
) -> Result<U256> {
    let post_fork = enforce_fork(params, header.height);
    if !post_fork && header.proof.proof_type() != ProofType::Native {
        return Err(PocCheckError::InvalidProofType.into());
    }

    if header.target.is_zero() || header.target < poc_limit {
        return Err(PocCheckError::UnexpectedDifficulty.into());
    }

    tracing::trace!(
        height = header.height,
        bit_length = header.proof.bit_length(),
        challenge = %header.challenge,
        "checking proof of capacity"
    );

    let quality = header
        .proof
        .verified_quality(
            &header.plot_seed(),
            header.challenge.as_array(),
            post_fork,
            header.slot(),
            header.height,
            post_fork,
            verifier,
        )
        .map_err(PocCheckError::Proof)?;

    if quality < header.target {
        tracing::debug!(
            quality = %quality,
            target = %header.target,
            height = header.height,
            "proof quality below target"
        );
        return Err(PocCheckError::LowQuality.into());
    }
    Ok(quality)
}

/// Context-free header checks; returns the verified proof quality.
pub fn check_header_sanity(
    params: &ChainParams,
    header: &BlockHeader,
    poc_limit: U256,
    flags: BehaviorFlags,
    now: u64,
    verifier: &dyn PosQualityVerifier,
) -> Result<U256> {
    if header.chain_id != params.chain_id {
        return Err(SanityError::ChainIdMismatch.into());
    }

    if header.version < block_version_for(params, header.height) {
        return Err(SanityError::InvalidVersion.into());
    }
    header
        .check_version_constraint()
        .map_err(|e| SanityError::HeaderConstraint(e.to_string()))?;

    if header.timestamp > now + params.max_time_offset {
        return Err(SanityError::TimeTooNew.into());
    }

    check_header_ban_list(header)?;

    let quality = if flags.no_poc_check {
        U256::ZERO
    } else {
        let quality = check_proof_of_capacity(params, header, poc_limit, verifier)?;
        if !header.verify_sig() {
            return Err(SanityError::BlockSignature.into());
        }
        quality
    };

    Ok(quality)
}

fn check_header_ban_list(header: &BlockHeader) -> Result<()> {
    let own = header.pub_key.serialize();
    let mut seen = HashSet::with_capacity(header.ban_list.len());
    for banned in &header.ban_list {
        let bytes = banned.serialize();
        if bytes == own {
            return Err(SanityError::BanSelfPk.into());
        }
        if !seen.insert(bytes) {
            return Err(SanityError::DuplicateBan.into());
        }
    }
    Ok(())
}

/// Structural and cryptographic checks on a punishment record.
pub fn check_fault_pk_sanity(
    params: &ChainParams,
    fault: &FaultPubKey,
    flags: BehaviorFlags,
    now: u64,
    verifier: &dyn PosQualityVerifier,
) -> Result<()> {
    fault
        .validate()
        .map_err(|_| SanityError::InvalidPunishment)?;
    for testimony in fault.testimony.iter() {
        // Testimonies are complete headers; each must pass header sanity
        // with the target floor relaxed to zero.
        check_header_sanity(params, testimony, U256::ZERO, flags, now, verifier)
            .map_err(|_| SanityError::InvalidPunishment)?;
    }
    Ok(())
}

/// Proposal-area checks: pairwise ban-list match and per-record sanity.
pub fn check_proposal_sanity(
    params: &ChainParams,
    proposals: &ProposalArea,
    header: &BlockHeader,
    flags: BehaviorFlags,
    now: u64,
    verifier: &dyn PosQualityVerifier,
) -> Result<()> {
    if proposals.punishment_count() != header.ban_list.len() {
        return Err(SanityError::BanListMismatch.into());
    }
    for (fault, banned) in proposals.punishments.iter().zip(header.ban_list.iter()) {
        if fault.pub_key.serialize() != banned.serialize() {
            return Err(SanityError::BanListMismatch.into());
        }
    }
    for fault in &proposals.punishments {
        if fault.testimony[0].height > header.height {
            return Err(SanityError::InvalidPunishment.into());
        }
        check_fault_pk_sanity(params, fault, flags, now, verifier)?;
    }
    Ok(())
}

/// Context-free block checks; returns the verified proof quality.
pub fn check_block_sanity(
    params: &ChainParams,
    block: &Block,
    flags: BehaviorFlags,
    now: u64,
    verifier: &dyn PosQualityVerifier,
) -> Result<U256> {
    let header = &block.header;

    let quality = check_header_sanity(params, header, params.poc_limit, flags, now, verifier)?;

    check_proposal_sanity(params, &block.proposals, header, flags, now, verifier)?;

    if block.transactions.is_empty() {
        return Err(SanityError::NoTransactions.into());
    }
    if block.transactions.len() > MAX_TX_PER_BLOCK {
        return Err(SanityError::TooManyTransactions.into());
    }
    if block.plain_size() > MAX_BLOCK_PAYLOAD {
        return Err(SanityError::BlockTooBig.into());
    }

    if !block.transactions[0].is_coinbase() {
        return Err(SanityError::FirstTxNotCoinbase.into());
    }
    for tx in &block.transactions[1..] {
        if tx.is_coinbase() {
            return Err(SanityError::MultipleCoinbases.into());
        }
    }

    check_coinbase_height(block)?;

    let proposal_root = block
        .proposals
        .merkle_root()
        .map_err(|e| crate::error::BlockError::Decode(e.to_string()))?;
    if proposal_root != header.proposal_root {
        return Err(SanityError::InvalidProposalRoot.into());
    }

    for tx in &block.transactions {
        check_transaction_sanity(tx)?;
    }

    if block.compute_transaction_root(false) != header.transaction_root {
        return Err(SanityError::InvalidMerkleRoot.into());
    }
    if block.compute_transaction_root(true) != header.witness_root {
        return Err(SanityError::InvalidWitnessRoot.into());
    }

    let mut seen = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        if !seen.insert(tx.tx_hash()) {
            return Err(SanityError::DuplicateTx.into());
        }
    }

    let mut total_sig_ops = 0usize;
    for tx in &block.transactions {
        total_sig_ops = total_sig_ops.saturating_add(count_sig_ops(tx));
        if total_sig_ops > MAX_SIG_OPS_PER_BLOCK {
            return Err(SanityError::TooManySigOps.into());
        }
    }

    Ok(quality)
}

/// Require the coinbase payload to declare the header height.
pub fn check_coinbase_height(block: &Block) -> Result<()> {
    let payload = CoinbasePayload::from_bytes(&block.transactions[0].payload)
        .ok_or(SanityError::IncompleteCoinbasePayload)?;
    if payload.height != block.header.height {
        return Err(SanityError::BadCoinbaseHeight.into());
    }
    Ok(())
}

/// The challenge the child of `parent` must carry.
pub fn calc_next_challenge(parent: &BlockHeader) -> H256 {
    let mut w = ByteWriter::new();
    w.put_hash(&parent.challenge);
    w.put_hash(&parent.block_hash());
    w.put_u64_le(parent.height + 1);
    H256::double_sha256(&w.into_bytes())
}

/// The target the child of `parent` must carry.
///
/// Per-block proportional retarget against the slot spacing, clamped to a
/// factor of four per step and floored at the chain limit. The grandparent
/// timestamp supplies the observed spacing; the first block keeps the
/// genesis target.
pub fn calc_next_target(
    params: &ChainParams,
    parent: &BlockHeader,
    grandparent_timestamp: Option<u64>,
) -> U256 {
    let Some(gp_ts) = grandparent_timestamp else {
        return parent.target.max(params.poc_limit);
    };
    let elapsed = parent.timestamp.saturating_sub(gp_ts).max(1);
    let spacing = params.target_spacing.max(1);

    // Faster blocks raise the target (quality must be higher), slower
    // blocks lower it.
    let scaled = parent.target * U256::from(spacing) / U256::from(elapsed);
    let upper = parent.target * U256::from(4u64);
    let lower = (parent.target / U256::from(4u64)).max(U256::from(1u64));
    scaled.clamp(lower, upper).max(params.poc_limit)
}

/// Whether a transaction is finalized at the given height and time.
pub fn is_finalized_transaction(tx: &Transaction, block_height: u64, block_time: u64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCK_TIME_THRESHOLD {
        block_height
    } else {
        block_time
    };
    if tx.lock_time < threshold {
        return true;
    }
    tx.inputs
        .iter()
        .all(|input| input.sequence == MAX_TX_IN_SEQUENCE)
}

/// The relative lock computed for one transaction.
///
/// `-1` markers mean "no lock of that flavor"; a lock is satisfied once the
/// block height exceeds `block_height` and the median time past exceeds
/// `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    /// Earliest median time past NOT allowed to include the transaction.
    pub seconds: i64,
    /// Highest block height NOT allowed to include the transaction.
    pub block_height: i64,
}

impl SequenceLock {
    /// The empty lock.
    pub fn none() -> Self {
        Self {
            seconds: -1,
            block_height: -1,
        }
    }

    /// Fold one input's relative lock into the transaction lock.
    pub fn fold_input(&mut self, sequence: u64, input_height: u64, input_time: u64) {
        if sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
            return;
        }
        let value = sequence & SEQUENCE_LOCK_TIME_MASK;
        if sequence & SEQUENCE_LOCK_TIME_IS_SECONDS != 0 {
            let lock = input_time as i64 + (value * SEQUENCE_LOCK_TIME_GRANULARITY) as i64 - 1;
            self.seconds = self.seconds.max(lock);
        } else {
            let lock = input_height as i64 + value as i64 - 1;
            self.block_height = self.block_height.max(lock);
        }
    }

    /// Whether both flavors of the lock have matured.
    pub fn active(&self, block_height: u64, median_time_past: u64) -> bool {
        self.seconds < median_time_past as i64 && self.block_height < block_height as i64
    }
}
