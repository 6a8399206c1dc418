//! Chain parameters.

use alloy_primitives::U256;
use capcore_crypto::PrivateKey;
use capcore_poc::{NativeProof, Proof};
use capcore_types::{
    Amount, Block, BlockHeader, NodePubKey, NodeSignature, OutPoint, ProposalArea, Transaction,
    TxInput, TxOutput, H256,
};
use serde::{Deserialize, Serialize};

/// A known-good (height, hash) pair the chain must pass through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint height.
    pub height: u64,
    /// Required block hash at that height.
    pub hash: H256,
}

/// Every constant the chain rules need, threaded through the node as a
/// value.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Network name.
    pub name: &'static str,
    /// The genesis block.
    pub genesis_block: Block,
    /// Hash of the genesis block.
    pub genesis_hash: H256,
    /// Chain id: double hash of the genesis header in `ChainId` mode.
    pub chain_id: H256,
    /// Chain-wide lower bound on the difficulty target.
    pub poc_limit: U256,
    /// Target seconds between blocks; drives retargeting.
    pub target_spacing: u64,
    /// Blocks between subsidy halvings.
    pub subsidy_halving_interval: u64,
    /// Subsidy of the first halving period.
    pub base_subsidy: Amount,
    /// Pre-fork subsidies below this clamp to zero.
    pub min_halved_subsidy: Amount,
    /// Confirmations before a coinbase output may be spent.
    pub coinbase_maturity: u64,
    /// Confirmations before an output may be consumed by a coinbase
    /// (binding inputs).
    pub transaction_maturity: u64,
    /// Warm-up fork gate: old binding disabled, minting unbound allowed.
    pub warmup_fork_height: u64,
    /// Full fork gate: binding required, PoS proofs allowed, new rewards.
    pub full_fork_height: u64,
    /// Relative height lock a binding output demands of its spender.
    pub binding_locked_period: u64,
    /// Minimum fee of a pool-coinbase bind transaction.
    pub pool_coinbase_bind_fee: Amount,
    /// Block timestamps may run at most this far ahead of wall time.
    pub max_time_offset: u64,
    /// Checkpoints, sorted by height.
    pub checkpoints: Vec<Checkpoint>,
    /// Fake subsidy start height continuing the mainnet halving curve
    /// across the full fork; zero when the table is disabled.
    pub fake_subsidy_start_height: u64,
}

impl ChainParams {
    /// Mainnet parameters.
    pub fn mainnet() -> Self {
        Self::build(
            "mainnet",
            1_577_836_800, // 2020-01-01 00:00:00 UTC
            13_440,
            1_494_000,
            1_500_000,
            1_000,
            Vec::new(),
        )
    }

    /// Regression-test parameters: low fork heights, fast maturity.
    pub fn regtest() -> Self {
        Self::build("regtest", 1_600_000_000, 100, 20, 40, 2, Vec::new())
    }

    /// Regtest with explicit fork gates, for fork-boundary tests.
    pub fn regtest_with_forks(warmup: u64, full: u64) -> Self {
        Self::build("regtest", 1_600_000_000, 100, warmup, full, 2, Vec::new())
    }

    fn build(
        name: &'static str,
        genesis_time: u64,
        subsidy_halving_interval: u64,
        warmup_fork_height: u64,
        full_fork_height: u64,
        coinbase_maturity: u64,
        checkpoints: Vec<Checkpoint>,
    ) -> Self {
        let poc_limit = U256::from(1u64);
        let genesis_block = build_genesis(genesis_time, poc_limit);
        let genesis_hash = genesis_block.block_hash();
        let chain_id = genesis_block.header.chain_id;
        Self {
            name,
            genesis_block,
            genesis_hash,
            chain_id,
            poc_limit,
            target_spacing: 45,
            subsidy_halving_interval,
            base_subsidy: Amount::from_grains(10_240_000_000).expect("in range"),
            min_halved_subsidy: Amount::from_grains(6_250_000).expect("in range"),
            coinbase_maturity,
            transaction_maturity: 1,
            warmup_fork_height,
            full_fork_height,
            binding_locked_period: if full_fork_height < 100_000 { 10 } else { 61_440 },
            pool_coinbase_bind_fee: Amount::from_coins(1).expect("in range"),
            max_time_offset: 3,
            checkpoints,
            fake_subsidy_start_height: fake_subsidy_start(full_fork_height),
        }
    }

    /// The latest checkpoint at or below `height`, if any.
    pub fn latest_checkpoint_at(&self, height: u64) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .rev()
            .find(|cp| cp.height <= height)
    }

    /// The checkpoint exactly at `height`, if any.
    pub fn checkpoint_at(&self, height: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.height == height)
    }
}

/// Continuity skew for the post-fork halving curve.
///
/// Parameterized for the mainnet case only: when the full fork activates
/// during halving period 7 (heights 846720..=1706880), the curve restarts
/// from an equivalent position in period 5. Elsewhere the table stays zero
/// and the unskewed curve applies.
fn fake_subsidy_start(full_fork_height: u64) -> u64 {
    if full_fork_height > 846_720 && full_fork_height <= 1_706_880 {
        let offset = (full_fork_height - 846_720) * 215_040 / 860_160;
        201_601 + offset
    } else {
        0
    }
}

/// Deterministically build the genesis block.
///
/// Genesis is valid by definition and never enters the validation pipeline;
/// its signature exists only so the header is structurally complete. The
/// chain id is the double hash of this header with the chain-id field
/// excluded.
fn build_genesis(timestamp: u64, target: U256) -> Block {
    let sk = PrivateKey::from_bytes(&capcore_crypto::sha256(b"capcore genesis builder"))
        .expect("valid key bytes");

    let mut coinbase = Transaction::new();
    coinbase.inputs.push(TxInput::new(OutPoint::null()));
    coinbase.outputs.push(TxOutput::new(0, vec![0x00]));
    let mut payload = Vec::with_capacity(12);
    payload.extend_from_slice(&0u64.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    coinbase.payload = payload;

    let transactions = vec![coinbase];
    let transaction_root =
        capcore_types::merkle_root(transactions.iter().map(|tx| tx.tx_hash()).collect());
    let witness_root =
        capcore_types::merkle_root(transactions.iter().map(|tx| tx.witness_hash()).collect());

    let mut header = BlockHeader {
        chain_id: H256::ZERO,
        version: 1,
        height: 0,
        timestamp,
        previous: H256::ZERO,
        transaction_root,
        witness_root,
        proposal_root: H256::ZERO,
        target,
        challenge: H256::sha256(b"capcore genesis challenge"),
        pub_key: NodePubKey::Secp(sk.public_key()),
        proof: Proof::Native(NativeProof::new(0, 0, 24)),
        signature: NodeSignature::Secp(sk.sign(b"genesis placeholder")),
        ban_list: Vec::new(),
        binding_root: H256::ZERO,
    };
    let chain_id = header.compute_chain_id().expect("genesis header");
    header.chain_id = chain_id;
    let digest = header.poc_digest();
    header.signature = NodeSignature::Secp(sk.sign_hash(&digest));

    Block::new(header, ProposalArea::new(), transactions)
}
