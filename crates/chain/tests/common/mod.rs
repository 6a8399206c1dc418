//! Test harness: a regtest chain plus a deterministic block builder.
//!
//! Fixture blocks carry structurally valid headers and real signatures but
//! placeholder capacity proofs, so they run through the pipeline with the
//! no-poc-check flag; every other rule (context, connect, binding state,
//! scripts) is exercised for real.

use std::collections::HashMap;
use std::sync::Arc;

use capcore_chain::state::apply_block_bindings;
use capcore_chain::validate::{calc_next_challenge, calc_next_target};
use capcore_chain::{
    BehaviorFlags, Blockchain, ChainConfig, Result, TxData, TxStore,
};
use capcore_consensus::{
    block_version_for, calc_block_subsidy, enforce_fork_warmup, ChainParams,
};
use capcore_crypto::{sha256, BlsPrivateKey, PrivateKey};
use capcore_poc::{NativeProof, PosProof, Proof, SyntheticPosVerifier};
use capcore_script::{pay_to_witness_script_hash, single_key_redeem};
use capcore_storage::MemoryKv;
use capcore_types::{
    Amount, Block, BlockHeader, FaultPubKey, NodePubKey, NodeSignature, OutPoint, ProposalArea,
    Transaction, TxInput, TxOutput, H256,
};
use tempfile::TempDir;

/// Who builds a block.
#[derive(Clone)]
pub enum Miner {
    /// Native proof with a secp key.
    Secp(PrivateKey),
    /// PoS proof: plot key signs, pool key owns the plot.
    Pos {
        /// Header signing key (the plot key).
        plot_sk: BlsPrivateKey,
        /// Pool key embedded in the proof.
        pool_sk: BlsPrivateKey,
        /// Plot parameter.
        k: u8,
    },
}

/// Everything a fixture block can vary.
pub struct BlockSpec {
    /// Parent block hash.
    pub parent: H256,
    /// Seconds after the parent timestamp.
    pub time_delta: u64,
    /// Non-coinbase transactions.
    pub txs: Vec<Transaction>,
    /// The builder.
    pub miner: Miner,
    /// Extra coinbase inputs (pre-fork binding inputs).
    pub coinbase_extra_inputs: Vec<OutPoint>,
    /// Script of the miner payout output.
    pub coinbase_script: Vec<u8>,
    /// Leading staking payouts `(value, script_hash)`.
    pub staking_rewards: Vec<(u64, [u8; 32])>,
    /// Declared staking-reward count.
    pub declared_staking: u32,
    /// Punishment proposals (mirrored into the ban list).
    pub proposals: Vec<FaultPubKey>,
    /// Whether the reward computation should see a valid binding.
    pub has_binding: bool,
    /// Replace the computed binding root (invalid-root tests).
    pub binding_root_override: Option<H256>,
}

impl BlockSpec {
    /// A plain empty block on `parent` built by `miner`.
    pub fn empty(parent: H256, miner: Miner, coinbase_script: Vec<u8>) -> Self {
        Self {
            parent,
            time_delta: 45,
            txs: Vec::new(),
            miner,
            coinbase_extra_inputs: Vec::new(),
            coinbase_script,
            staking_rewards: Vec::new(),
            declared_staking: 0,
            proposals: Vec::new(),
            has_binding: false,
            binding_root_override: None,
        }
    }
}

/// A running regtest chain plus the ledger the builder needs.
pub struct Harness {
    /// Chain parameters.
    pub params: ChainParams,
    /// The chain under test.
    pub chain: Arc<Blockchain>,
    /// Default block builder key.
    pub miner_sk: PrivateKey,
    /// Funds-holding key.
    pub user_sk: PrivateKey,
    /// Every header the harness has seen, by hash.
    pub headers: HashMap<H256, BlockHeader>,
    /// Every block the harness has built, by hash.
    pub blocks: HashMap<H256, Block>,
    /// Every transaction the harness has built, with its block height.
    pub txs: HashMap<H256, (Transaction, u64)>,
    _tmp: TempDir,
}

impl Harness {
    /// Open a fresh chain with the given parameters.
    pub async fn open(params: ChainParams) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let chain = Blockchain::new(ChainConfig {
            params: params.clone(),
            kv: Arc::new(MemoryKv::new()),
            cache_dir: tmp.path().to_path_buf(),
            pos_verifier: Arc::new(SyntheticPosVerifier),
        })
        .await
        .expect("open chain");

        let mut headers = HashMap::new();
        headers.insert(params.genesis_hash, params.genesis_block.header.clone());
        let mut blocks = HashMap::new();
        blocks.insert(params.genesis_hash, params.genesis_block.clone());
        let mut txs = HashMap::new();
        for tx in &params.genesis_block.transactions {
            txs.insert(tx.tx_hash(), (tx.clone(), 0));
        }

        Self {
            params,
            chain,
            miner_sk: PrivateKey::from_bytes(&sha256(b"harness miner")).expect("key"),
            user_sk: PrivateKey::from_bytes(&sha256(b"harness user")).expect("key"),
            headers,
            blocks,
            txs,
            _tmp: tmp,
        }
    }

    /// The user's p2wsh locking script.
    pub fn user_script(&self) -> Vec<u8> {
        pay_to_witness_script_hash(&self.user_redeem_hash())
    }

    /// SHA-256 of the user's redeem script.
    pub fn user_redeem_hash(&self) -> [u8; 32] {
        sha256(&single_key_redeem(&self.user_sk.public_key()))
    }

    /// Sign every input of a user transaction and install witnesses.
    pub fn sign_user_tx(&self, tx: &mut Transaction) {
        let redeem = single_key_redeem(&self.user_sk.public_key());
        for index in 0..tx.inputs.len() {
            let sig = self.user_sk.sign_hash(tx.sig_hash(index).as_array());
            tx.inputs[index].witness = vec![sig.to_der(), redeem.clone()];
        }
    }

    /// Build a block from a spec; deterministic in its inputs.
    pub fn build_block(&self, spec: &BlockSpec) -> Block {
        let parent = self.headers.get(&spec.parent).expect("parent known");
        let height = parent.height + 1;
        let timestamp = parent.timestamp + spec.time_delta;
        let grandparent_ts = (parent.height > 0)
            .then(|| self.headers.get(&parent.previous).map(|h| h.timestamp))
            .flatten();
        let target = calc_next_target(&self.params, parent, grandparent_ts);
        let challenge = calc_next_challenge(parent);
        let version = block_version_for(&self.params, height);

        // Fees of the included transactions.
        let mut fees = Amount::ZERO;
        for tx in &spec.txs {
            let mut input_total = Amount::ZERO;
            for input in &tx.inputs {
                let (prev, _) = self
                    .txs
                    .get(&input.previous_outpoint.hash)
                    .expect("fixture input known");
                input_total = input_total
                    .checked_add(
                        Amount::from_u64(prev.outputs[input.previous_outpoint.index as usize].value)
                            .expect("value"),
                    )
                    .expect("input sum");
            }
            let output_total: u64 = tx.outputs.iter().map(|o| o.value).sum();
            fees = fees
                .checked_add(
                    input_total
                        .checked_sub(Amount::from_u64(output_total).expect("value"))
                        .expect("fee"),
                )
                .expect("fee sum");
        }

        let has_staking = spec.declared_staking > 0 || !spec.staking_rewards.is_empty();
        let (miner_amt, _) =
            calc_block_subsidy(&self.params, height, spec.has_binding, has_staking)
                .expect("subsidy");

        // Coinbase: staking payouts first, then the miner output.
        let mut coinbase = Transaction::new();
        coinbase.inputs.push(TxInput::new(OutPoint::null()));
        for outpoint in &spec.coinbase_extra_inputs {
            coinbase.inputs.push(TxInput::new(*outpoint));
        }
        for (value, script_hash) in &spec.staking_rewards {
            coinbase
                .outputs
                .push(TxOutput::new(*value, pay_to_witness_script_hash(script_hash)));
        }
        let miner_value = miner_amt.checked_add(fees).expect("reward").as_u64();
        coinbase
            .outputs
            .push(TxOutput::new(miner_value, spec.coinbase_script.clone()));
        // Trailing payload metadata keeps coinbases unique across branches.
        let mut payload =
            capcore_chain::CoinbasePayload::new(height, spec.declared_staking).to_bytes();
        payload.extend_from_slice(&timestamp.to_le_bytes());
        coinbase.payload = payload;

        let mut transactions = vec![coinbase];
        transactions.extend(spec.txs.iter().cloned());

        let proposals = ProposalArea {
            punishments: spec.proposals.clone(),
        };
        let ban_list: Vec<NodePubKey> = spec.proposals.iter().map(|f| f.pub_key).collect();

        let (pub_key, proof) = match &spec.miner {
            Miner::Secp(sk) => (
                NodePubKey::Secp(sk.public_key()),
                Proof::Native(NativeProof::new(height, height + 1, 24)),
            ),
            Miner::Pos {
                plot_sk,
                pool_sk,
                k,
            } => {
                let pool_pk = pool_sk.public_key();
                let plot_pk = plot_sk.public_key();
                let plot_id = capcore_crypto::sha256_concat(&[
                    &pool_pk.to_bytes(),
                    &plot_pk.to_bytes(),
                ]);
                (
                    NodePubKey::Bls(plot_pk),
                    Proof::Pos(PosProof {
                        k: *k,
                        plot_id,
                        pool_pk,
                        plot_pk,
                        proof: SyntheticPosVerifier::make_proof(
                            &plot_id,
                            challenge.as_array(),
                            *k,
                        ),
                    }),
                )
            }
        };

        let mut header = BlockHeader {
            chain_id: self.params.chain_id,
            version,
            height,
            timestamp,
            previous: spec.parent,
            transaction_root: H256::ZERO,
            witness_root: H256::ZERO,
            proposal_root: proposals.merkle_root().expect("proposal root"),
            target,
            challenge,
            pub_key,
            proof,
            signature: match &spec.miner {
                Miner::Secp(sk) => NodeSignature::Secp(sk.sign(b"placeholder")),
                Miner::Pos { plot_sk, .. } => NodeSignature::Bls(plot_sk.sign(b"placeholder")),
            },
            ban_list,
            binding_root: H256::ZERO,
        };

        let draft = Block::new(header.clone(), proposals.clone(), transactions.clone());
        header.transaction_root = draft.compute_transaction_root(false);
        header.witness_root = draft.compute_transaction_root(true);

        // Binding root for V2 blocks: replay the block's binding effects on
        // the parent state.
        if enforce_fork_warmup(&self.params, height) {
            let mut working = self
                .chain
                .binding_state_of(parent)
                .expect("parent binding state")
                .copy();
            let store = self.make_tx_store(&draft, height);
            apply_block_bindings(&mut working, &self.params, &draft, &store)
                .expect("fixture binding application");
            header.binding_root = H256::new(working.hash());
        }
        if let Some(root) = spec.binding_root_override {
            header.binding_root = root;
        }

        let digest = header.poc_digest();
        header.signature = match &spec.miner {
            Miner::Secp(sk) => NodeSignature::Secp(sk.sign_hash(&digest)),
            Miner::Pos { plot_sk, .. } => NodeSignature::Bls(plot_sk.sign(&digest)),
        };

        Block::new(header, proposals, transactions)
    }

    fn make_tx_store(&self, block: &Block, height: u64) -> TxStore {
        let mut store = TxStore::new();
        for tx in &block.transactions {
            let skip = usize::from(tx.is_coinbase());
            for input in tx.inputs.iter().skip(skip) {
                let hash = input.previous_outpoint.hash;
                if let Some((prev, prev_height)) = self.txs.get(&hash) {
                    store.insert(hash, TxData::new(prev.clone(), *prev_height));
                }
            }
            store.insert(tx.tx_hash(), TxData::new(tx.clone(), height));
        }
        store
    }

    /// Submit a block through the pipeline and record its contents.
    pub async fn submit(&mut self, block: Block) -> Result<bool> {
        let result = self
            .chain
            .process_with_flags(Arc::new(block.clone()), BehaviorFlags::NO_POC_CHECK)
            .await;
        if result.is_ok() {
            self.record(&block);
        }
        result
    }

    /// Record a block's header and transactions without submitting it.
    pub fn record(&mut self, block: &Block) {
        self.headers
            .insert(block.block_hash(), block.header.clone());
        self.blocks.insert(block.block_hash(), block.clone());
        for tx in &block.transactions {
            self.txs.insert(tx.tx_hash(), (tx.clone(), block.height()));
        }
    }

    /// Build and submit a plain block on `parent`, returning its hash.
    pub async fn mine_on(&mut self, parent: H256) -> H256 {
        let spec = BlockSpec::empty(parent, Miner::Secp(self.miner_sk.clone()), self.user_script());
        let block = self.build_block(&spec);
        let hash = block.block_hash();
        let orphan = self.submit(block).await.expect("mine_on accepted");
        assert!(!orphan, "mine_on produced an orphan");
        hash
    }

    /// Mine `count` plain blocks on top of `parent`, returning the tip.
    pub async fn mine_chain(&mut self, mut parent: H256, count: usize) -> H256 {
        for _ in 0..count {
            parent = self.mine_on(parent).await;
        }
        parent
    }

    /// The coinbase transaction of the recorded block `hash`.
    pub fn coinbase_of(&self, hash: &H256) -> Transaction {
        self.blocks.get(hash).expect("known block").transactions[0].clone()
    }
}
