//! The acceptance engine.

use alloy_primitives::U256;
use capcore_consensus::{enforce_fork_warmup, ChainParams};
use capcore_poc::{PosQualityVerifier, Proof};
use capcore_storage::{BanRecord, ChainDb, KvStore, TrieKv, TxLocation, WriteBatch};
use capcore_trie::{Trie, TrieStore};
use capcore_types::{Block, BlockHeader, Transaction, H256};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{BlockCache, BLOCK_CACHE_FILE_NAME};
use crate::connect::{check_connect_block, ConnectEnv};
use crate::error::{BlockError, ContextError, Result};
use crate::errcache::ErrCache;
use crate::indexer::AddrIndexer;
use crate::orphan::OrphanBlockPool;
use crate::punish::{is_pub_key_banned, ProposalPool};
use crate::tree::{BlockNode, BlockTree, NodeId, MIN_MEMORY_NODES};
use crate::txstore::TxStore;
use crate::validate::{
    calc_next_challenge, calc_next_target, check_block_sanity, is_finalized_transaction,
};
use crate::BehaviorFlags;

/// Capacity of the acceptance request channel.
const MAX_PROCESS_QUEUE: usize = 1024;

/// Capacity of the chain event broadcast channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Capacity of the rejection cache.
const BLOCK_ERR_CACHE_SIZE: usize = 500;

/// Number of ancestor timestamps feeding the median time past.
const MEDIAN_TIME_BLOCKS: usize = 11;

/// Configuration for opening a chain.
pub struct ChainConfig {
    /// Chain parameters.
    pub params: ChainParams,
    /// The backing key-value store.
    pub kv: Arc<dyn KvStore>,
    /// Directory for the side-chain block cache.
    pub cache_dir: PathBuf,
    /// Verifier for PoS plot-file proofs.
    pub pos_verifier: Arc<dyn PosQualityVerifier>,
}

/// Events observers may subscribe to.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A block was connected to the main chain.
    BlockConnected(Arc<Block>),
    /// A loose transaction passed sanity checks.
    TxReceived(Arc<Transaction>),
}

struct ProcessMsg {
    block: Arc<Block>,
    flags: BehaviorFlags,
    reply: oneshot::Sender<Result<bool>>,
}

/// The chain state machine.
///
/// All mutation happens on one dispatcher task consuming [`ProcessMsg`]s;
/// accessor methods take read locks only.
pub struct Blockchain {
    params: ChainParams,
    db: ChainDb,
    trie_store: Arc<dyn TrieStore>,
    indexer: AddrIndexer,
    pos_verifier: Arc<dyn PosQualityVerifier>,

    tree: RwLock<BlockTree>,
    orphans: Mutex<OrphanBlockPool>,
    err_cache: Mutex<ErrCache>,
    side_cache: Mutex<BlockCache>,
    proposal_pool: Mutex<ProposalPool>,

    events: broadcast::Sender<ChainEvent>,
    tip_height: watch::Sender<u64>,
    process_tx: mpsc::Sender<ProcessMsg>,
}

impl Blockchain {
    /// Open (or bootstrap) a chain and start its dispatcher task.
    pub async fn new(config: ChainConfig) -> Result<Arc<Self>> {
        let db = ChainDb::new(Arc::clone(&config.kv));
        let trie_store: Arc<dyn TrieStore> = Arc::new(TrieKv::new(Arc::clone(&config.kv)));
        let side_cache = BlockCache::open(config.cache_dir.join(BLOCK_CACHE_FILE_NAME))?;
        let pending = db.fetch_punishments()?;

        let (process_tx, mut process_rx) = mpsc::channel(MAX_PROCESS_QUEUE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (tip_height, _) = watch::channel(0);

        let chain = Arc::new(Self {
            params: config.params,
            indexer: AddrIndexer::new(db.clone()),
            db,
            trie_store,
            pos_verifier: config.pos_verifier,
            tree: RwLock::new(BlockTree::new()),
            orphans: Mutex::new(OrphanBlockPool::new()),
            err_cache: Mutex::new(ErrCache::new(BLOCK_ERR_CACHE_SIZE)),
            side_cache: Mutex::new(side_cache),
            proposal_pool: Mutex::new(ProposalPool::new(pending)),
            events,
            tip_height,
            process_tx,
        });

        chain.init_genesis()?;
        chain.load_initial_index()?;

        let worker = Arc::clone(&chain);
        tokio::spawn(async move {
            while let Some(msg) = process_rx.recv().await {
                let result = worker.process_block(&msg.block, msg.flags);
                let _ = msg.reply.send(result);
            }
        });

        Ok(chain)
    }

    /// Submit a block; resolves once the dispatcher has processed it.
    ///
    /// `Ok(true)` means the block was filed as an orphan - the success path
    /// when the parent is unknown.
    pub async fn process(&self, block: Arc<Block>) -> Result<bool> {
        self.process_with_flags(block, BehaviorFlags::NONE).await
    }

    /// Submit a block with explicit behavior flags.
    pub async fn process_with_flags(
        &self,
        block: Arc<Block>,
        flags: BehaviorFlags,
    ) -> Result<bool> {
        let (reply, receiver) = oneshot::channel();
        self.process_tx
            .send(ProcessMsg {
                block,
                flags,
                reply,
            })
            .await
            .map_err(|_| BlockError::Transient("acceptance pipeline stopped".into()))?;
        receiver
            .await
            .map_err(|_| BlockError::Transient("acceptance pipeline dropped reply".into()))?
    }

    /// Sanity-check a loose transaction and announce it to subscribers.
    pub fn announce_transaction(&self, tx: Arc<Transaction>) -> Result<()> {
        crate::validate::check_transaction_sanity(&tx)?;
        let _ = self.events.send(ChainEvent::TxReceived(tx));
        Ok(())
    }

    /// Subscribe to chain events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// A watch over the best height, for height-threshold waiters.
    pub fn best_height_watch(&self) -> watch::Receiver<u64> {
        self.tip_height.subscribe()
    }

    /// Wait until the best chain reaches `height`.
    ///
    /// Errors when the chain is already past it.
    pub async fn block_waiter(&self, height: u64) -> Result<u64> {
        let mut rx = self.tip_height.subscribe();
        let current = *rx.borrow();
        if current > height {
            return Err(BlockError::Transient(format!(
                "waiting for old block height {height}, best is {current}"
            )));
        }
        loop {
            let reached = *rx.borrow_and_update();
            if reached >= height {
                return Ok(reached);
            }
            if rx.changed().await.is_err() {
                return Err(BlockError::Transient("chain stopped".into()));
            }
        }
    }

    // ---- accessors --------------------------------------------------------

    /// Chain parameters.
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// The chain database.
    pub fn db(&self) -> &ChainDb {
        &self.db
    }

    /// The address indexer.
    pub fn indexer(&self) -> &AddrIndexer {
        &self.indexer
    }

    /// Best-tip height.
    pub fn best_block_height(&self) -> u64 {
        self.tree
            .read()
            .best()
            .map(|node| node.height())
            .unwrap_or(0)
    }

    /// Best-tip hash.
    pub fn best_block_hash(&self) -> H256 {
        self.tree
            .read()
            .best()
            .map(|node| node.hash)
            .unwrap_or(self.params.genesis_hash)
    }

    /// Best-tip header.
    pub fn best_block_header(&self) -> Option<BlockHeader> {
        self.tree.read().best().map(|node| node.header.clone())
    }

    /// Header by hash, from the tree or the database.
    pub fn header_by_hash(&self, hash: &H256) -> Result<Option<BlockHeader>> {
        if let Some(node) = self.tree.read().get(hash) {
            return Ok(Some(node.header.clone()));
        }
        Ok(self.db.fetch_block(hash)?.map(|block| block.header))
    }

    /// Whether `hash` is a known main-chain block.
    pub fn in_main_chain(&self, hash: &H256) -> bool {
        if let Some(node) = self.tree.read().get(hash) {
            return node.in_main_chain;
        }
        matches!(self.db.fetch_block_height(hash), Ok(Some(_)))
    }

    /// The binding state at the current best tip.
    pub fn best_binding_state(&self) -> Result<Trie> {
        let header = self
            .best_block_header()
            .ok_or_else(|| BlockError::Transient("empty tree".into()))?;
        self.binding_state_of(&header)
    }

    /// Whether a block hash is known to the chain (main, side or database).
    pub fn block_exists(&self, hash: &H256) -> Result<bool> {
        if self.tree.read().contains(hash) {
            return Ok(true);
        }
        Ok(self.db.block_exists(hash)?)
    }

    /// The binding state a header commits to.
    pub fn binding_state_of(&self, header: &BlockHeader) -> Result<Trie> {
        if !enforce_fork_warmup(&self.params, header.height) {
            return Ok(Trie::new(Arc::clone(&self.trie_store)));
        }
        if header.binding_root.is_zero() {
            return Err(BlockError::Transient(format!(
                "unexpected empty binding root at {}",
                header.height
            )));
        }
        Ok(Trie::open(
            Arc::clone(&self.trie_store),
            *header.binding_root.as_array(),
        )?)
    }

    // ---- bootstrap --------------------------------------------------------

    fn init_genesis(&self) -> Result<()> {
        if self.db.fetch_tip()?.is_some() {
            return Ok(());
        }
        let genesis = &self.params.genesis_block;
        info!(hash = %genesis.block_hash(), "initializing database from genesis");
        let mut batch = WriteBatch::new();
        self.db.stage_block(&mut batch, genesis)?;
        for (tx_index, tx) in genesis.transactions.iter().enumerate() {
            self.db.stage_tx_location(
                &mut batch,
                &tx.tx_hash(),
                &TxLocation {
                    height: 0,
                    block_hash: genesis.block_hash(),
                    tx_index: tx_index as u32,
                    spent: vec![false; tx.outputs.len()],
                },
            )?;
        }
        self.db.apply(batch)?;
        Ok(())
    }

    fn load_initial_index(&self) -> Result<()> {
        let (_, tip_height) = self
            .db
            .fetch_tip()?
            .ok_or_else(|| BlockError::Transient("uninitialized database".into()))?;
        let start = tip_height.saturating_sub(MIN_MEMORY_NODES);

        let mut tree = self.tree.write();
        for height in start..=tip_height {
            let block = self.db.fetch_block_by_height(height)?.ok_or_else(|| {
                BlockError::Transient(format!("missing main-chain block at {height}"))
            })?;
            let quality = self.unverified_quality(&block.header);
            let mut node = BlockNode::from_header(block.header, quality);
            node.in_main_chain = true;
            let id = if tree.is_empty() {
                tree.set_root(node)
            } else {
                tree.attach(node)
            }
            .map_err(|e| BlockError::Transient(e.to_string()))?;
            tree.set_best(id);
        }
        let best_height = tree.best().map(|n| n.height()).unwrap_or(0);
        drop(tree);
        let _ = self.tip_height.send(best_height);
        Ok(())
    }

    /// Quality without proof verification, for nodes restored from the
    /// database; mirrors the header's own quality evaluation.
    fn unverified_quality(&self, header: &BlockHeader) -> U256 {
        let post_fork = capcore_consensus::enforce_fork(&self.params, header.height);
        match &header.proof {
            Proof::Native(p) => p.quality(header.slot(), header.height, post_fork),
            Proof::Pos(p) => self
                .pos_verifier
                .verify_quality(&p.plot_id, header.challenge.as_array(), &p.proof, p.k)
                .ok()
                .filter(|q| !q.is_empty())
                .map(|q| p.quality(&q, header.slot(), header.height))
                .unwrap_or(U256::ZERO),
            Proof::Empty => U256::ZERO,
        }
    }

    // ---- the pipeline -----------------------------------------------------

    fn process_block(&self, block: &Arc<Block>, flags: BehaviorFlags) -> Result<bool> {
        let hash = block.block_hash();
        trace!(
            %hash,
            height = block.height(),
            tx_count = block.transactions.len(),
            "processing block"
        );

        if self.block_exists(&hash)? {
            return Ok(false);
        }
        if self.orphans.lock().contains(&hash) {
            return Ok(true);
        }
        if let Some(cached) = self.err_cache.lock().get(&hash) {
            return Err(cached.clone());
        }

        let quality = match check_block_sanity(
            &self.params,
            block,
            flags,
            unix_now(),
            self.pos_verifier.as_ref(),
        ) {
            Ok(quality) => quality,
            Err(e) => {
                self.err_cache.lock().insert(hash, e.clone());
                return Err(e);
            }
        };

        // Blocks older than the latest checkpoint are not worth keeping.
        if let Some((_, cp_timestamp)) = self.previous_checkpoint(self.best_block_height())? {
            if block.header.timestamp < cp_timestamp {
                return Err(ContextError::CheckpointTimeTooOld.into());
            }
        }

        let previous = block.header.previous;
        if !previous.is_zero() && !self.block_exists(&previous)? {
            info!(
                orphan = %hash,
                height = block.height(),
                parent = %previous,
                "adding orphan block"
            );
            self.orphans.lock().add(Arc::clone(block));
            return Ok(true);
        }

        if let Err(e) = self.maybe_accept_block(block, flags, quality) {
            if e.is_cacheable() {
                self.err_cache.lock().insert(hash, e.clone());
            }
            return Err(e);
        }

        self.process_orphans(hash, flags)?;

        debug!(%hash, height = block.height(), "accepted block");
        Ok(false)
    }

    fn process_orphans(&self, accepted: H256, flags: BehaviorFlags) -> Result<()> {
        let mut ready = vec![accepted];
        while let Some(parent) = ready.pop() {
            let children = self.orphans.lock().children_of(&parent);
            for child in children {
                let child_hash = child.block_hash();
                let quality = match check_block_sanity(
                    &self.params,
                    &child,
                    flags,
                    unix_now(),
                    self.pos_verifier.as_ref(),
                ) {
                    Ok(quality) => quality,
                    Err(e) => {
                        self.err_cache.lock().insert(child_hash, e.clone());
                        self.orphans.lock().remove(&child_hash);
                        return Err(e);
                    }
                };
                info!(parent = %parent, child = %child_hash, "processing orphan");
                if let Err(e) = self.maybe_accept_block(&child, flags, quality) {
                    if e.is_cacheable() {
                        self.err_cache.lock().insert(child_hash, e.clone());
                    }
                    self.orphans.lock().remove(&child_hash);
                    return Err(e);
                }
                self.orphans.lock().remove(&child_hash);
                ready.push(child_hash);
            }
        }
        Ok(())
    }

    fn maybe_accept_block(
        &self,
        block: &Arc<Block>,
        flags: BehaviorFlags,
        quality: U256,
    ) -> Result<()> {
        let prev_id = self.get_prev_node(&block.header.previous)?;
        self.check_block_context(block, prev_id)?;
        let node = BlockNode::from_header(block.header.clone(), quality);
        self.connect_best_chain(node, block, flags, prev_id)
    }

    /// Resolve the parent node, loading main-chain history into the tree if
    /// needed.
    fn get_prev_node(&self, previous: &H256) -> Result<NodeId> {
        if let Some(id) = self.tree.read().id_of(previous) {
            return Ok(id);
        }
        let block = self.db.fetch_block(previous)?.ok_or_else(|| {
            BlockError::Transient(format!("previous block {previous} not found"))
        })?;
        let quality = self.unverified_quality(&block.header);
        let mut node = BlockNode::from_header(block.header, quality);
        node.in_main_chain = true;

        let mut tree = self.tree.write();
        let id = if tree.contains(&node.header.previous) {
            tree.attach(node)
        } else if tree.is_empty() {
            tree.set_root(node)
        } else {
            tree.expand_root(node)
        }
        .map_err(|e| BlockError::Transient(e.to_string()))?;
        Ok(id)
    }

    fn check_block_context(&self, block: &Arc<Block>, prev_id: NodeId) -> Result<()> {
        let tree = self.tree.read();
        let prev = tree.node(prev_id);
        let header = &block.header;

        if is_pub_key_banned(&self.db, &tree, prev_id, &header.pub_key)? {
            warn!(height = header.height, "banned public key built a block");
            return Err(ContextError::BannedPubKey.into());
        }

        let grandparent_ts = prev
            .parent
            .map(|gp| tree.node(gp).header.timestamp)
            .or_else(|| {
                (prev.height() > 0)
                    .then(|| self.db.fetch_block_by_height(prev.height() - 1).ok())
                    .flatten()
                    .flatten()
                    .map(|b| b.header.timestamp)
            });
        let expected_target = calc_next_target(&self.params, &prev.header, grandparent_ts);
        if header.target != expected_target {
            debug!(
                actual = %header.target,
                expected = %expected_target,
                height = header.height,
                "unexpected difficulty target"
            );
            return Err(ContextError::UnexpectedTarget.into());
        }

        if header.height != prev.height() + 1 {
            return Err(ContextError::BadHeight.into());
        }

        if let Some(checkpoint) = self.params.checkpoint_at(header.height) {
            if checkpoint.hash != block.block_hash() {
                return Err(ContextError::BadCheckpoint.into());
            }
        }
        let best_height = tree.best().map(|n| n.height()).unwrap_or(0);
        if let Some((cp_height, _)) = self.previous_checkpoint(best_height)? {
            if header.height < cp_height {
                return Err(ContextError::ForkTooOld.into());
            }
        }

        let expected_challenge = calc_next_challenge(&prev.header);
        if header.challenge != expected_challenge {
            return Err(ContextError::UnexpectedChallenge.into());
        }

        if header.slot() <= prev.header.slot() {
            return Err(ContextError::TimeTooOld.into());
        }

        for fault in &block.proposals.punishments {
            if is_pub_key_banned(&self.db, &tree, prev_id, &fault.pub_key)? {
                return Err(ContextError::AlreadyBanned.into());
            }
        }

        let median_time = self.median_time_past(&tree, prev_id);
        for tx in &block.transactions {
            if !is_finalized_transaction(tx, header.height, median_time) {
                return Err(ContextError::UnfinalizedTx.into());
            }
        }

        Ok(())
    }

    fn median_time_past(&self, tree: &BlockTree, from: NodeId) -> u64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_BLOCKS);
        let mut current = Some(from);
        while let Some(id) = current {
            if timestamps.len() == MEDIAN_TIME_BLOCKS {
                break;
            }
            let node = tree.node(id);
            timestamps.push(node.header.timestamp);
            current = node.parent;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// The latest checkpoint at or below the best height, with the
    /// timestamp of its block.
    fn previous_checkpoint(&self, best_height: u64) -> Result<Option<(u64, u64)>> {
        let Some(checkpoint) = self.params.latest_checkpoint_at(best_height) else {
            return Ok(None);
        };
        let block = self
            .db
            .fetch_block_by_height(checkpoint.height)?
            .ok_or_else(|| BlockError::Transient("checkpoint block missing".into()))?;
        Ok(Some((checkpoint.height, block.header.timestamp)))
    }

    // ---- connect / reorganize --------------------------------------------

    fn connect_best_chain(
        &self,
        node: BlockNode,
        block: &Arc<Block>,
        flags: BehaviorFlags,
        prev_id: NodeId,
    ) -> Result<()> {
        let best_matches_parent = {
            let tree = self.tree.read();
            tree.best_id() == Some(prev_id)
        };

        if best_matches_parent {
            // Direct extension of the best chain.
            self.validate_and_connect(block, flags, prev_id)?;
            {
                let mut tree = self.tree.write();
                let id = tree
                    .attach(node)
                    .map_err(|e| BlockError::Transient(e.to_string()))?;
                tree.node_mut(id).in_main_chain = true;
                tree.set_best(id);
            }
            self.after_tip_advance(&[Arc::clone(block)]);
            return Ok(());
        }

        // Side chain: attach and cache the body, then reorganize if it
        // takes the lead.
        let (id, beats) = {
            let mut tree = self.tree.write();
            let id = tree
                .attach(node)
                .map_err(|e| BlockError::Transient(e.to_string()))?;
            (id, tree.beats_best(id))
        };
        self.side_cache.lock().add_block(block)?;

        if !beats {
            info!(
                hash = %block.block_hash(),
                height = block.height(),
                "filing side-chain block"
            );
            return Ok(());
        }

        self.reorganize(id, block, flags)
    }

    /// Run connect-level validation and persist the block's effects.
    fn validate_and_connect(
        &self,
        block: &Arc<Block>,
        flags: BehaviorFlags,
        prev_id: NodeId,
    ) -> Result<TxStore> {
        let parent_header = self.tree.read().node(prev_id).header.clone();
        let median_time_past = {
            let tree = self.tree.read();
            self.median_time_past(&tree, prev_id)
        };

        let mut working = self.binding_state_of(&parent_header)?.copy();
        let env = ConnectEnv {
            params: &self.params,
            db: &self.db,
            median_time_past,
            latest_checkpoint_height: self
                .previous_checkpoint(self.best_block_height())?
                .map(|(h, _)| h),
            staking_ranks: self.db.fetch_staking_ranks(block.height())?,
        };
        let tx_store = check_connect_block(&env, block, flags, &mut working)?;

        if enforce_fork_warmup(&self.params, block.height()) {
            working.commit()?;
        }

        let batch = self.stage_connect(block, &tx_store)?;
        self.db.apply(batch)?;

        let mut pool = self.proposal_pool.lock();
        for fault in &block.proposals.punishments {
            pool.remove(&fault.pub_key);
        }

        Ok(tx_store)
    }

    fn stage_connect(&self, block: &Block, tx_store: &TxStore) -> Result<WriteBatch> {
        let mut batch = WriteBatch::new();
        self.db.stage_block(&mut batch, block)?;

        for (hash, data) in tx_store {
            self.db.stage_tx_location(
                &mut batch,
                hash,
                &TxLocation {
                    height: data.block_height,
                    block_hash: data.block_hash,
                    tx_index: data.tx_index,
                    spent: data.spent.clone(),
                },
            )?;
        }

        for fault in &block.proposals.punishments {
            self.db.stage_ban(
                &mut batch,
                &BanRecord {
                    height: block.height(),
                    fault: fault.clone(),
                },
            )?;
            self.db.stage_punishment_removal(&mut batch, &fault.pub_key);
        }

        self.db
            .stage_mined_block(&mut batch, &block.header.pub_key, block.height());
        self.indexer.stage_attach(&mut batch, block, tx_store)?;
        Ok(batch)
    }

    fn stage_disconnect(&self, block: &Block, batch: &mut WriteBatch) -> Result<()> {
        let height = block.height();
        self.db
            .stage_block_removal(batch, block, (block.header.previous, height - 1))?;

        let own: HashSet<H256> = block.transactions.iter().map(|tx| tx.tx_hash()).collect();
        for tx in &block.transactions {
            self.db.stage_tx_location_removal(batch, &tx.tx_hash());
            let skip_null = usize::from(tx.is_coinbase());
            for input in tx.inputs.iter().skip(skip_null) {
                let outpoint = &input.previous_outpoint;
                if own.contains(&outpoint.hash) {
                    continue;
                }
                if let Some(mut location) = self.db.fetch_tx_location(&outpoint.hash)? {
                    let index = outpoint.index as usize;
                    if index < location.spent.len() {
                        location.spent[index] = false;
                        self.db
                            .stage_tx_location(batch, &outpoint.hash, &location)?;
                    }
                }
            }
        }

        self.db.stage_ban_removal_at(batch, height)?;
        self.db
            .stage_mined_block_removal(batch, &block.header.pub_key, height);
        self.indexer.stage_detach(batch, block)?;
        Ok(())
    }

    fn reorganize(&self, new_tip_id: NodeId, new_block: &Arc<Block>, flags: BehaviorFlags) -> Result<()> {
        let (old_best_id, detach_list, attach_list) = {
            let tree = self.tree.read();
            let best_id = tree
                .best_id()
                .ok_or_else(|| BlockError::Transient("empty tree".into()))?;
            let (_, detach_path, attach_path) = tree
                .common_ancestor(best_id, new_tip_id)
                .ok_or_else(|| BlockError::Transient("no common ancestor in memory".into()))?;

            // Resolve bodies: main-chain blocks from the database, side
            // blocks from the cache, the new tip from the caller.
            let mut detach_list = Vec::with_capacity(detach_path.len());
            for id in detach_path {
                let hash = tree.node(id).hash;
                let body = self.db.fetch_block(&hash)?.ok_or_else(|| {
                    BlockError::Transient(format!("detach block {hash} missing"))
                })?;
                detach_list.push((id, body));
            }
            let mut attach_list = Vec::with_capacity(attach_path.len());
            for id in attach_path.into_iter().rev() {
                let hash = tree.node(id).hash;
                let body = if id == new_tip_id {
                    new_block.as_ref().clone()
                } else {
                    self.side_cache.lock().get_block(&hash)?.ok_or_else(|| {
                        BlockError::Transient(format!("side block {hash} not cached"))
                    })?
                };
                attach_list.push((id, body));
            }
            (best_id, detach_list, attach_list)
        };

        info!(
            detach = detach_list.len(),
            attach = attach_list.len(),
            new_tip = %new_block.block_hash(),
            "reorganizing chain"
        );

        // Phase 1: detach the old main-chain blocks, tip first.
        for (id, body) in &detach_list {
            let mut batch = WriteBatch::new();
            self.stage_disconnect(body, &mut batch)?;
            self.db.apply(batch)?;
            self.tree.write().node_mut(*id).in_main_chain = false;
            // Detached blocks become side-chain bodies; their punishments
            // return to the pending pool.
            self.side_cache.lock().add_block(body)?;
            let mut pool = self.proposal_pool.lock();
            for fault in &body.proposals.punishments {
                self.db.insert_punishment(fault)?;
                pool.insert(fault.clone());
            }
        }

        // Phase 2: attach the candidate branch with full validation.
        let mut attached: Vec<Arc<Block>> = Vec::with_capacity(attach_list.len());
        for (id, body) in &attach_list {
            let prev_id = self
                .tree
                .read()
                .node(*id)
                .parent
                .ok_or_else(|| BlockError::Transient("attach block lost its parent".into()))?;
            let body = Arc::new(body.clone());
            match self.validate_and_connect(&body, flags, prev_id) {
                Ok(_) => {
                    self.tree.write().node_mut(*id).in_main_chain = true;
                    attached.push(body);
                }
                Err(e) => {
                    warn!(error = %e, "reorg candidate failed; rolling back");
                    self.rollback_reorg(&attached, &detach_list, old_best_id)?;
                    return Err(e);
                }
            }
        }

        self.tree.write().set_best(new_tip_id);
        self.after_tip_advance(&attached);
        Ok(())
    }

    /// Restore the pre-reorg state after a mid-reorg failure; the previous
    /// best tip stays authoritative.
    fn rollback_reorg(
        &self,
        attached: &[Arc<Block>],
        detach_list: &[(NodeId, Block)],
        old_best_id: NodeId,
    ) -> Result<()> {
        for body in attached.iter().rev() {
            let mut batch = WriteBatch::new();
            self.stage_disconnect(body, &mut batch)?;
            self.db.apply(batch)?;
            if let Some(id) = self.tree.read().id_of(&body.block_hash()) {
                self.tree.write().node_mut(id).in_main_chain = false;
            }
            let mut pool = self.proposal_pool.lock();
            for fault in &body.proposals.punishments {
                self.db.insert_punishment(fault)?;
                pool.insert(fault.clone());
            }
        }

        // Re-connect the original blocks ancestor-first; they were valid
        // when first connected, so a lenient re-validation suffices.
        for (id, body) in detach_list.iter().rev() {
            let prev_id = self
                .tree
                .read()
                .node(*id)
                .parent
                .ok_or_else(|| BlockError::Transient("rollback block lost its parent".into()))?;
            let body = Arc::new(body.clone());
            if let Err(e) = self.validate_and_connect(
                &body,
                BehaviorFlags {
                    fast_import: true,
                    no_poc_check: true,
                },
                prev_id,
            ) {
                error!(error = %e, "rollback failed to restore previous chain");
                return Err(BlockError::Transient(format!("reorg rollback failed: {e}")));
            }
            self.tree.write().node_mut(*id).in_main_chain = true;
        }

        self.tree.write().set_best(old_best_id);
        Ok(())
    }

    fn after_tip_advance(&self, connected: &[Arc<Block>]) {
        let best_height = self.best_block_height();
        let _ = self.tip_height.send(best_height);
        for block in connected {
            let _ = self
                .events
                .send(ChainEvent::BlockConnected(Arc::clone(block)));
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
