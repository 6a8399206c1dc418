//! Punishment bookkeeping: the pending-proposal pool and ban queries.

use capcore_storage::ChainDb;
use capcore_types::{FaultPubKey, NodePubKey};
use std::collections::HashMap;

use crate::error::Result;
use crate::tree::{BlockTree, NodeId};

/// Pending fault-pubkey punishments awaiting publication in a block.
#[derive(Default)]
pub struct ProposalPool {
    pending: HashMap<Vec<u8>, FaultPubKey>,
}

impl ProposalPool {
    /// Build a pool seeded with persisted punishments.
    pub fn new(initial: Vec<FaultPubKey>) -> Self {
        let mut pending = HashMap::new();
        for fault in initial {
            pending.insert(fault.pub_key.serialize(), fault);
        }
        Self { pending }
    }

    /// Track a new punishment record.
    pub fn insert(&mut self, fault: FaultPubKey) {
        self.pending.entry(fault.pub_key.serialize()).or_insert(fault);
    }

    /// Drop the record for a key (it was published on chain).
    pub fn remove(&mut self, pubkey: &NodePubKey) {
        self.pending.remove(&pubkey.serialize());
    }

    /// Whether a record for `pubkey` is pending.
    pub fn contains(&self, pubkey: &NodePubKey) -> bool {
        self.pending.contains_key(&pubkey.serialize())
    }

    /// All pending records, ready for inclusion in a block template.
    pub fn items(&self) -> Vec<FaultPubKey> {
        self.pending.values().cloned().collect()
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Whether `pubkey` is banned from the point of view of `prev`.
///
/// Side-chain segments of the branch are inspected through their headers'
/// ban lists; the main-chain portion consults the persistent ban set, which
/// applies when the banning block is an ancestor of `prev`.
pub fn is_pub_key_banned(
    db: &ChainDb,
    tree: &BlockTree,
    prev_id: NodeId,
    pubkey: &NodePubKey,
) -> Result<bool> {
    let pk_bytes = pubkey.serialize();

    // Walk the side-chain portion of the branch.
    let mut current = Some(prev_id);
    while let Some(id) = current {
        let node = tree.node(id);
        if node.in_main_chain {
            break;
        }
        if node
            .header
            .ban_list
            .iter()
            .any(|banned| banned.serialize() == pk_bytes)
        {
            return Ok(true);
        }
        current = node.parent;
    }

    // Main-chain bans apply when their block is at or below the branch
    // point.
    if let Some(record) = db.fetch_ban(pubkey)? {
        let prev = tree.node(prev_id);
        if record.height <= prev.height() {
            match tree.ancestor(prev_id, record.height) {
                Some(ancestor) => {
                    if tree.node(ancestor).in_main_chain {
                        return Ok(true);
                    }
                }
                // Below the in-memory window; anything that deep is main
                // chain.
                None => return Ok(true),
            }
        }
    }

    Ok(false)
}
