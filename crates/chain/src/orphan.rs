//! Blocks whose parent is not yet known.

use capcore_types::{Block, H256};
use std::collections::HashMap;
use std::sync::Arc;

/// Pool of orphan blocks, indexed by their parent hash for replay when the
/// parent arrives.
#[derive(Default)]
pub struct OrphanBlockPool {
    by_hash: HashMap<H256, Arc<Block>>,
    by_previous: HashMap<H256, Vec<H256>>,
}

impl OrphanBlockPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `hash` is waiting in the pool.
    pub fn contains(&self, hash: &H256) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Add an orphan block.
    pub fn add(&mut self, block: Arc<Block>) {
        let hash = block.block_hash();
        if self.by_hash.contains_key(&hash) {
            return;
        }
        self.by_previous
            .entry(block.header.previous)
            .or_default()
            .push(hash);
        self.by_hash.insert(hash, block);
    }

    /// Remove a block from the pool.
    pub fn remove(&mut self, hash: &H256) -> Option<Arc<Block>> {
        let block = self.by_hash.remove(hash)?;
        if let Some(children) = self.by_previous.get_mut(&block.header.previous) {
            children.retain(|h| h != hash);
            if children.is_empty() {
                self.by_previous.remove(&block.header.previous);
            }
        }
        Some(block)
    }

    /// Orphans whose parent is `previous`.
    pub fn children_of(&self, previous: &H256) -> Vec<Arc<Block>> {
        self.by_previous
            .get(previous)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| self.by_hash.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of pooled orphans.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_types::ProposalArea;

    fn block_with_previous(previous: H256, tag: u8) -> Arc<Block> {
        let params = capcore_consensus::ChainParams::regtest();
        let mut block = params.genesis_block.clone();
        block.header.previous = previous;
        block.header.height = tag as u64;
        block.proposals = ProposalArea::new();
        Arc::new(block)
    }

    #[test]
    fn test_add_remove_and_children() {
        let parent = H256::sha256(b"parent");
        let mut pool = OrphanBlockPool::new();
        let a = block_with_previous(parent, 1);
        let b = block_with_previous(parent, 2);
        pool.add(Arc::clone(&a));
        pool.add(Arc::clone(&b));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains(&a.block_hash()));

        let children = pool.children_of(&parent);
        assert_eq!(children.len(), 2);

        pool.remove(&a.block_hash());
        assert_eq!(pool.children_of(&parent).len(), 1);
        pool.remove(&b.block_hash());
        assert!(pool.is_empty());
        assert!(pool.children_of(&parent).is_empty());
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let parent = H256::sha256(b"parent");
        let mut pool = OrphanBlockPool::new();
        let a = block_with_previous(parent, 1);
        pool.add(Arc::clone(&a));
        pool.add(a);
        assert_eq!(pool.len(), 1);
    }
}
