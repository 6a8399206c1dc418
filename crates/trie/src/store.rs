//! Node persistence seam.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{NodeHash, Result};

/// Backing store for trie nodes, keyed by content hash.
///
/// Implementations must make `put_batch` atomic: a crash mid-commit leaves
/// the store holding the previous block's trie intact.
pub trait TrieStore: Send + Sync {
    /// Fetch an encoded node.
    fn get_node(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>>;

    /// Persist a batch of encoded nodes in one write.
    fn put_batch(&self, nodes: Vec<(NodeHash, Vec<u8>)>) -> Result<()>;
}

/// In-memory node store for tests and throwaway tries.
#[derive(Debug, Default, Clone)]
pub struct MemoryTrieStore {
    nodes: Arc<RwLock<HashMap<NodeHash, Vec<u8>>>>,
}

impl MemoryTrieStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl TrieStore for MemoryTrieStore {
    fn get_node(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn put_batch(&self, nodes: Vec<(NodeHash, Vec<u8>)>) -> Result<()> {
        let mut guard = self.nodes.write();
        for (hash, encoded) in nodes {
            guard.insert(hash, encoded);
        }
        Ok(())
    }
}
