//! # CapCore Storage
//!
//! The persistent storage layer:
//!
//! - [`KvStore`] - the key-value seam; [`MemoryKv`] for tests, [`SledKv`]
//!   for disk
//! - [`ChainDb`] - typed chain access over any `KvStore`: blocks by hash
//!   and height, the transaction location/spent index, the ban list, pending
//!   punishments, the mined-block index, the script-hash transaction index
//!   and staking ranks
//! - [`TrieKv`] - adapter exposing a `KvStore` subspace as the binding
//!   trie's node store
//!
//! All writes belonging to one block go through a single [`WriteBatch`], so
//! a crash leaves the database at a block boundary.

pub mod chaindb;
pub mod kv;

pub use chaindb::{BanRecord, ChainDb, StakingRank, TxLocation, WriteBatch};
pub use kv::{BatchOp, KvStore, MemoryKv, SledKv};

use std::sync::Arc;

/// Errors raised by the storage layer.
///
/// `Backend` failures are transient: callers surface them and never cache
/// them against a block hash.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying engine failure.
    #[error("storage backend: {0}")]
    Backend(String),

    /// A stored value failed to decode.
    #[error("corrupt storage entry: {0}")]
    Corrupt(String),

    /// A required entry is absent.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Key prefix for binding-trie nodes.
const TRIE_NODE_PREFIX: &[u8] = b"TRN";

/// Adapter exposing a `KvStore` subspace as a trie node store.
#[derive(Clone)]
pub struct TrieKv {
    kv: Arc<dyn KvStore>,
}

impl TrieKv {
    /// Wrap a key-value store.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn node_key(hash: &[u8; 32]) -> Vec<u8> {
        let mut key = Vec::with_capacity(TRIE_NODE_PREFIX.len() + 32);
        key.extend_from_slice(TRIE_NODE_PREFIX);
        key.extend_from_slice(hash);
        key
    }
}

impl capcore_trie::TrieStore for TrieKv {
    fn get_node(&self, hash: &[u8; 32]) -> capcore_trie::Result<Option<Vec<u8>>> {
        self.kv
            .get(&Self::node_key(hash))
            .map_err(|e| capcore_trie::TrieError::Store(e.to_string()))
    }

    fn put_batch(&self, nodes: Vec<([u8; 32], Vec<u8>)>) -> capcore_trie::Result<()> {
        let ops = nodes
            .into_iter()
            .map(|(hash, encoded)| BatchOp::Put(Self::node_key(&hash), encoded))
            .collect();
        self.kv
            .apply_batch(ops)
            .map_err(|e| capcore_trie::TrieError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_trie::{Trie, TrieStore};

    #[test]
    fn test_trie_over_kv_roundtrip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let store: Arc<dyn TrieStore> = Arc::new(TrieKv::new(Arc::clone(&kv)));
        let mut trie = Trie::new(Arc::clone(&store));
        trie.try_update(b"key", b"value").unwrap();
        let root = trie.commit().unwrap();

        let reopened = Trie::open(store, root).unwrap();
        assert_eq!(reopened.try_get(b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_trie_nodes_live_in_their_prefix() {
        let kv = Arc::new(MemoryKv::new());
        let store: Arc<dyn TrieStore> =
            Arc::new(TrieKv::new(Arc::clone(&kv) as Arc<dyn KvStore>));
        let mut trie = Trie::new(store);
        trie.try_update(b"key", b"value").unwrap();
        trie.commit().unwrap();
        let entries = kv.scan_prefix(TRIE_NODE_PREFIX).unwrap();
        assert!(!entries.is_empty());
    }
}
