//! # CapCore Trie
//!
//! A hex-nibble Merkle Patricia trie persisted to a key-value store by
//! content hash. The binding state of every block is one of these tries;
//! its root is committed in the V2 block header.
//!
//! Two node shapes exist: a branch with sixteen child slots plus an optional
//! value, and a short node carrying a compact-encoded key segment that is
//! either a leaf (value) or an extension (child reference). Node hashes are
//! SHA-256 over the encoded node layout, so identical subtrees share
//! storage.
//!
//! Operations:
//! - [`Trie::try_get`] / [`Trie::try_update`] / [`Trie::try_delete`]
//! - [`Trie::hash`] - root of the current, possibly uncommitted trie
//! - [`Trie::commit`] - persist all dirty nodes in one batched write
//! - [`Trie::copy`] - independent snapshot sharing committed nodes
//! - [`Trie::node_iterator`] - pre-order traversal for export/diagnostics

pub mod iterator;
pub mod nibbles;
pub mod node;
pub mod store;
mod trie;

pub use iterator::{IterEntry, NodeIterator};
pub use store::{MemoryTrieStore, TrieStore};
pub use trie::{Trie, EMPTY_ROOT};

/// A trie node content hash.
pub type NodeHash = [u8; 32];

/// Errors raised by trie operations.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// A referenced node is absent from the store; the trie is incomplete
    /// at the opened root.
    #[error("missing trie node {0}")]
    MissingNode(String),

    /// Underlying store failure; transient, never cached by callers.
    #[error("trie store error: {0}")]
    Store(String),

    /// A stored node failed to decode.
    #[error("corrupt trie node: {0}")]
    Decode(String),
}

/// Result alias for trie operations.
pub type Result<T> = std::result::Result<T, TrieError>;
