//! Trie node shapes and their stored encoding.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::nibbles::{decode_compact, encode_compact};
use crate::{NodeHash, Result, TrieError};

/// An in-memory node.
///
/// Children are [`Handle`]s: either resolved nodes or content-hash
/// references into the store. Loaded subtrees stay shared through the store;
/// mutation replaces handles along the touched path only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Terminal node holding the remaining key nibbles and a value.
    Leaf {
        /// Remaining path below the parent.
        path: Vec<u8>,
        /// Stored value; never empty.
        value: Vec<u8>,
    },
    /// Path compression node.
    Extension {
        /// Shared path prefix.
        path: Vec<u8>,
        /// The single child below the prefix.
        child: Box<Handle>,
    },
    /// Sixteen-way fan-out with an optional value terminating exactly here.
    Branch {
        /// Child slot per nibble.
        children: Box<[Option<Handle>; 16]>,
        /// Value for a key ending at this node.
        value: Option<Vec<u8>>,
    },
}

/// A reference to a node: in memory (dirty or resolved) or by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handle {
    /// Resolved node, possibly modified since load.
    Node(Node),
    /// Content-hash reference to a committed node.
    Hash(NodeHash),
}

/// The persisted form of a node; children are always hash references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoredNode {
    /// Leaf or extension, discriminated by the compact-encoding flag.
    Short {
        /// Compact-encoded path segment.
        key: Vec<u8>,
        /// Leaf value, or the 32-byte child hash for extensions.
        data: Vec<u8>,
    },
    /// Branch node.
    Branch {
        /// Child hashes per nibble.
        children: Box<[Option<NodeHash>; 16]>,
        /// Optional value terminating at the branch.
        value: Option<Vec<u8>>,
    },
}

impl StoredNode {
    /// Encode for storage; the content hash is SHA-256 of this encoding.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("stored node serializes")
    }

    /// Decode a stored node.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| TrieError::Decode(e.to_string()))
    }

    /// Content hash of the encoded node.
    pub fn hash(&self) -> NodeHash {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }

    /// Rebuild the in-memory shape, with hash handles for children.
    pub fn into_node(self) -> Result<Node> {
        match self {
            StoredNode::Short { key, data } => {
                let (path, is_leaf) = decode_compact(&key);
                if is_leaf {
                    Ok(Node::Leaf { path, value: data })
                } else {
                    if data.len() != 32 {
                        return Err(TrieError::Decode(
                            "extension child hash must be 32 bytes".into(),
                        ));
                    }
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&data);
                    Ok(Node::Extension {
                        path,
                        child: Box::new(Handle::Hash(hash)),
                    })
                }
            }
            StoredNode::Branch { children, value } => {
                let mut slots: [Option<Handle>; 16] = Default::default();
                for (i, child) in children.iter().enumerate() {
                    slots[i] = child.map(Handle::Hash);
                }
                Ok(Node::Branch {
                    children: Box::new(slots),
                    value,
                })
            }
        }
    }
}

impl Node {
    /// Produce the stored form given already-committed child hashes.
    ///
    /// `child_hash` resolves an in-memory child to its content hash; hash
    /// handles pass through unchanged.
    pub fn to_stored(&self, mut child_hash: impl FnMut(&Handle) -> NodeHash) -> StoredNode {
        match self {
            Node::Leaf { path, value } => StoredNode::Short {
                key: encode_compact(path, true),
                data: value.clone(),
            },
            Node::Extension { path, child } => StoredNode::Short {
                key: encode_compact(path, false),
                data: child_hash(child).to_vec(),
            },
            Node::Branch { children, value } => {
                let mut slots: [Option<NodeHash>; 16] = [None; 16];
                for (i, child) in children.iter().enumerate() {
                    slots[i] = child.as_ref().map(&mut child_hash);
                }
                StoredNode::Branch {
                    children: Box::new(slots),
                    value: value.clone(),
                }
            }
        }
    }
}
