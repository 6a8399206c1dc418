//! Pre-order node traversal.

use crate::nibbles::decode_compact;
use crate::node::{Handle, Node, StoredNode};
use crate::trie::handle_hash;
use crate::{NodeHash, Result, Trie};

/// One traversal step: the node's nibble path from the root, its content
/// hash, and its stored shape.
#[derive(Debug, Clone)]
pub struct IterEntry {
    /// Nibble path from the root to this node.
    pub path: Vec<u8>,
    /// Content hash of the node (computed on the fly when uncommitted).
    pub hash: NodeHash,
    /// The node in stored form.
    pub node: StoredNode,
}

impl IterEntry {
    /// Whether this entry is a leaf, and its value.
    pub fn leaf_value(&self) -> Option<&[u8]> {
        match &self.node {
            StoredNode::Short { key, data } => {
                let (_, is_leaf) = decode_compact(key);
                is_leaf.then_some(data.as_slice())
            }
            StoredNode::Branch { value, .. } => value.as_deref(),
        }
    }

    /// The full key bytes for a leaf entry with an even nibble path.
    pub fn leaf_key(&self) -> Option<Vec<u8>> {
        let mut nibbles = self.path.clone();
        if let StoredNode::Short { key, .. } = &self.node {
            let (suffix, is_leaf) = decode_compact(key);
            if !is_leaf {
                return None;
            }
            nibbles.extend_from_slice(&suffix);
        } else if self.leaf_value().is_none() {
            return None;
        }
        if nibbles.len() % 2 != 0 {
            return None;
        }
        Some(
            nibbles
                .chunks(2)
                .map(|pair| pair[0] << 4 | pair[1])
                .collect(),
        )
    }
}

/// Pre-order iterator over trie nodes; children visit in nibble order, so
/// leaves stream in nibble-sorted key order.
pub struct NodeIterator<'a> {
    trie: &'a Trie,
    // Work stack of (path-from-root, handle); popped depth-first.
    stack: Vec<(Vec<u8>, Handle)>,
    start: Vec<u8>,
    failed: bool,
}

impl<'a> NodeIterator<'a> {
    pub(crate) fn new(trie: &'a Trie, start: Vec<u8>) -> Self {
        let mut stack = Vec::new();
        let root = trie.root_handle();
        if let Some(handle) = root {
            stack.push((Vec::new(), handle));
        }
        Self {
            trie,
            stack,
            start,
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Option<IterEntry>> {
        while let Some((path, handle)) = self.stack.pop() {
            let hash = handle_hash(&handle);
            let node = self.trie.resolve(handle)?;

            // Push children in reverse so nibble 0 pops first.
            match &node {
                Node::Leaf { .. } => {}
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    let mut child_path = path.clone();
                    child_path.extend_from_slice(ext_path);
                    self.stack.push((child_path, (**child).clone()));
                }
                Node::Branch { children, .. } => {
                    for (nibble, child) in children.iter().enumerate().rev() {
                        if let Some(child) = child {
                            let mut child_path = path.clone();
                            child_path.push(nibble as u8);
                            self.stack.push((child_path, child.clone()));
                        }
                    }
                }
            }

            // Entries strictly below the start key are skipped, but their
            // descendants may still qualify, so pruning happens per entry.
            if !self.below_start(&path, &node) {
                let stored = node.to_stored(handle_hash);
                return Ok(Some(IterEntry {
                    path,
                    hash,
                    node: stored,
                }));
            }
        }
        Ok(None)
    }

    fn below_start(&self, path: &[u8], node: &Node) -> bool {
        if self.start.is_empty() {
            return false;
        }
        let mut full = path.to_vec();
        match node {
            Node::Leaf { path: suffix, .. } | Node::Extension { path: suffix, .. } => {
                full.extend_from_slice(suffix);
            }
            Node::Branch { .. } => {}
        }
        // A prefix of the start key may still lead to qualifying entries.
        if self.start.starts_with(&full) {
            return false;
        }
        full.as_slice() < self.start.as_slice()
    }
}

impl Iterator for NodeIterator<'_> {
    type Item = Result<IterEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
