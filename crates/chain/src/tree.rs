//! The in-memory tree of candidate branches.
//!
//! Nodes live in an arena and point at each other by index, which breaks
//! the parent/children ownership cycle; a side map resolves block hashes to
//! arena ids. The best tip is the node with the greatest cap-sum (total
//! target from the root), tie-broken by quality and then by the smaller
//! hash.

use alloy_primitives::U256;
use capcore_types::{BlockHeader, H256};
use std::collections::HashMap;

/// Minimum consecutive nodes kept in memory so contextual validation and
/// reorganization never have to fall back to the database mid-walk.
pub const MIN_MEMORY_NODES: u64 = 8000;

/// Arena index of a block node.
pub type NodeId = usize;

/// An in-memory block node.
#[derive(Debug, Clone)]
pub struct BlockNode {
    /// Block hash.
    pub hash: H256,
    /// Full header.
    pub header: BlockHeader,
    /// Parent node, absent for the tree root.
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Whether the node is on the current main chain.
    pub in_main_chain: bool,
    /// Cumulative target from the tree root.
    pub cap_sum: U256,
    /// Verified proof quality of this block.
    pub quality: U256,
}

impl BlockNode {
    /// Build a node from a header; cap-sum starts at the block's own
    /// target and is summed on attach.
    pub fn from_header(header: BlockHeader, quality: U256) -> Self {
        Self {
            hash: header.block_hash(),
            cap_sum: header.target,
            quality,
            header,
            parent: None,
            children: Vec::new(),
            in_main_chain: false,
        }
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

/// Errors from structural tree operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// `set_root` on a tree that already has one.
    #[error("root node already exists")]
    RootExists,
    /// `attach` with an unknown parent.
    #[error("attaching non-leaf block node")]
    AttachNonLeaf,
    /// `expand_root` with a node that is not the root's parent.
    #[error("expanding with an unrelated node")]
    ExpandOrphanRoot,
    /// `expand_root` with a node whose parent is in the tree.
    #[error("expanding with a child node")]
    ExpandChildRoot,
    /// Duplicate hash.
    #[error("node already in tree")]
    Duplicate,
}

/// The block tree.
#[derive(Default)]
pub struct BlockTree {
    arena: Vec<BlockNode>,
    index: HashMap<H256, NodeId>,
    root: Option<NodeId>,
    best: Option<NodeId>,
}

impl BlockTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// The node for `hash`, if present.
    pub fn get(&self, hash: &H256) -> Option<&BlockNode> {
        self.index.get(hash).map(|&id| &self.arena[id])
    }

    /// The arena id for `hash`, if present.
    pub fn id_of(&self, hash: &H256) -> Option<NodeId> {
        self.index.get(hash).copied()
    }

    /// The node at `id`.
    pub fn node(&self, id: NodeId) -> &BlockNode {
        &self.arena[id]
    }

    /// Mutable node access; tree-internal callers only.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut BlockNode {
        &mut self.arena[id]
    }

    /// Whether `hash` is in the tree.
    pub fn contains(&self, hash: &H256) -> bool {
        self.index.contains_key(hash)
    }

    /// The root node id.
    pub fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    /// The best-tip node id.
    pub fn best_id(&self) -> Option<NodeId> {
        self.best
    }

    /// The best-tip node.
    pub fn best(&self) -> Option<&BlockNode> {
        self.best.map(|id| &self.arena[id])
    }

    /// Point the best tip at `id`.
    pub fn set_best(&mut self, id: NodeId) {
        self.best = Some(id);
    }

    /// Initialize the tree with its root node.
    pub fn set_root(&mut self, node: BlockNode) -> Result<NodeId, TreeError> {
        if self.root.is_some() {
            return Err(TreeError::RootExists);
        }
        let id = self.push(node)?;
        self.root = Some(id);
        Ok(id)
    }

    /// Attach a leaf under its parent; cap-sum accumulates.
    pub fn attach(&mut self, mut node: BlockNode) -> Result<NodeId, TreeError> {
        let parent_id = *self
            .index
            .get(&node.header.previous)
            .ok_or(TreeError::AttachNonLeaf)?;
        node.cap_sum = self.arena[parent_id].cap_sum + node.cap_sum;
        node.parent = Some(parent_id);
        let id = self.push(node)?;
        self.arena[parent_id].children.push(id);
        Ok(id)
    }

    /// Prepend a new root above the current one (loading history
    /// backward); descendant cap-sums absorb the added target.
    pub fn expand_root(&mut self, node: BlockNode) -> Result<NodeId, TreeError> {
        if self.index.contains_key(&node.header.previous) {
            return Err(TreeError::ExpandChildRoot);
        }
        let old_root = match self.root {
            Some(root) if self.arena[root].header.previous == node.hash => root,
            _ => return Err(TreeError::ExpandOrphanRoot),
        };
        let added = node.cap_sum;
        let id = self.push(node)?;
        self.arena[old_root].parent = Some(id);
        self.arena[id].children.push(old_root);
        self.root = Some(id);
        self.add_cap_recursive(old_root, added);
        Ok(id)
    }

    fn add_cap_recursive(&mut self, id: NodeId, added: U256) {
        self.arena[id].cap_sum += added;
        let children = self.arena[id].children.clone();
        for child in children {
            self.add_cap_recursive(child, added);
        }
    }

    fn push(&mut self, node: BlockNode) -> Result<NodeId, TreeError> {
        if self.index.contains_key(&node.hash) {
            return Err(TreeError::Duplicate);
        }
        let id = self.arena.len();
        self.index.insert(node.hash, id);
        self.arena.push(node);
        Ok(id)
    }

    /// The ancestor of `id` at `height`, if it is in memory.
    pub fn ancestor(&self, id: NodeId, height: u64) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = &self.arena[current];
            if node.height() == height {
                return Some(current);
            }
            if node.height() < height {
                return None;
            }
            current = node.parent?;
        }
    }

    /// Walk up from `a` and `b` to their common ancestor.
    ///
    /// Returns `(ancestor, path_from_a, path_from_b)`; the paths exclude the
    /// ancestor and are ordered tip-first.
    pub fn common_ancestor(
        &self,
        a: NodeId,
        b: NodeId,
    ) -> Option<(NodeId, Vec<NodeId>, Vec<NodeId>)> {
        let mut path_a = Vec::new();
        let mut path_b = Vec::new();
        let mut x = a;
        let mut y = b;
        while self.arena[x].height() > self.arena[y].height() {
            path_a.push(x);
            x = self.arena[x].parent?;
        }
        while self.arena[y].height() > self.arena[x].height() {
            path_b.push(y);
            y = self.arena[y].parent?;
        }
        while x != y {
            path_a.push(x);
            path_b.push(y);
            x = self.arena[x].parent?;
            y = self.arena[y].parent?;
        }
        Some((x, path_a, path_b))
    }

    /// Whether candidate `id` beats the current best tip.
    ///
    /// Greater cap-sum wins; ties prefer greater quality, then the
    /// lexicographically smaller hash.
    pub fn beats_best(&self, id: NodeId) -> bool {
        let Some(best) = self.best else {
            return true;
        };
        let candidate = &self.arena[id];
        let incumbent = &self.arena[best];
        match candidate.cap_sum.cmp(&incumbent.cap_sum) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => match candidate.quality.cmp(&incumbent.quality) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => candidate.hash < incumbent.hash,
            },
        }
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_poc::{NativeProof, Proof};
    use capcore_types::{NodePubKey, NodeSignature};

    fn header(height: u64, previous: H256, target: u64, tag: u8) -> BlockHeader {
        let sk = capcore_crypto::PrivateKey::from_bytes(&[61u8; 32]).unwrap();
        BlockHeader {
            chain_id: H256::ZERO,
            version: 1,
            height,
            timestamp: height * 10 + tag as u64,
            previous,
            transaction_root: H256::sha256(&[tag]),
            witness_root: H256::ZERO,
            proposal_root: H256::ZERO,
            target: U256::from(target),
            challenge: H256::ZERO,
            pub_key: NodePubKey::Secp(sk.public_key()),
            proof: Proof::Native(NativeProof::new(0, 0, 24)),
            signature: NodeSignature::Secp(sk.sign(b"t")),
            ban_list: Vec::new(),
            binding_root: H256::ZERO,
        }
    }

    fn node(height: u64, previous: H256, target: u64, tag: u8) -> BlockNode {
        BlockNode::from_header(header(height, previous, target, tag), U256::from(1u64))
    }

    #[test]
    fn test_attach_accumulates_cap_sum() {
        let mut tree = BlockTree::new();
        let root = node(0, H256::ZERO, 10, 0);
        let root_hash = root.hash;
        let root_id = tree.set_root(root).unwrap();
        assert_eq!(tree.node(root_id).cap_sum, U256::from(10u64));

        let child = node(1, root_hash, 5, 1);
        let child_id = tree.attach(child).unwrap();
        assert_eq!(tree.node(child_id).cap_sum, U256::from(15u64));
        assert_eq!(tree.node(child_id).parent, Some(root_id));
        assert_eq!(tree.node(root_id).children, vec![child_id]);
    }

    #[test]
    fn test_attach_unknown_parent_fails() {
        let mut tree = BlockTree::new();
        tree.set_root(node(0, H256::ZERO, 10, 0)).unwrap();
        let stray = node(5, H256::sha256(b"unknown"), 1, 9);
        assert_eq!(tree.attach(stray), Err(TreeError::AttachNonLeaf));
    }

    #[test]
    fn test_expand_root_adjusts_descendants() {
        let mut tree = BlockTree::new();
        let older = node(0, H256::ZERO, 7, 0);
        let older_hash = older.hash;

        let mid = node(1, older_hash, 10, 1);
        let mid_hash = mid.hash;
        let mid_id = tree.set_root(mid).unwrap();
        let tip_id = tree.attach(node(2, mid_hash, 5, 2)).unwrap();
        assert_eq!(tree.node(tip_id).cap_sum, U256::from(15u64));

        let new_root = tree.expand_root(older).unwrap();
        assert_eq!(tree.root_id(), Some(new_root));
        assert_eq!(tree.node(mid_id).parent, Some(new_root));
        assert_eq!(tree.node(mid_id).cap_sum, U256::from(17u64));
        assert_eq!(tree.node(tip_id).cap_sum, U256::from(22u64));
    }

    #[test]
    fn test_common_ancestor() {
        let mut tree = BlockTree::new();
        let root = node(0, H256::ZERO, 1, 0);
        let root_hash = root.hash;
        let root_id = tree.set_root(root).unwrap();

        let a1 = node(1, root_hash, 1, 1);
        let a1_hash = a1.hash;
        let a1_id = tree.attach(a1).unwrap();
        let a2_id = tree.attach(node(2, a1_hash, 1, 2)).unwrap();

        let b1 = node(1, root_hash, 1, 3);
        let b1_hash = b1.hash;
        let b1_id = tree.attach(b1).unwrap();
        let b2 = node(2, b1_hash, 1, 4);
        let b2_hash = b2.hash;
        let b2_id = tree.attach(b2).unwrap();
        let b3_id = tree.attach(node(3, b2_hash, 1, 5)).unwrap();

        let (ancestor, path_a, path_b) = tree.common_ancestor(a2_id, b3_id).unwrap();
        assert_eq!(ancestor, root_id);
        assert_eq!(path_a, vec![a2_id, a1_id]);
        assert_eq!(path_b, vec![b3_id, b2_id, b1_id]);
    }

    #[test]
    fn test_best_tie_breaks() {
        let mut tree = BlockTree::new();
        let root = node(0, H256::ZERO, 1, 0);
        let root_hash = root.hash;
        tree.set_root(root).unwrap();

        // Equal cap-sum, differing quality.
        let mut a = node(1, root_hash, 5, 1);
        a.quality = U256::from(10u64);
        let mut b = node(1, root_hash, 5, 2);
        b.quality = U256::from(20u64);
        let a_id = tree.attach(a).unwrap();
        let b_id = tree.attach(b).unwrap();

        tree.set_best(a_id);
        assert!(tree.beats_best(b_id));
        tree.set_best(b_id);
        assert!(!tree.beats_best(a_id));
    }

    #[test]
    fn test_ancestor_walk() {
        let mut tree = BlockTree::new();
        let root = node(0, H256::ZERO, 1, 0);
        let root_hash = root.hash;
        let root_id = tree.set_root(root).unwrap();
        let c1 = node(1, root_hash, 1, 1);
        let c1_hash = c1.hash;
        let c1_id = tree.attach(c1).unwrap();
        let c2_id = tree.attach(node(2, c1_hash, 1, 2)).unwrap();

        assert_eq!(tree.ancestor(c2_id, 1), Some(c1_id));
        assert_eq!(tree.ancestor(c2_id, 0), Some(root_id));
        assert_eq!(tree.ancestor(c2_id, 3), None);
    }
}
