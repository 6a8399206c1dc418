//! The trie proper.

use std::sync::Arc;

use crate::iterator::NodeIterator;
use crate::nibbles::{bytes_to_nibbles, common_prefix_len};
use crate::node::{Handle, Node, StoredNode};
use crate::{NodeHash, Result, TrieError, TrieStore};

/// Root hash of the empty trie: SHA-256 of the empty input.
///
/// Deliberately distinct from the all-zero hash, which headers use as the
/// "no trie" sentinel.
pub const EMPTY_ROOT: NodeHash = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9,
    0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52,
    0xb8, 0x55,
];

/// A Merkle Patricia trie bound to a node store.
///
/// Mutations are copy-on-write along the touched path: committed subtrees
/// stay shared through the store, so [`Trie::copy`] snapshots are cheap and
/// validating a candidate block never disturbs its parent's trie.
pub struct Trie {
    root: Option<Handle>,
    store: Arc<dyn TrieStore>,
}

impl Trie {
    /// An empty trie over `store`.
    pub fn new(store: Arc<dyn TrieStore>) -> Self {
        Self { root: None, store }
    }

    /// Open the trie at `root`, verifying the root node is present.
    pub fn open(store: Arc<dyn TrieStore>, root: NodeHash) -> Result<Self> {
        if root == EMPTY_ROOT {
            return Ok(Self::new(store));
        }
        if store.get_node(&root)?.is_none() {
            return Err(TrieError::MissingNode(hex::encode(root)));
        }
        Ok(Self {
            root: Some(Handle::Hash(root)),
            store,
        })
    }

    /// Independent snapshot sharing all committed nodes.
    pub fn copy(&self) -> Self {
        Self {
            root: self.root.clone(),
            store: Arc::clone(&self.store),
        }
    }

    /// Fetch the value stored under `key`.
    pub fn try_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.root {
            None => Ok(None),
            Some(handle) => self.get_handle(handle, &bytes_to_nibbles(key)),
        }
    }

    /// Associate `key` with `value`; an empty value deletes the key.
    pub fn try_update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            self.try_delete(key)?;
            return Ok(());
        }
        let path = bytes_to_nibbles(key);
        let new_root = match self.root.take() {
            None => Node::Leaf {
                path,
                value: value.to_vec(),
            },
            Some(handle) => self.insert_at(handle, &path, value.to_vec())?,
        };
        self.root = Some(Handle::Node(new_root));
        Ok(())
    }

    /// Remove `key` if present.
    pub fn try_delete(&mut self, key: &[u8]) -> Result<()> {
        let path = bytes_to_nibbles(key);
        if let Some(handle) = self.root.take() {
            self.root = match self.delete_at(handle, &path)? {
                Deletion::NotFound(handle) => Some(handle),
                Deletion::Replaced(node) => Some(Handle::Node(node)),
                Deletion::Removed => None,
            };
        }
        Ok(())
    }

    /// Root hash of the current, possibly uncommitted trie.
    pub fn hash(&self) -> NodeHash {
        match &self.root {
            None => EMPTY_ROOT,
            Some(handle) => handle_hash(handle),
        }
    }

    /// Persist every dirty node in one batched write; returns the new root.
    pub fn commit(&mut self) -> Result<NodeHash> {
        let root = match self.root.as_mut() {
            None => return Ok(EMPTY_ROOT),
            Some(handle) => {
                let mut batch = Vec::new();
                let hash = commit_handle(handle, &mut batch);
                if !batch.is_empty() {
                    self.store.put_batch(batch)?;
                }
                hash
            }
        };
        Ok(root)
    }

    /// Pre-order traversal of all nodes, starting at the first entry whose
    /// path is not below `start_key`.
    pub fn node_iterator(&self, start_key: &[u8]) -> NodeIterator<'_> {
        NodeIterator::new(self, bytes_to_nibbles(start_key))
    }

    pub(crate) fn root_handle(&self) -> Option<Handle> {
        self.root.clone()
    }

    pub(crate) fn load(&self, hash: &NodeHash) -> Result<Node> {
        let bytes = self
            .store
            .get_node(hash)?
            .ok_or_else(|| TrieError::MissingNode(hex::encode(hash)))?;
        StoredNode::decode(&bytes)?.into_node()
    }

    pub(crate) fn resolve(&self, handle: Handle) -> Result<Node> {
        match handle {
            Handle::Node(node) => Ok(node),
            Handle::Hash(hash) => self.load(&hash),
        }
    }

    fn get_handle(&self, handle: &Handle, path: &[u8]) -> Result<Option<Vec<u8>>> {
        match handle {
            Handle::Node(node) => self.get_in(node, path),
            Handle::Hash(hash) => {
                let node = self.load(hash)?;
                self.get_in(&node, path)
            }
        }
    }

    fn get_in(&self, node: &Node, path: &[u8]) -> Result<Option<Vec<u8>>> {
        match node {
            Node::Leaf { path: lp, value } => Ok((lp.as_slice() == path).then(|| value.clone())),
            Node::Extension { path: ep, child } => {
                if path.len() >= ep.len() && &path[..ep.len()] == ep.as_slice() {
                    self.get_handle(child, &path[ep.len()..])
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    return Ok(value.clone());
                }
                match &children[path[0] as usize] {
                    Some(child) => self.get_handle(child, &path[1..]),
                    None => Ok(None),
                }
            }
        }
    }

    fn insert_at(&self, handle: Handle, path: &[u8], value: Vec<u8>) -> Result<Node> {
        let node = self.resolve(handle)?;
        match node {
            Node::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path.as_slice() == path {
                    return Ok(Node::Leaf {
                        path: leaf_path,
                        value,
                    });
                }
                let common = common_prefix_len(&leaf_path, path);
                let branch = self.two_entry_branch(
                    &leaf_path[common..],
                    leaf_value,
                    &path[common..],
                    value,
                )?;
                Ok(wrap_extension(&path[..common], branch))
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                let common = common_prefix_len(&ext_path, path);
                if common == ext_path.len() {
                    let new_child = self.insert_at(*child, &path[common..], value)?;
                    return Ok(Node::Extension {
                        path: ext_path,
                        child: Box::new(Handle::Node(new_child)),
                    });
                }
                // Split the extension at the divergence point.
                let mut children: [Option<Handle>; 16] = Default::default();
                let ext_nibble = ext_path[common] as usize;
                let remainder = &ext_path[common + 1..];
                children[ext_nibble] = Some(if remainder.is_empty() {
                    *child
                } else {
                    Handle::Node(Node::Extension {
                        path: remainder.to_vec(),
                        child,
                    })
                });
                let mut branch_value = None;
                let new_path = &path[common..];
                if new_path.is_empty() {
                    branch_value = Some(value);
                } else {
                    children[new_path[0] as usize] = Some(Handle::Node(Node::Leaf {
                        path: new_path[1..].to_vec(),
                        value,
                    }));
                }
                let branch = Node::Branch {
                    children: Box::new(children),
                    value: branch_value,
                };
                Ok(wrap_extension(&path[..common], branch))
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return Ok(Node::Branch {
                        children,
                        value: Some(value),
                    });
                }
                let nibble = path[0] as usize;
                let new_child = match children[nibble].take() {
                    Some(child) => self.insert_at(child, &path[1..], value)?,
                    None => Node::Leaf {
                        path: path[1..].to_vec(),
                        value,
                    },
                };
                children[nibble] = Some(Handle::Node(new_child));
                Ok(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    /// Branch holding two diverging entries (either may terminate at the
    /// branch itself).
    fn two_entry_branch(
        &self,
        a_path: &[u8],
        a_value: Vec<u8>,
        b_path: &[u8],
        b_value: Vec<u8>,
    ) -> Result<Node> {
        let mut children: [Option<Handle>; 16] = Default::default();
        let mut value = None;
        for (path, val) in [(a_path, a_value), (b_path, b_value)] {
            if path.is_empty() {
                value = Some(val);
            } else {
                children[path[0] as usize] = Some(Handle::Node(Node::Leaf {
                    path: path[1..].to_vec(),
                    value: val,
                }));
            }
        }
        Ok(Node::Branch {
            children: Box::new(children),
            value,
        })
    }

    fn delete_at(&self, handle: Handle, path: &[u8]) -> Result<Deletion> {
        let node = self.resolve(handle)?;
        match node {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path.as_slice() == path {
                    Ok(Deletion::Removed)
                } else {
                    Ok(Deletion::NotFound(Handle::Node(Node::Leaf {
                        path: leaf_path,
                        value,
                    })))
                }
            }
            Node::Extension {
                path: ext_path,
                child,
            } => {
                if path.len() < ext_path.len() || &path[..ext_path.len()] != ext_path.as_slice() {
                    return Ok(Deletion::NotFound(Handle::Node(Node::Extension {
                        path: ext_path,
                        child,
                    })));
                }
                match self.delete_at(*child, &path[ext_path.len()..])? {
                    Deletion::NotFound(child) => Ok(Deletion::NotFound(Handle::Node(
                        Node::Extension {
                            path: ext_path,
                            child: Box::new(child),
                        },
                    ))),
                    Deletion::Removed => Ok(Deletion::Removed),
                    Deletion::Replaced(new_child) => {
                        Ok(Deletion::Replaced(self.merge_extension(ext_path, new_child)))
                    }
                }
            }
            Node::Branch {
                mut children,
                value,
            } => {
                if path.is_empty() {
                    if value.is_none() {
                        return Ok(Deletion::NotFound(Handle::Node(Node::Branch {
                            children,
                            value,
                        })));
                    }
                    return self.collapse_branch(children, None).map(Deletion::Replaced);
                }
                let nibble = path[0] as usize;
                let child = match children[nibble].take() {
                    Some(child) => child,
                    None => {
                        return Ok(Deletion::NotFound(Handle::Node(Node::Branch {
                            children,
                            value,
                        })))
                    }
                };
                match self.delete_at(child, &path[1..])? {
                    Deletion::NotFound(child) => {
                        children[nibble] = Some(child);
                        Ok(Deletion::NotFound(Handle::Node(Node::Branch {
                            children,
                            value,
                        })))
                    }
                    Deletion::Replaced(new_child) => {
                        children[nibble] = Some(Handle::Node(new_child));
                        Ok(Deletion::Replaced(Node::Branch { children, value }))
                    }
                    Deletion::Removed => {
                        self.collapse_branch(children, value).map(Deletion::Replaced)
                    }
                }
            }
        }
    }

    /// Restore the canonical shape of a branch after a removal.
    ///
    /// A branch with a lone child collapses into that child (with the
    /// nibble folded into its path); a branch with only a value becomes a
    /// leaf. Keeping the shape canonical makes the root a pure function of
    /// the stored map.
    fn collapse_branch(
        &self,
        mut children: Box<[Option<Handle>; 16]>,
        value: Option<Vec<u8>>,
    ) -> Result<Node> {
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
            .collect();
        if occupied.is_empty() {
            if let Some(value) = value {
                return Ok(Node::Leaf {
                    path: Vec::new(),
                    value,
                });
            }
        } else if occupied.len() == 1 && value.is_none() {
            let nibble = occupied[0];
            if let Some(child) = children[nibble].take() {
                let child_node = self.resolve(child)?;
                return Ok(self.merge_extension(vec![nibble as u8], child_node));
            }
        }
        Ok(Node::Branch { children, value })
    }

    /// Fold `prefix` onto a node, merging consecutive short nodes.
    fn merge_extension(&self, prefix: Vec<u8>, node: Node) -> Node {
        match node {
            Node::Leaf { path, value } => {
                let mut merged = prefix;
                merged.extend_from_slice(&path);
                Node::Leaf {
                    path: merged,
                    value,
                }
            }
            Node::Extension { path, child } => {
                let mut merged = prefix;
                merged.extend_from_slice(&path);
                Node::Extension {
                    path: merged,
                    child,
                }
            }
            branch @ Node::Branch { .. } => {
                if prefix.is_empty() {
                    branch
                } else {
                    Node::Extension {
                        path: prefix,
                        child: Box::new(Handle::Node(branch)),
                    }
                }
            }
        }
    }
}

enum Deletion {
    /// Key absent; the (possibly resolved) subtree is handed back.
    NotFound(Handle),
    /// Subtree rewritten.
    Replaced(Node),
    /// Subtree is now empty.
    Removed,
}

fn wrap_extension(prefix: &[u8], node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension {
            path: prefix.to_vec(),
            child: Box::new(Handle::Node(node)),
        }
    }
}

pub(crate) fn handle_hash(handle: &Handle) -> NodeHash {
    match handle {
        Handle::Hash(hash) => *hash,
        Handle::Node(node) => node.to_stored(handle_hash).hash(),
    }
}

fn commit_handle(handle: &mut Handle, batch: &mut Vec<(NodeHash, Vec<u8>)>) -> NodeHash {
    match handle {
        Handle::Hash(hash) => *hash,
        Handle::Node(node) => {
            match node {
                Node::Extension { child, .. } => {
                    commit_handle(child, batch);
                }
                Node::Branch { children, .. } => {
                    for child in children.iter_mut().flatten() {
                        commit_handle(child, batch);
                    }
                }
                Node::Leaf { .. } => {}
            }
            let stored = node.to_stored(handle_hash);
            let hash = stored.hash();
            batch.push((hash, stored.encode()));
            *handle = Handle::Hash(hash);
            hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTrieStore;

    fn new_trie() -> Trie {
        Trie::new(Arc::new(MemoryTrieStore::new()))
    }

    #[test]
    fn test_empty_root() {
        assert_eq!(new_trie().hash(), EMPTY_ROOT);
    }

    #[test]
    fn test_get_update_delete() {
        let mut trie = new_trie();
        trie.try_update(b"alpha", b"1").unwrap();
        trie.try_update(b"alps", b"2").unwrap();
        trie.try_update(b"beta", b"3").unwrap();

        assert_eq!(trie.try_get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.try_get(b"alps").unwrap(), Some(b"2".to_vec()));
        assert_eq!(trie.try_get(b"beta").unwrap(), Some(b"3".to_vec()));
        assert_eq!(trie.try_get(b"missing").unwrap(), None);

        trie.try_delete(b"alps").unwrap();
        assert_eq!(trie.try_get(b"alps").unwrap(), None);
        assert_eq!(trie.try_get(b"alpha").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_empty_value_deletes() {
        let mut trie = new_trie();
        trie.try_update(b"key", b"value").unwrap();
        trie.try_update(b"key", b"").unwrap();
        assert_eq!(trie.try_get(b"key").unwrap(), None);
        assert_eq!(trie.hash(), EMPTY_ROOT);
    }

    #[test]
    fn test_root_is_function_of_content() {
        // Insertion order must not matter.
        let mut a = new_trie();
        a.try_update(b"k1", b"v1").unwrap();
        a.try_update(b"k2", b"v2").unwrap();
        a.try_update(b"k3", b"v3").unwrap();

        let mut b = new_trie();
        b.try_update(b"k3", b"v3").unwrap();
        b.try_update(b"k1", b"v1").unwrap();
        b.try_update(b"k2", b"v2").unwrap();

        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_delete_restores_canonical_shape() {
        let mut a = new_trie();
        a.try_update(b"k1", b"v1").unwrap();

        let mut b = new_trie();
        b.try_update(b"k1", b"v1").unwrap();
        b.try_update(b"k2", b"v2").unwrap();
        b.try_update(b"other", b"x").unwrap();
        b.try_delete(b"k2").unwrap();
        b.try_delete(b"other").unwrap();

        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_commit_and_reopen() {
        let store = Arc::new(MemoryTrieStore::new());
        let mut trie = Trie::new(Arc::clone(&store) as Arc<dyn TrieStore>);
        trie.try_update(b"persistent", b"yes").unwrap();
        trie.try_update(b"networkbinding", b"\x01\x00").unwrap();
        let root = trie.commit().unwrap();
        assert_eq!(root, trie.hash());

        let reopened = Trie::open(store, root).unwrap();
        assert_eq!(
            reopened.try_get(b"persistent").unwrap(),
            Some(b"yes".to_vec())
        );
        assert_eq!(
            reopened.try_get(b"networkbinding").unwrap(),
            Some(b"\x01\x00".to_vec())
        );
    }

    #[test]
    fn test_open_missing_root_fails() {
        let store: Arc<dyn TrieStore> = Arc::new(MemoryTrieStore::new());
        assert!(Trie::open(store, [9u8; 32]).is_err());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut trie = new_trie();
        trie.try_update(b"shared", b"1").unwrap();
        let mut snapshot = trie.copy();
        snapshot.try_update(b"shared", b"2").unwrap();
        snapshot.try_update(b"extra", b"3").unwrap();

        assert_eq!(trie.try_get(b"shared").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trie.try_get(b"extra").unwrap(), None);
        assert_ne!(trie.hash(), snapshot.hash());
    }

    #[test]
    fn test_copy_after_commit_shares_nodes() {
        let store = Arc::new(MemoryTrieStore::new());
        let mut trie = Trie::new(Arc::clone(&store) as Arc<dyn TrieStore>);
        for i in 0u32..64 {
            trie.try_update(&i.to_be_bytes(), &[i as u8 + 1]).unwrap();
        }
        let root = trie.commit().unwrap();

        let mut snapshot = trie.copy();
        snapshot.try_update(b"one more", b"x").unwrap();
        // The original trie is unaffected by the snapshot mutation.
        assert_eq!(trie.hash(), root);
        assert_ne!(snapshot.hash(), root);
    }

    #[test]
    fn test_hash_stable_across_commit() {
        let mut trie = new_trie();
        trie.try_update(b"a", b"1").unwrap();
        trie.try_update(b"ab", b"2").unwrap();
        let before = trie.hash();
        let committed = trie.commit().unwrap();
        assert_eq!(before, committed);
        assert_eq!(trie.hash(), committed);
    }

    #[test]
    fn test_key_families_do_not_collide() {
        // The three key families of the binding state.
        let mut trie = new_trie();
        let binding_key = [0x11u8; 22];
        let mut pool_key = b"p_".to_vec();
        pool_key.extend_from_slice(&[0x22u8; 48]);

        trie.try_update(&binding_key, b"bound").unwrap();
        trie.try_update(&pool_key, b"pool").unwrap();
        trie.try_update(b"networkbinding", b"total").unwrap();

        assert_eq!(trie.try_get(&binding_key).unwrap(), Some(b"bound".to_vec()));
        assert_eq!(trie.try_get(&pool_key).unwrap(), Some(b"pool".to_vec()));
        assert_eq!(
            trie.try_get(b"networkbinding").unwrap(),
            Some(b"total".to_vec())
        );
    }

    #[test]
    fn test_randomized_against_model() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xcafe);
        let mut trie = new_trie();
        let mut model = std::collections::BTreeMap::new();

        for _ in 0..2_000 {
            let key = [rng.gen_range(0u8..16), rng.gen_range(0u8..8)];
            if rng.gen_bool(0.3) {
                trie.try_delete(&key).unwrap();
                model.remove(&key);
            } else {
                let value = vec![rng.gen::<u8>().max(1)];
                trie.try_update(&key, &value).unwrap();
                model.insert(key, value);
            }
        }
        for (key, value) in &model {
            assert_eq!(trie.try_get(key).unwrap().as_ref(), Some(value));
        }

        // Rebuild from the final model; roots must agree.
        let mut rebuilt = new_trie();
        for (key, value) in &model {
            rebuilt.try_update(key, value).unwrap();
        }
        assert_eq!(trie.hash(), rebuilt.hash());
    }
}
