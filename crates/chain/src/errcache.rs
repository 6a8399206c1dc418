//! Per-hash rejection cache.

use capcore_types::H256;
use std::collections::{HashMap, VecDeque};

use crate::error::BlockError;

/// LRU cache of non-transient rejections, so a peer re-sending the same bad
/// block is rejected without re-validating.
pub struct ErrCache {
    capacity: usize,
    map: HashMap<H256, BlockError>,
    order: VecDeque<H256>,
}

impl ErrCache {
    /// A cache holding up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// The cached rejection for `hash`, if any.
    pub fn get(&self, hash: &H256) -> Option<&BlockError> {
        self.map.get(hash)
    }

    /// Cache a rejection; transient errors are never stored.
    pub fn insert(&mut self, hash: H256, error: BlockError) {
        if !error.is_cacheable() {
            return;
        }
        if self.map.insert(hash, error).is_none() {
            self.order.push_back(hash);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    /// Number of cached rejections.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SanityError;

    #[test]
    fn test_insert_and_get() {
        let mut cache = ErrCache::new(4);
        let hash = H256::sha256(b"bad block");
        cache.insert(hash, BlockError::Sanity(SanityError::DuplicateTx));
        assert_eq!(
            cache.get(&hash),
            Some(&BlockError::Sanity(SanityError::DuplicateTx))
        );
    }

    #[test]
    fn test_transient_never_cached() {
        let mut cache = ErrCache::new(4);
        let hash = H256::sha256(b"io failure");
        cache.insert(hash, BlockError::Transient("db".into()));
        assert!(cache.get(&hash).is_none());
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut cache = ErrCache::new(2);
        let hashes: Vec<H256> = (0u8..3).map(|i| H256::sha256(&[i])).collect();
        for hash in &hashes {
            cache.insert(*hash, BlockError::Sanity(SanityError::BlockTooBig));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&hashes[0]).is_none());
        assert!(cache.get(&hashes[2]).is_some());
    }
}
