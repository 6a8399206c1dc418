//! The key-value seam.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

use crate::{Result, StorageError};

/// One operation of an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key.
    Delete(Vec<u8>),
}

/// A flat, ordered key-value store.
///
/// `apply_batch` is atomic; the chain relies on it to keep the database at
/// a block boundary across crashes.
pub trait KvStore: Send + Sync {
    /// Fetch a value.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite a value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key; absent keys are not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply a batch of operations atomically.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut map = self.map.write();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Disk-backed store over sled.
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    /// Open (or create) a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(Self { db })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

impl KvStore for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map(|opt| opt.map(|ivec| ivec.to_vec()))
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db
            .remove(key)
            .map(|_| ())
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => batch.insert(key, value),
                BatchOp::Delete(key) => batch.remove(key),
            }
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(kv: &dyn KvStore) {
        kv.put(b"a1", b"1").unwrap();
        kv.put(b"a2", b"2").unwrap();
        kv.put(b"b1", b"3").unwrap();
        assert_eq!(kv.get(b"a1").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"zz").unwrap(), None);

        let scanned = kv.scan_prefix(b"a").unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0].0, b"a1".to_vec());

        kv.apply_batch(vec![
            BatchOp::Put(b"a3".to_vec(), b"4".to_vec()),
            BatchOp::Delete(b"a1".to_vec()),
        ])
        .unwrap();
        assert_eq!(kv.get(b"a1").unwrap(), None);
        assert_eq!(kv.get(b"a3").unwrap(), Some(b"4".to_vec()));

        kv.delete(b"b1").unwrap();
        assert_eq!(kv.get(b"b1").unwrap(), None);
    }

    #[test]
    fn test_memory_kv() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn test_sled_kv() {
        let dir = tempfile::tempdir().unwrap();
        let kv = SledKv::open(dir.path().join("db")).unwrap();
        exercise(&kv);
        kv.flush().unwrap();
    }
}
