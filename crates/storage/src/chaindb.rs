//! Typed chain database over a [`KvStore`].
//!
//! Key prefixes are part of the on-disk format and must stay stable:
//!
//! | Prefix | Content |
//! |---|---|
//! | `BLK` | block hash -> (height, block bytes) |
//! | `HGT` | height (u64 BE) -> block hash |
//! | `TXL` | tx hash -> location + spent bits |
//! | `BANPUB` | SHA-256(pubkey) -> fault record + ban height |
//! | `BANHGT` | height (u64 BE) -> pubkey digests banned there |
//! | `PUNISH` | pubkey bytes -> pending fault record |
//! | `MBP` | SHA-256(pubkey) + height (u64 BE) -> {} |
//! | `STL` | script hash + height (u64 BE) + tx index -> tx size |
//! | `HTS` | height (u64 BE) + script hash + tx index -> {} |
//! | `RNK` | height (u64 BE) -> staking ranks |
//! | `TIP` | -> (hash, height) of the best main-chain block |

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use capcore_types::{Block, FaultPubKey, NodePubKey, H256};

use crate::{BatchOp, KvStore, Result, StorageError};

const PREFIX_BLOCK: &[u8] = b"BLK";
const PREFIX_HEIGHT: &[u8] = b"HGT";
const PREFIX_TX_LOC: &[u8] = b"TXL";
const PREFIX_BAN_PUB: &[u8] = b"BANPUB";
const PREFIX_BAN_HEIGHT: &[u8] = b"BANHGT";
const PREFIX_PUNISH: &[u8] = b"PUNISH";
const PREFIX_MINED: &[u8] = b"MBP";
const PREFIX_SCRIPT_TX: &[u8] = b"STL";
const PREFIX_HEIGHT_SCRIPT: &[u8] = b"HTS";
const PREFIX_RANKS: &[u8] = b"RNK";
const KEY_TIP: &[u8] = b"TIP";

/// Where a transaction sits in the main chain, plus its spent bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    /// Height of the containing block.
    pub height: u64,
    /// Hash of the containing block.
    pub block_hash: H256,
    /// Index within the block.
    pub tx_index: u32,
    /// One flag per output; set when spent by a later main-chain block.
    pub spent: Vec<bool>,
}

impl TxLocation {
    /// Whether every output is spent.
    pub fn fully_spent(&self) -> bool {
        self.spent.iter().all(|&s| s)
    }
}

/// A persisted ban entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    /// Height of the block that published the punishment.
    pub height: u64,
    /// The full fault record.
    pub fault: FaultPubKey,
}

/// A staking-rank row used by coinbase validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingRank {
    /// Payout script hash.
    pub script_hash: [u8; 32],
    /// Staked value in grains.
    pub value: u64,
    /// Rank weight.
    pub weight: u128,
}

/// A batch of chain mutations applied atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }
}

/// Typed access to the chain's persistent state.
#[derive(Clone)]
pub struct ChainDb {
    kv: Arc<dyn KvStore>,
}

impl ChainDb {
    /// Wrap a key-value store.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The underlying key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Apply a batch atomically.
    pub fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.ops.is_empty() {
            return Ok(());
        }
        self.kv.apply_batch(batch.ops)
    }

    // ---- blocks -----------------------------------------------------------

    /// Stage a main-chain block write, including its tip update.
    pub fn stage_block(&self, batch: &mut WriteBatch, block: &Block) -> Result<()> {
        let hash = block.block_hash();
        let height = block.height();
        let bytes = block
            .encode()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let record = bincode::serialize(&(height, bytes))
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        batch.put(concat(PREFIX_BLOCK, hash.as_bytes()), record);
        batch.put(
            concat(PREFIX_HEIGHT, &height.to_be_bytes()),
            hash.as_bytes().to_vec(),
        );
        batch.put(
            KEY_TIP.to_vec(),
            bincode::serialize(&(hash, height))
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        );
        Ok(())
    }

    /// Stage removal of a main-chain block (reorg detach); the tip moves to
    /// its parent.
    pub fn stage_block_removal(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        new_tip: (H256, u64),
    ) -> Result<()> {
        batch.delete(concat(PREFIX_BLOCK, block.block_hash().as_bytes()));
        batch.delete(concat(PREFIX_HEIGHT, &block.height().to_be_bytes()));
        batch.put(
            KEY_TIP.to_vec(),
            bincode::serialize(&new_tip).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        );
        Ok(())
    }

    /// Fetch a block by hash.
    pub fn fetch_block(&self, hash: &H256) -> Result<Option<Block>> {
        match self.kv.get(&concat(PREFIX_BLOCK, hash.as_bytes()))? {
            None => Ok(None),
            Some(bytes) => {
                let (_, block_bytes): (u64, Vec<u8>) = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Block::decode(&block_bytes)
                    .map(Some)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))
            }
        }
    }

    /// Height of a main-chain block, if stored.
    pub fn fetch_block_height(&self, hash: &H256) -> Result<Option<u64>> {
        match self.kv.get(&concat(PREFIX_BLOCK, hash.as_bytes()))? {
            None => Ok(None),
            Some(bytes) => {
                let (height, _): (u64, Vec<u8>) = bincode::deserialize(&bytes)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Ok(Some(height))
            }
        }
    }

    /// Hash of the main-chain block at `height`.
    pub fn fetch_hash_by_height(&self, height: u64) -> Result<Option<H256>> {
        match self.kv.get(&concat(PREFIX_HEIGHT, &height.to_be_bytes()))? {
            None => Ok(None),
            Some(bytes) => H256::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
        }
    }

    /// Fetch a block by height.
    pub fn fetch_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.fetch_hash_by_height(height)? {
            None => Ok(None),
            Some(hash) => self.fetch_block(&hash),
        }
    }

    /// Whether a block hash exists in the main chain store.
    pub fn block_exists(&self, hash: &H256) -> Result<bool> {
        Ok(self
            .kv
            .get(&concat(PREFIX_BLOCK, hash.as_bytes()))?
            .is_some())
    }

    /// The stored best tip, if the database is initialized.
    pub fn fetch_tip(&self) -> Result<Option<(H256, u64)>> {
        match self.kv.get(KEY_TIP)? {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
        }
    }

    // ---- transaction index ------------------------------------------------

    /// Fetch a transaction's location and spent bits.
    pub fn fetch_tx_location(&self, tx_hash: &H256) -> Result<Option<TxLocation>> {
        match self.kv.get(&concat(PREFIX_TX_LOC, tx_hash.as_bytes()))? {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
        }
    }

    /// Stage a transaction location write (insert or spent-bit update).
    pub fn stage_tx_location(
        &self,
        batch: &mut WriteBatch,
        tx_hash: &H256,
        location: &TxLocation,
    ) -> Result<()> {
        batch.put(
            concat(PREFIX_TX_LOC, tx_hash.as_bytes()),
            bincode::serialize(location).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        );
        Ok(())
    }

    /// Stage removal of a transaction location (reorg detach).
    pub fn stage_tx_location_removal(&self, batch: &mut WriteBatch, tx_hash: &H256) {
        batch.delete(concat(PREFIX_TX_LOC, tx_hash.as_bytes()));
    }

    // ---- ban list ---------------------------------------------------------

    /// Stage a ban published at `height`.
    pub fn stage_ban(&self, batch: &mut WriteBatch, record: &BanRecord) -> Result<()> {
        let pk_digest = pubkey_digest(&record.fault.pub_key);
        batch.put(
            concat(PREFIX_BAN_PUB, &pk_digest),
            bincode::serialize(record).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        );
        let height_key = concat(PREFIX_BAN_HEIGHT, &record.height.to_be_bytes());
        let mut digests = self.ban_digests_at(record.height)?;
        if !digests.contains(&pk_digest) {
            digests.push(pk_digest);
        }
        batch.put(
            height_key,
            bincode::serialize(&digests).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        );
        Ok(())
    }

    /// Stage removal of every ban published at `height` (reorg detach).
    pub fn stage_ban_removal_at(&self, batch: &mut WriteBatch, height: u64) -> Result<()> {
        for digest in self.ban_digests_at(height)? {
            batch.delete(concat(PREFIX_BAN_PUB, &digest));
        }
        batch.delete(concat(PREFIX_BAN_HEIGHT, &height.to_be_bytes()));
        Ok(())
    }

    /// The ban entry for a public key, if any.
    pub fn fetch_ban(&self, pubkey: &NodePubKey) -> Result<Option<BanRecord>> {
        match self
            .kv
            .get(&concat(PREFIX_BAN_PUB, &pubkey_digest(pubkey)))?
        {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
        }
    }

    /// All fault records banned at `height`.
    pub fn fetch_bans_at(&self, height: u64) -> Result<Vec<BanRecord>> {
        let mut records = Vec::new();
        for digest in self.ban_digests_at(height)? {
            if let Some(bytes) = self.kv.get(&concat(PREFIX_BAN_PUB, &digest))? {
                records.push(
                    bincode::deserialize(&bytes)
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                );
            }
        }
        Ok(records)
    }

    fn ban_digests_at(&self, height: u64) -> Result<Vec<[u8; 32]>> {
        match self
            .kv
            .get(&concat(PREFIX_BAN_HEIGHT, &height.to_be_bytes()))?
        {
            None => Ok(Vec::new()),
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
        }
    }

    // ---- pending punishments ---------------------------------------------

    /// Persist a pending punishment record.
    pub fn insert_punishment(&self, fault: &FaultPubKey) -> Result<()> {
        let bytes = fault
            .encode()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.kv
            .put(&concat(PREFIX_PUNISH, &fault.pub_key.serialize()), &bytes)
    }

    /// Stage removal of pending punishments now published on chain.
    pub fn stage_punishment_removal(&self, batch: &mut WriteBatch, pubkey: &NodePubKey) {
        batch.delete(concat(PREFIX_PUNISH, &pubkey.serialize()));
    }

    /// All pending punishment records.
    pub fn fetch_punishments(&self) -> Result<Vec<FaultPubKey>> {
        self.kv
            .scan_prefix(PREFIX_PUNISH)?
            .into_iter()
            .map(|(_, bytes)| {
                FaultPubKey::decode(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
            })
            .collect()
    }

    // ---- mined-block index ------------------------------------------------

    /// Stage a (builder, height) mined-block record.
    pub fn stage_mined_block(&self, batch: &mut WriteBatch, pubkey: &NodePubKey, height: u64) {
        let mut key = concat(PREFIX_MINED, &pubkey_digest(pubkey));
        key.extend_from_slice(&height.to_be_bytes());
        batch.put(key, Vec::new());
    }

    /// Stage removal of a mined-block record (reorg detach).
    pub fn stage_mined_block_removal(
        &self,
        batch: &mut WriteBatch,
        pubkey: &NodePubKey,
        height: u64,
    ) {
        let mut key = concat(PREFIX_MINED, &pubkey_digest(pubkey));
        key.extend_from_slice(&height.to_be_bytes());
        batch.delete(key);
    }

    /// Heights of main-chain blocks built by `pubkey`.
    pub fn fetch_mined_blocks(&self, pubkey: &NodePubKey) -> Result<Vec<u64>> {
        let prefix = concat(PREFIX_MINED, &pubkey_digest(pubkey));
        self.kv
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| {
                key[prefix.len()..]
                    .try_into()
                    .map(u64::from_be_bytes)
                    .map_err(|_| StorageError::Corrupt("mined-block key".into()))
            })
            .collect()
    }

    // ---- script-hash transaction index -----------------------------------

    /// Stage one script-hash index entry.
    pub fn stage_script_tx(
        &self,
        batch: &mut WriteBatch,
        script_hash: &[u8; 32],
        height: u64,
        tx_index: u32,
        tx_size: u32,
    ) {
        let mut key = concat(PREFIX_SCRIPT_TX, script_hash);
        key.extend_from_slice(&height.to_be_bytes());
        key.extend_from_slice(&tx_index.to_be_bytes());
        batch.put(key, tx_size.to_be_bytes().to_vec());

        let mut inverse = concat(PREFIX_HEIGHT_SCRIPT, &height.to_be_bytes());
        inverse.extend_from_slice(script_hash);
        inverse.extend_from_slice(&tx_index.to_be_bytes());
        batch.put(inverse, Vec::new());
    }

    /// Stage removal of every script-hash entry recorded at `height`.
    pub fn stage_script_tx_removal_at(&self, batch: &mut WriteBatch, height: u64) -> Result<()> {
        let prefix = concat(PREFIX_HEIGHT_SCRIPT, &height.to_be_bytes());
        for (key, _) in self.kv.scan_prefix(&prefix)? {
            let rest = &key[prefix.len()..];
            if rest.len() != 36 {
                return Err(StorageError::Corrupt("height-script key".into()));
            }
            let mut forward = PREFIX_SCRIPT_TX.to_vec();
            forward.extend_from_slice(&rest[..32]);
            forward.extend_from_slice(&height.to_be_bytes());
            forward.extend_from_slice(&rest[32..]);
            batch.delete(forward);
            batch.delete(key);
        }
        Ok(())
    }

    /// Every `(height, tx_index, tx_size)` touching any of `script_hashes`
    /// within `[from_height, to_height)`.
    pub fn fetch_script_hash_related_tx(
        &self,
        script_hashes: &[[u8; 32]],
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<(u64, u32, u32)>> {
        let mut out = Vec::new();
        for script_hash in script_hashes {
            let prefix = concat(PREFIX_SCRIPT_TX, script_hash);
            for (key, value) in self.kv.scan_prefix(&prefix)? {
                let rest = &key[prefix.len()..];
                if rest.len() != 12 || value.len() != 4 {
                    return Err(StorageError::Corrupt("script-tx entry".into()));
                }
                let height = u64::from_be_bytes(rest[..8].try_into().expect("8 bytes"));
                if height < from_height || height >= to_height {
                    continue;
                }
                let tx_index = u32::from_be_bytes(rest[8..].try_into().expect("4 bytes"));
                let tx_size = u32::from_be_bytes(value[..4].try_into().expect("4 bytes"));
                out.push((height, tx_index, tx_size));
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    // ---- staking ranks ----------------------------------------------------

    /// Store the staking ranks effective at `height`.
    pub fn put_staking_ranks(&self, height: u64, ranks: &[StakingRank]) -> Result<()> {
        self.kv.put(
            &concat(PREFIX_RANKS, &height.to_be_bytes()),
            &bincode::serialize(ranks).map_err(|e| StorageError::Corrupt(e.to_string()))?,
        )
    }

    /// Staking ranks at `height`; empty when none are recorded.
    pub fn fetch_staking_ranks(&self, height: u64) -> Result<Vec<StakingRank>> {
        match self.kv.get(&concat(PREFIX_RANKS, &height.to_be_bytes()))? {
            None => Ok(Vec::new()),
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
        }
    }
}

fn concat(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(rest);
    key
}

fn pubkey_digest(pubkey: &NodePubKey) -> [u8; 32] {
    capcore_crypto::sha256(&pubkey.serialize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKv;

    fn chain_db() -> ChainDb {
        ChainDb::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn test_tip_and_height_index() {
        let db = chain_db();
        assert!(db.fetch_tip().unwrap().is_none());
        let hash = H256::sha256(b"block");
        let mut batch = WriteBatch::new();
        batch.put(
            KEY_TIP.to_vec(),
            bincode::serialize(&(hash, 7u64)).unwrap(),
        );
        db.apply(batch).unwrap();
        assert_eq!(db.fetch_tip().unwrap(), Some((hash, 7)));
    }

    #[test]
    fn test_tx_location_roundtrip() {
        let db = chain_db();
        let tx_hash = H256::sha256(b"tx");
        let location = TxLocation {
            height: 3,
            block_hash: H256::sha256(b"block"),
            tx_index: 1,
            spent: vec![false, true],
        };
        let mut batch = WriteBatch::new();
        db.stage_tx_location(&mut batch, &tx_hash, &location).unwrap();
        db.apply(batch).unwrap();
        assert_eq!(db.fetch_tx_location(&tx_hash).unwrap(), Some(location));

        let mut batch = WriteBatch::new();
        db.stage_tx_location_removal(&mut batch, &tx_hash);
        db.apply(batch).unwrap();
        assert!(db.fetch_tx_location(&tx_hash).unwrap().is_none());
    }

    #[test]
    fn test_script_tx_index_range_query() {
        let db = chain_db();
        let script = [7u8; 32];
        let mut batch = WriteBatch::new();
        db.stage_script_tx(&mut batch, &script, 5, 0, 120);
        db.stage_script_tx(&mut batch, &script, 9, 2, 250);
        db.stage_script_tx(&mut batch, &script, 15, 1, 90);
        db.apply(batch).unwrap();

        let hits = db.fetch_script_hash_related_tx(&[script], 5, 15).unwrap();
        assert_eq!(hits, vec![(5, 0, 120), (9, 2, 250)]);

        // Detach height 9.
        let mut batch = WriteBatch::new();
        db.stage_script_tx_removal_at(&mut batch, 9).unwrap();
        db.apply(batch).unwrap();
        let hits = db.fetch_script_hash_related_tx(&[script], 0, 100).unwrap();
        assert_eq!(hits, vec![(5, 0, 120), (15, 1, 90)]);
    }

    #[test]
    fn test_mined_block_index() {
        let db = chain_db();
        let sk = capcore_crypto::PrivateKey::from_bytes(&[9u8; 32]).unwrap();
        let pk = NodePubKey::Secp(sk.public_key());
        let mut batch = WriteBatch::new();
        db.stage_mined_block(&mut batch, &pk, 10);
        db.stage_mined_block(&mut batch, &pk, 12);
        db.apply(batch).unwrap();
        assert_eq!(db.fetch_mined_blocks(&pk).unwrap(), vec![10, 12]);

        let mut batch = WriteBatch::new();
        db.stage_mined_block_removal(&mut batch, &pk, 12);
        db.apply(batch).unwrap();
        assert_eq!(db.fetch_mined_blocks(&pk).unwrap(), vec![10]);
    }

    #[test]
    fn test_staking_ranks_default_empty() {
        let db = chain_db();
        assert!(db.fetch_staking_ranks(4).unwrap().is_empty());
        let ranks = vec![StakingRank {
            script_hash: [1u8; 32],
            value: 500,
            weight: 500,
        }];
        db.put_staking_ranks(4, &ranks).unwrap();
        assert_eq!(db.fetch_staking_ranks(4).unwrap(), ranks);
    }
}
