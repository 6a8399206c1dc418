//! On-disk cache for side-chain block bodies.
//!
//! Best-chain blocks live in the database; side-chain bodies only need to
//! survive until a reorg either adopts or abandons them, so they go into an
//! append-only file that is wiped on startup.

use capcore_types::{Block, H256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{BlockError, Result};

/// File name of the side-chain cache.
pub const BLOCK_CACHE_FILE_NAME: &str = "blocks.cache";

struct CacheLoc {
    offset: u64,
    size: usize,
}

/// Append-only side-chain block cache.
pub struct BlockCache {
    data: File,
    index: HashMap<H256, CacheLoc>,
}

impl BlockCache {
    /// Create the cache file at `path`, truncating any previous run's file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| BlockError::Transient(e.to_string()))?;
        Ok(Self {
            data,
            index: HashMap::new(),
        })
    }

    /// Append a block body.
    pub fn add_block(&mut self, block: &Block) -> Result<()> {
        let bytes = block
            .encode()
            .map_err(|e| BlockError::Decode(e.to_string()))?;
        let offset = self
            .data
            .seek(SeekFrom::End(0))
            .map_err(|e| BlockError::Transient(e.to_string()))?;
        self.data
            .write_all(&bytes)
            .map_err(|e| BlockError::Transient(e.to_string()))?;
        self.index.insert(
            block.block_hash(),
            CacheLoc {
                offset,
                size: bytes.len(),
            },
        );
        Ok(())
    }

    /// Fetch a cached block body.
    pub fn get_block(&mut self, hash: &H256) -> Result<Option<Block>> {
        let Some(loc) = self.index.get(hash) else {
            return Ok(None);
        };
        let mut bytes = vec![0u8; loc.size];
        self.data
            .seek(SeekFrom::Start(loc.offset))
            .map_err(|e| BlockError::Transient(e.to_string()))?;
        self.data
            .read_exact(&mut bytes)
            .map_err(|e| BlockError::Transient(e.to_string()))?;
        Block::decode(&bytes)
            .map(Some)
            .map_err(|e| BlockError::Decode(e.to_string()))
    }

    /// Whether `hash` is cached.
    pub fn contains(&self, hash: &H256) -> bool {
        self.index.contains_key(hash)
    }
}
