//! The framed block stream for blockchain migration.
//!
//! Each frame is `total_size(u32 BE) || height(u64 BE) || hash(32) ||
//! block bytes (storage codec)`. A `.gz` path suffix selects gzip on both
//! sides. Import drives blocks through the full acceptance pipeline;
//! `--no-expensive-validation` skips script execution.

use capcore_types::{Block, H256};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::Blockchain;
use crate::error::{BlockError, Result};
use crate::BehaviorFlags;

/// Blocks imported between stop-signal samples; the atomic cancellation
/// granularity.
pub const IMPORT_BATCH_SIZE: u64 = 2000;

/// Fixed frame overhead after the length field: height plus hash.
const FRAME_HEADER_LEN: usize = 8 + 32;

/// Import statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Frames read from the stream.
    pub read: u64,
    /// Blocks accepted into the chain (orphans and known blocks included).
    pub processed: u64,
}

/// Write one frame.
fn write_frame<W: Write>(writer: &mut W, height: u64, hash: &H256, bytes: &[u8]) -> Result<()> {
    let total = (FRAME_HEADER_LEN + bytes.len()) as u32;
    writer
        .write_all(&total.to_be_bytes())
        .and_then(|_| writer.write_all(&height.to_be_bytes()))
        .and_then(|_| writer.write_all(hash.as_bytes()))
        .and_then(|_| writer.write_all(bytes))
        .map_err(|e| BlockError::Transient(e.to_string()))
}

/// Read one frame; `Ok(None)` at a clean end of stream.
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(u64, H256, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BlockError::Transient(e.to_string())),
    }
    let total = u32::from_be_bytes(len_buf) as usize;
    if total < FRAME_HEADER_LEN {
        return Err(BlockError::Decode("frame shorter than its header".into()));
    }
    let mut frame = vec![0u8; total];
    reader
        .read_exact(&mut frame)
        .map_err(|e| BlockError::Transient(e.to_string()))?;
    let height = u64::from_be_bytes(frame[..8].try_into().expect("8 bytes"));
    let hash =
        H256::from_slice(&frame[8..40]).map_err(|e| BlockError::Decode(e.to_string()))?;
    Ok(Some((height, hash, frame[40..].to_vec())))
}

/// Export the main chain from height 1 to the tip into `writer`.
pub fn export_blocks<W: Write>(chain: &Blockchain, mut writer: W) -> Result<u64> {
    let tip = chain.best_block_height();
    let mut exported = 0u64;
    for height in 1..=tip {
        let block = chain
            .db()
            .fetch_block_by_height(height)?
            .ok_or_else(|| BlockError::Transient(format!("missing block at {height}")))?;
        let bytes = block
            .encode()
            .map_err(|e| BlockError::Decode(e.to_string()))?;
        write_frame(&mut writer, height, &block.block_hash(), &bytes)?;
        exported += 1;
    }
    writer
        .flush()
        .map_err(|e| BlockError::Transient(e.to_string()))?;
    info!(exported, tip, "chain export finished");
    Ok(exported)
}

/// Import a framed stream through the acceptance pipeline.
///
/// The stop signal is sampled every [`IMPORT_BATCH_SIZE`] blocks; observing
/// it returns [`BlockError::Interrupted`], distinct from any validation
/// failure.
pub async fn import_blocks<R: Read>(
    chain: &Blockchain,
    mut reader: R,
    no_expensive_validation: bool,
    stop: &AtomicBool,
) -> Result<ImportStats> {
    let flags = if no_expensive_validation {
        BehaviorFlags::FAST_IMPORT
    } else {
        BehaviorFlags::NONE
    };

    let mut stats = ImportStats::default();
    while let Some((height, hash, bytes)) = read_frame(&mut reader)? {
        if stats.read % IMPORT_BATCH_SIZE == 0 && stop.load(Ordering::Relaxed) {
            warn!(processed = stats.processed, "import interrupted");
            return Err(BlockError::Interrupted);
        }
        stats.read += 1;

        let block = Block::decode(&bytes).map_err(|e| BlockError::Decode(e.to_string()))?;
        if block.block_hash() != hash || block.height() != height {
            return Err(BlockError::Decode(format!(
                "frame at height {height} does not match its block"
            )));
        }

        chain.process_with_flags(Arc::new(block), flags).await?;
        stats.processed += 1;
    }
    info!(
        read = stats.read,
        processed = stats.processed,
        "chain import finished"
    );
    Ok(stats)
}

/// Open an import stream; a `.gz` suffix selects gzip.
pub fn open_import_stream(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| BlockError::Transient(e.to_string()))?;
    let reader = BufReader::new(file);
    if path.extension().map(|ext| ext == "gz").unwrap_or(false) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Create an export stream; a `.gz` suffix selects gzip.
pub fn create_export_stream(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path).map_err(|e| BlockError::Transient(e.to_string()))?;
    let writer = BufWriter::new(file);
    if path.extension().map(|ext| ext == "gz").unwrap_or(false) {
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        let hash = H256::sha256(b"block");
        write_frame(&mut buf, 42, &hash, b"body bytes").unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (height, read_hash, body) = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(height, 42);
        assert_eq!(read_hash, hash);
        assert_eq!(body, b"body bytes");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 1, &H256::sha256(b"x"), b"payload").unwrap();
        buf.truncate(buf.len() - 2);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn test_short_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(BlockError::Decode(_))
        ));
    }

    #[test]
    fn test_gzip_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.dat.gz");
        {
            let mut writer = create_export_stream(&path).unwrap();
            write_frame(&mut writer, 7, &H256::sha256(b"gz"), b"zipped body").unwrap();
            writer.flush().unwrap();
        }
        let mut reader = open_import_stream(&path).unwrap();
        let (height, _, body) = read_frame(&mut reader).unwrap().unwrap();
        assert_eq!(height, 7);
        assert_eq!(body, b"zipped body");
    }
}
