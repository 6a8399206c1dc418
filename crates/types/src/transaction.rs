//! Transactions: inputs, outputs, witnesses and payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ByteWriter, H256};

/// Sequence value that disables all relative lock-time semantics.
pub const MAX_TX_IN_SEQUENCE: u64 = u64::MAX;

/// Bit signalling that a sequence carries no relative lock.
pub const SEQUENCE_LOCK_TIME_DISABLED: u64 = 1 << 63;

/// Bit selecting time-based (rather than height-based) relative locks.
pub const SEQUENCE_LOCK_TIME_IS_SECONDS: u64 = 1 << 32;

/// Mask extracting the relative lock value from a sequence.
pub const SEQUENCE_LOCK_TIME_MASK: u64 = 0xffff_ffff;

/// Granularity of time-based relative locks, in seconds.
pub const SEQUENCE_LOCK_TIME_GRANULARITY: u64 = 512;

/// Lock-time values below this are block heights, above are unix times.
pub const LOCK_TIME_THRESHOLD: u64 = 500_000_000;

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Hash of the referenced transaction.
    pub hash: H256,
    /// Output index within it.
    pub index: u32,
}

impl OutPoint {
    /// Construct an outpoint.
    pub fn new(hash: H256, index: u32) -> Self {
        Self { hash, index }
    }

    /// The null outpoint: max index and zero hash, used by the first
    /// coinbase input.
    pub fn null() -> Self {
        Self {
            hash: H256::ZERO,
            index: u32::MAX,
        }
    }

    /// Whether this is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.is_zero()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The output being spent.
    pub previous_outpoint: OutPoint,
    /// Witness stack; the final item is the redeem script.
    pub witness: Vec<Vec<u8>>,
    /// Sequence number carrying relative lock-time semantics.
    pub sequence: u64,
}

impl TxInput {
    /// An input with a full sequence (no relative lock).
    pub fn new(previous_outpoint: OutPoint) -> Self {
        Self {
            previous_outpoint,
            witness: Vec::new(),
            sequence: MAX_TX_IN_SEQUENCE,
        }
    }

    /// Serialized witness size in bytes.
    pub fn witness_size(&self) -> usize {
        self.witness.iter().map(|w| 2 + w.len()).sum()
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Value in grains.
    pub value: u64,
    /// The locking script.
    pub pk_script: Vec<u8>,
}

impl TxOutput {
    /// Construct an output.
    pub fn new(value: u64, pk_script: Vec<u8>) -> Self {
        Self { value, pk_script }
    }
}

/// A transaction.
///
/// The payload byte string carries out-of-band data: the coinbase height
/// declaration for coinbase transactions, and authenticated chain-state
/// methods (pool-coinbase binds) for ordinary transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction format version.
    pub version: u32,
    /// Inputs; a coinbase's first input spends the null outpoint.
    pub inputs: Vec<TxInput>,
    /// Outputs.
    pub outputs: Vec<TxOutput>,
    /// Absolute lock time: height below [`LOCK_TIME_THRESHOLD`], else unix
    /// seconds. Zero means finalized.
    pub lock_time: u64,
    /// Out-of-band payload bytes.
    pub payload: Vec<u8>,
}

impl Transaction {
    /// An empty version-1 transaction.
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            payload: Vec::new(),
        }
    }

    /// Whether this transaction is a coinbase (first input spends the null
    /// outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs
            .first()
            .map(|input| input.previous_outpoint.is_null())
            .unwrap_or(false)
    }

    /// Deterministic encoding; `with_witness` selects the witness form.
    ///
    /// The no-witness form feeds [`Transaction::tx_hash`], the witness form
    /// [`Transaction::witness_hash`], so witness malleation cannot change a
    /// transaction id.
    pub fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u32_le(self.version);
        w.put_u32_le(self.inputs.len() as u32);
        for input in &self.inputs {
            w.put_hash(&input.previous_outpoint.hash);
            w.put_u32_le(input.previous_outpoint.index);
            w.put_u64_le(input.sequence);
            if with_witness {
                w.put_u16_le(input.witness.len() as u16);
                for item in &input.witness {
                    w.put_var_bytes(item);
                }
            }
        }
        w.put_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            w.put_u64_le(output.value);
            w.put_var_bytes(&output.pk_script);
        }
        w.put_u64_le(self.lock_time);
        w.put_var_bytes(&self.payload);
        w.into_bytes()
    }

    /// Transaction id: double SHA-256 of the no-witness encoding.
    pub fn tx_hash(&self) -> H256 {
        H256::double_sha256(&self.encode(false))
    }

    /// Witness id: double SHA-256 of the witness encoding.
    pub fn witness_hash(&self) -> H256 {
        H256::double_sha256(&self.encode(true))
    }

    /// Serialized size including witness data.
    pub fn plain_size(&self) -> usize {
        self.encode(true).len()
    }

    /// Digest committed to by input signatures: the no-witness encoding
    /// extended with the index of the signing input.
    pub fn sig_hash(&self, input_index: usize) -> H256 {
        let mut bytes = self.encode(false);
        bytes.extend_from_slice(&(input_index as u32).to_le_bytes());
        H256::double_sha256(&bytes)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
