//! # CapCore Types
//!
//! Core type definitions for the CapCore blockchain:
//!
//! - [`H256`] - 32-byte identifiers with double-SHA-256 support
//! - [`Amount`] - checked monetary arithmetic in grains
//! - [`BlockHeader`] and [`Block`] - consensus structures with the
//!   deterministic wire codec used for hashing
//! - [`Transaction`] - inputs, outputs, witnesses and payloads
//! - [`FaultPubKey`] and [`ProposalArea`] - double-signing punishment records
//!
//! ## Codec modes
//!
//! Headers encode in four modes: `Id` (all fields, hashed into the block
//! id), `Poc` (signature omitted, so the signature can cover the digest),
//! `ChainId` (genesis self-hash, chain id omitted) and `Db` (storage form).
//! The first three are bit-exact by construction; every implementation must
//! reproduce them byte for byte.

#![warn(rust_2018_idioms)]

pub mod amount;
pub mod block;
pub mod codec;
pub mod hash;
pub mod header;
pub mod keys;
pub mod merkle;
pub mod proposal;
pub mod transaction;

pub use amount::{Amount, GRAINS_PER_COIN, MAX_MONEY};
pub use block::Block;
pub use codec::{ByteReader, ByteWriter};
pub use hash::H256;
pub use header::{BlockHeader, CodecMode, BLOCK_VERSION_V1, BLOCK_VERSION_V2};
pub use keys::{NodePubKey, NodeSignature};
pub use merkle::merkle_root;
pub use proposal::{FaultPubKey, ProposalArea};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_PAYLOAD: usize = 1_048_576;

/// Maximum number of transactions in a block.
pub const MAX_TX_PER_BLOCK: usize = 10_000;

/// Result type alias for type-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing or decoding core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Malformed bytes while decoding
    #[error("decode error: {0}")]
    Decode(String),

    /// Amount arithmetic overflow or out-of-range value
    #[error("amount out of range")]
    AmountOutOfRange,

    /// Cryptographic material failed to parse
    #[error("crypto error: {0}")]
    Crypto(#[from] capcore_crypto::CryptoError),

    /// Codec mode not applicable to this value
    #[error("invalid codec mode: {0}")]
    InvalidCodecMode(String),
}
