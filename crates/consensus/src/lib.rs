//! # CapCore Consensus
//!
//! Chain parameters and the height-gated consensus rules:
//!
//! - [`ChainParams`] - every constant the chain needs, threaded as a value
//!   (no globals); constructors per network
//! - fork gates - the warm-up and full fork height predicates and the
//!   block-version rule
//! - reward - subsidy halving and the miner/supernode split in both regimes
//! - binding prices - the genesis per-bitlength table and the post-fork
//!   network price curve
//!
//! Two fork gates exist. The *warm-up* gate disables the old binding flow
//! and permits minting without binding (at a reduced reward); the *full*
//! gate requires binding, enables PoS proofs and switches the reward split.

pub mod forks;
pub mod params;
pub mod reward;

pub use forks::{block_version_for, enforce_fork, enforce_fork_warmup, required_binding};
pub use params::{ChainParams, Checkpoint};
pub use reward::calc_block_subsidy;

/// Pending-payload nonces may run at most this far ahead of the chain state.
pub const PAYLOAD_NONCE_GAP: u32 = 5;

/// Errors raised by consensus computations.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Amount arithmetic out of range.
    #[error("amount out of range")]
    AmountOutOfRange,

    /// Minting requires a binding in the current regime.
    #[error("no valid binding for minting")]
    BindingRequired,

    /// No binding price exists for this bit length.
    #[error("invalid bit length {0} for binding price")]
    InvalidBitLength(usize),

    /// Plot size must be non-zero to price a binding.
    #[error("unexpected zero plot size")]
    ZeroPlotSize,

    /// Height not covered by the subsidy continuity table.
    #[error("unexpected height {0} for subsidy computation")]
    UnexpectedHeight(u64),
}

impl From<capcore_types::Error> for ConsensusError {
    fn from(_: capcore_types::Error) -> Self {
        ConsensusError::AmountOutOfRange
    }
}

/// Result alias for consensus computations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
