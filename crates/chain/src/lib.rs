//! # CapCore Chain
//!
//! The block-acceptance pipeline and its state machine:
//!
//! - [`BlockTree`] - the in-memory forest of candidate branches with
//!   cap-sum best-tip selection
//! - validation - layered context-free, contextual and connect-level
//!   checks, fork-gated by the chain parameters
//! - binding state - the authenticated trie committed by V2 headers
//! - [`AddrIndexer`] - the per-script-hash transaction index
//! - [`Blockchain`] - the acceptance engine: orphan pool, error cache,
//!   reorganization, punishment bookkeeping, events and the block waiter
//! - import/export - the framed block stream for migration
//!
//! All chain-state mutation is serialized through one dispatcher task;
//! callers submit blocks over a bounded channel and await their reply.

pub mod cache;
pub mod chain;
pub mod coinbase;
pub mod connect;
pub mod error;
pub mod errcache;
pub mod import;
pub mod indexer;
pub mod orphan;
pub mod payload;
pub mod punish;
pub mod state;
pub mod tree;
pub mod txstore;
pub mod validate;

pub use chain::{Blockchain, ChainConfig, ChainEvent};
pub use error::{
    BindingError, BlockError, ConnectError, ContextError, PocCheckError, Result, SanityError,
};
pub use indexer::AddrIndexer;
pub use orphan::OrphanBlockPool;
pub use payload::{BindPoolCoinbase, CoinbasePayload};
pub use tree::{BlockNode, BlockTree, NodeId, MIN_MEMORY_NODES};
pub use txstore::{TxData, TxStore};

/// Flags modifying how a block moves through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BehaviorFlags {
    /// Trusted bulk import: skip script execution.
    pub fast_import: bool,
    /// Skip proof-of-capacity verification and the header signature
    /// (template evaluation and test harnesses).
    pub no_poc_check: bool,
}

impl BehaviorFlags {
    /// The default flags for network blocks.
    pub const NONE: Self = Self {
        fast_import: false,
        no_poc_check: false,
    };

    /// Flags for trusted imports.
    pub const FAST_IMPORT: Self = Self {
        fast_import: true,
        no_poc_check: false,
    };

    /// Flags for template evaluation and fixtures.
    pub const NO_POC_CHECK: Self = Self {
        fast_import: false,
        no_poc_check: true,
    };
}
