//! The closed block-rejection taxonomy.
//!
//! The validator produces exactly one kind per rejection; kinds are never
//! wrapped in one another. Every kind except `Transient` is cached per
//! block hash, so a peer re-sending the same bad block is cheap to reject.

use thiserror::Error;

/// Context-free structural violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanityError {
    /// Header chain id differs from the chain's.
    #[error("chain id mismatch")]
    ChainIdMismatch,
    /// Block version below the required version, or structurally invalid.
    #[error("invalid block version")]
    InvalidVersion,
    /// Key/signature/proof families violate the version constraints.
    #[error("header constraint: {0}")]
    HeaderConstraint(String),
    /// Timestamp beyond the allowed future window.
    #[error("block timestamp too far in the future")]
    TimeTooNew,
    /// The builder bans itself.
    #[error("block bans its own public key")]
    BanSelfPk,
    /// Duplicate key in the ban list.
    #[error("duplicate public key in ban list")]
    DuplicateBan,
    /// Ban list and punishment area disagree.
    #[error("ban list does not match punishment area")]
    BanListMismatch,
    /// A punishment record is malformed or unverifiable.
    #[error("invalid punishment record")]
    InvalidPunishment,
    /// Header signature failed.
    #[error("invalid block signature")]
    BlockSignature,
    /// Block has no transactions.
    #[error("block has no transactions")]
    NoTransactions,
    /// First transaction is not a coinbase.
    #[error("first transaction is not a coinbase")]
    FirstTxNotCoinbase,
    /// A later transaction is a coinbase.
    #[error("multiple coinbase transactions")]
    MultipleCoinbases,
    /// Coinbase payload height does not match the header.
    #[error("coinbase height mismatch")]
    BadCoinbaseHeight,
    /// Coinbase payload truncated.
    #[error("incomplete coinbase payload")]
    IncompleteCoinbasePayload,
    /// Too many transactions.
    #[error("too many transactions")]
    TooManyTransactions,
    /// Serialized block too large.
    #[error("block too large")]
    BlockTooBig,
    /// Proposal merkle root mismatch.
    #[error("invalid proposal root")]
    InvalidProposalRoot,
    /// Transaction merkle root mismatch.
    #[error("invalid transaction merkle root")]
    InvalidMerkleRoot,
    /// Witness merkle root mismatch.
    #[error("invalid witness merkle root")]
    InvalidWitnessRoot,
    /// Duplicate transaction in the block.
    #[error("duplicate transaction")]
    DuplicateTx,
    /// Signature-operation budget exceeded.
    #[error("too many signature operations")]
    TooManySigOps,
    /// Transaction has no inputs.
    #[error("transaction has no inputs")]
    NoTxInputs,
    /// Transaction has no outputs.
    #[error("transaction has no outputs")]
    NoTxOutputs,
    /// Transaction too large.
    #[error("transaction too large")]
    TxTooBig,
    /// Output value out of range.
    #[error("invalid output value")]
    BadTxOutValue,
    /// Duplicate outpoint among inputs.
    #[error("duplicate transaction inputs")]
    DuplicateTxInputs,
    /// Null outpoint outside the coinbase first input.
    #[error("invalid transaction input")]
    BadTxInput,
}

/// Proof-of-capacity violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PocCheckError {
    /// Proof family not permitted at this height/version.
    #[error("invalid proof type")]
    InvalidProofType,
    /// Target non-positive, below the chain limit, or not the expected
    /// value.
    #[error("unexpected difficulty")]
    UnexpectedDifficulty,
    /// Proof verification failed.
    #[error(transparent)]
    Proof(#[from] capcore_poc::PocError),
    /// Valid proof whose quality misses the target.
    #[error("proof quality below target")]
    LowQuality,
}

/// Violations of the block's position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The builder key is banned at the parent.
    #[error("block builder public key is banned")]
    BannedPubKey,
    /// Target does not match the derived next target.
    #[error("unexpected target")]
    UnexpectedTarget,
    /// Header height is not parent height + 1.
    #[error("bad block height")]
    BadHeight,
    /// Block at a checkpoint height with the wrong hash.
    #[error("checkpoint mismatch")]
    BadCheckpoint,
    /// Block forks the chain before the latest checkpoint.
    #[error("fork predates the last checkpoint")]
    ForkTooOld,
    /// Timestamp before the last checkpoint.
    #[error("timestamp before last checkpoint")]
    CheckpointTimeTooOld,
    /// Challenge does not match the derived value.
    #[error("unexpected challenge")]
    UnexpectedChallenge,
    /// Timestamp slot not strictly after the parent's.
    #[error("timestamp slot not after parent")]
    TimeTooOld,
    /// A transaction is not finalized at the parent median time.
    #[error("unfinalized transaction")]
    UnfinalizedTx,
    /// A punishment-area key is already banned.
    #[error("punished key already banned")]
    AlreadyBanned,
}

/// Violations found while connecting the block's transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The genesis block cannot be connected.
    #[error("cannot connect the genesis block")]
    ConnectGenesis,
    /// Transaction would overwrite a not-fully-spent duplicate.
    #[error("transaction overwrites unspent duplicate")]
    OverwriteTx,
    /// Referenced input transaction is missing.
    #[error("missing input transaction")]
    MissingTx,
    /// Spends an immature coinbase (or immature input of a coinbase).
    #[error("immature spend")]
    ImmatureSpend,
    /// Output spent twice.
    #[error("double spend")]
    DoubleSpend,
    /// Fee arithmetic failed or inputs below outputs.
    #[error("bad fees")]
    BadFees,
    /// Pool-coinbase bind transaction pays less than the bind fee.
    #[error("insufficient fee for pool coinbase bind")]
    FeeForPoolCoinbase,
    /// Coinbase outputs exceed the allowed reward plus fees.
    #[error("bad coinbase value")]
    BadCoinbaseValue,
    /// Declared staking-reward count is wrong.
    #[error("bad staking reward count")]
    BadStakingRewardNum,
    /// A staking payout has the wrong amount or script.
    #[error("bad staking reward")]
    BadStakingReward,
    /// Coinbase does not pay the pool-bound script.
    #[error("unexpected coinbase")]
    UnexpectedCoinbase,
    /// Coinbase binding inputs do not reach the required amount.
    #[error("insufficient binding")]
    InsufficientBinding,
    /// Coinbase extra input is not a binding output of the builder.
    #[error("coinbase input does not bind the builder")]
    BindingPubKey,
    /// Coinbase input carries witness data.
    #[error("coinbase input carries witness data")]
    CoinbaseWitness,
    /// A relative sequence lock is not yet satisfied.
    #[error("sequence lock not satisfied")]
    SequenceNotSatisfied,
    /// Script execution failed.
    #[error(transparent)]
    Script(#[from] capcore_script::ScriptError),
}

/// Binding-state violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// Insert of an already-bound plot.
    #[error("plot already bound")]
    PlotAlreadyBound,
    /// Delete or mint against an unbound plot.
    #[error("plot not bound")]
    PlotNotBound,
    /// Binding script hash has the wrong length.
    #[error("invalid binding script")]
    InvalidBindingScript,
    /// Pool-coinbase payload nonce outside the allowed window.
    #[error("invalid payload nonce")]
    InvalidPayloadNonce,
    /// Trie root after the block's effects differs from the header.
    #[error("mismatched binding root")]
    InvalidRoot,
}

/// A block rejection (or transient failure) from the acceptance pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// Malformed bytes.
    #[error("decode: {0}")]
    Decode(String),
    /// Context-free invariant violated.
    #[error("sanity: {0}")]
    Sanity(#[from] SanityError),
    /// Proof of capacity rejected.
    #[error("poc: {0}")]
    Poc(#[from] PocCheckError),
    /// Contextual check failed.
    #[error("context: {0}")]
    Context(#[from] ContextError),
    /// Connect-level check failed.
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    /// Binding-state transition failed.
    #[error("binding: {0}")]
    Binding(#[from] BindingError),
    /// Database or I/O failure; surfaced to the caller, never cached.
    #[error("transient: {0}")]
    Transient(String),
    /// A long-running operation observed the stop signal.
    #[error("interrupted")]
    Interrupted,
}

impl BlockError {
    /// Whether this error may be cached against the block hash.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, BlockError::Transient(_) | BlockError::Interrupted)
    }
}

impl From<capcore_storage::StorageError> for BlockError {
    fn from(e: capcore_storage::StorageError) -> Self {
        BlockError::Transient(e.to_string())
    }
}

impl From<capcore_trie::TrieError> for BlockError {
    fn from(e: capcore_trie::TrieError) -> Self {
        BlockError::Transient(e.to_string())
    }
}

/// Result alias for acceptance operations.
pub type Result<T> = std::result::Result<T, BlockError>;
