//! # CapCore Script
//!
//! Output scripts and their execution. Every standard output on this chain
//! is witness-v0 shaped: a leading `OP_0` followed by a 32-byte script hash
//! and, depending on the class, trailing class data:
//!
//! - **Pay-to-witness-script-hash**: `OP_0 <32-byte hash>`
//! - **Staking**: `OP_0 <32-byte hash> <8-byte frozen period>`
//! - **Binding**: `OP_0 <32-byte holder hash> <22-byte binding script hash>`
//!
//! Spending reveals the redeem script as the final witness item; the engine
//! checks its SHA-256 against the committed hash and executes it over the
//! remaining witness stack.

pub mod engine;
pub mod opcodes;
pub mod standard;

pub use engine::{count_sig_ops, single_key_redeem, verify_input, ScriptFlags};
pub use standard::{
    binding_script, binding_target, parse_binding_script, pay_to_witness_script_hash, script_info,
    staking_script, ScriptClass, ScriptInfo,
};

/// Length of a binding script hash: 20-byte plot digest, proof type,
/// plot-size parameter.
pub const BINDING_SCRIPT_HASH_LEN: usize = 22;

/// Maximum public keys in a multisig redeem script.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Errors raised by script parsing and execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// Malformed script bytes.
    #[error("malformed script: {0}")]
    Malformed(String),

    /// Witness stack does not fit the committed script hash.
    #[error("witness program hash mismatch")]
    WitnessProgramMismatch,

    /// Witness stack empty or missing the redeem script.
    #[error("empty witness")]
    EmptyWitness,

    /// An opcode outside the supported set.
    #[error("unsupported opcode {0:#04x}")]
    UnsupportedOpcode(u8),

    /// Stack underflow or malformed stack shape.
    #[error("invalid stack operation")]
    InvalidStack,

    /// A signature failed verification.
    #[error("signature verification failed")]
    SigVerify,

    /// Script finished with a false or empty result.
    #[error("script evaluated to false")]
    EvalFalse,

    /// Binding output spent without the required relative lock.
    #[error("binding sequence lock not met")]
    BindingLock,

    /// Multisig parameters out of range.
    #[error("invalid multisig parameters")]
    InvalidMultisig,
}

/// Result alias for script operations.
pub type Result<T> = std::result::Result<T, ScriptError>;
