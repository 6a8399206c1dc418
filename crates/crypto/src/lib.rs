//! # CapCore Crypto
//!
//! Cryptographic primitives for the CapCore blockchain.
//!
//! This crate provides:
//! - **SHA-256 hashing** - single, double (block identifiers) and Hash160
//! - **ECDSA signatures** - secp256k1 signing and verification for native
//!   proof-of-capacity headers
//! - **BLS12-381 signatures** - aug-scheme signatures for PoS plot headers
//!   and pool-coinbase payloads
//!
//! ## Example
//!
//! ```rust
//! use capcore_crypto::{double_sha256, ecdsa, bls};
//!
//! let digest = double_sha256(b"block header bytes");
//!
//! let sk = ecdsa::PrivateKey::random();
//! let sig = sk.sign(b"message");
//! assert!(sig.verify(b"message", &sk.public_key()));
//!
//! let bsk = bls::BlsPrivateKey::random();
//! let bsig = bsk.sign(b"payload");
//! assert!(bsig.verify(b"payload", &bsk.public_key()));
//! ```

pub mod bls;
pub mod ecdsa;
pub mod hash;

pub use bls::{BlsPrivateKey, BlsPublicKey, BlsSignature};
pub use ecdsa::{PrivateKey, PublicKey, Signature};
pub use hash::{double_sha256, hash160, sha256, sha256_concat};

/// Common type alias for a raw 32-byte digest.
pub type Hash = [u8; 32];

/// Error types for cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signature verification failed
    #[error("signature verification failed")]
    VerificationFailed,

    /// BLS operation failed
    #[error("BLS operation failed: {0}")]
    Bls(String),

    /// Invalid input length
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Hex decoding error
    #[error("hex decoding error: {0}")]
    Hex(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        CryptoError::Hex(e.to_string())
    }
}

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        let digest = sha256(b"hello");
        assert_eq!(
            hex::encode(digest),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_double_sha256_is_composed() {
        let once = sha256(b"capcore");
        assert_eq!(double_sha256(b"capcore"), sha256(&once));
    }

    #[test]
    fn test_hash160_length() {
        assert_eq!(hash160(b"pubkey bytes").len(), 20);
    }

    #[test]
    fn test_ecdsa_sign_verify() {
        let sk = ecdsa::PrivateKey::random();
        let pk = sk.public_key();
        let sig = sk.sign(b"test message");
        assert!(sig.verify(b"test message", &pk));
        assert!(!sig.verify(b"another message", &pk));
    }

    #[test]
    fn test_bls_sign_verify() {
        let sk = bls::BlsPrivateKey::random();
        let pk = sk.public_key();
        let sig = sk.sign(b"test message");
        assert!(sig.verify(b"test message", &pk));
        assert!(!sig.verify(b"another message", &pk));
    }
}
