//! ECDSA signatures over secp256k1.
//!
//! Native proof-of-capacity headers are signed with secp256k1 keys. Public
//! keys travel in compressed SEC1 form (33 bytes); signatures travel in DER
//! form (70-72 bytes). Message signing hashes the payload with SHA-256 first,
//! so `sign`/`verify` over a digest `d` operate on `SHA256(d)`.

use crate::{sha256, CryptoError, Result};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as K256Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Length of a compressed secp256k1 public key.
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// ECDSA private key (32-byte scalar).
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generate a random private key using the OS RNG.
    pub fn random() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a private key from raw scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = SigningKey::from_bytes(bytes.into())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Raw scalar bytes of the key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Sign `data`, hashing it with SHA-256 first.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.sign_hash(&sha256(data))
    }

    /// Sign a 32-byte digest directly.
    pub fn sign_hash(&self, digest: &[u8; 32]) -> Signature {
        // RFC 6979 signing over a 32-byte prehash cannot fail for a valid key.
        let sig: K256Signature = self.inner.sign_prehash(digest).expect("32-byte prehash");
        Signature { inner: sig }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "PrivateKey(..)")
    }
}

/// ECDSA public key on secp256k1.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse a compressed (or uncompressed) SEC1-encoded public key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn serialize_compressed(&self) -> [u8; COMPRESSED_PUBKEY_LEN] {
        let point = self.inner.to_encoded_point(true);
        let mut out = [0u8; COMPRESSED_PUBKEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.serialize_compressed()))
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serialize_compressed().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.serialize_compressed())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// ECDSA signature; DER on the wire, fixed form internally.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    inner: K256Signature,
}

impl Signature {
    /// Parse a DER-encoded signature.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = K256Signature::from_der(bytes)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(Self { inner })
    }

    /// DER encoding (70-72 bytes).
    pub fn to_der(&self) -> Vec<u8> {
        self.inner.to_der().as_bytes().to_vec()
    }

    /// Verify over `data`, hashing it with SHA-256 first.
    pub fn verify(&self, data: &[u8], pubkey: &PublicKey) -> bool {
        self.verify_hash(&sha256(data), pubkey)
    }

    /// Verify against a 32-byte digest directly.
    pub fn verify_hash(&self, digest: &[u8; 32], pubkey: &PublicKey) -> bool {
        pubkey.inner.verify_prehash(digest, &self.inner).is_ok()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.to_der()))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_der())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_der(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_roundtrip() {
        let sk = PrivateKey::random();
        let pk = sk.public_key();
        let restored = PublicKey::from_bytes(&pk.serialize_compressed()).unwrap();
        assert_eq!(pk, restored);
    }

    #[test]
    fn test_der_roundtrip() {
        let sk = PrivateKey::random();
        let sig = sk.sign(b"payload");
        let der = sig.to_der();
        assert!(der.len() >= 70 && der.len() <= 72);
        let restored = Signature::from_der(&der).unwrap();
        assert!(restored.verify(b"payload", &sk.public_key()));
    }

    #[test]
    fn test_deterministic_key_from_bytes() {
        let sk = PrivateKey::from_bytes(&[7u8; 32]).unwrap();
        let sk2 = PrivateKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(
            sk.public_key().serialize_compressed(),
            sk2.public_key().serialize_compressed()
        );
    }

    #[test]
    fn test_wrong_key_rejects() {
        let sk = PrivateKey::random();
        let other = PrivateKey::random();
        let sig = sk.sign(b"data");
        assert!(!sig.verify(b"data", &other.public_key()));
    }
}
