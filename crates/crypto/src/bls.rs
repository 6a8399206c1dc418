//! BLS12-381 signatures (aug scheme).
//!
//! PoS plot headers and pool-coinbase payloads are signed with BLS keys:
//! public keys are 48-byte G1 points, signatures 96-byte G2 points. The aug
//! scheme prepends the signer's public key to the message before hashing to
//! the curve, which prevents rogue-key aggregation attacks.

use crate::{CryptoError, Result};
use blst::min_pk::{PublicKey as BlstPublicKey, SecretKey, Signature as BlstSignature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Domain separation tag for the aug signature scheme.
const DST_AUG: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_AUG_";

/// Length of a serialized BLS public key.
pub const BLS_PUBKEY_LEN: usize = 48;

/// Length of a serialized BLS signature.
pub const BLS_SIGNATURE_LEN: usize = 96;

/// BLS private key (32-byte scalar).
#[derive(Clone)]
pub struct BlsPrivateKey {
    inner: SecretKey,
}

impl BlsPrivateKey {
    /// Generate a random private key using the OS RNG.
    pub fn random() -> Self {
        let mut ikm = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut ikm);
        Self {
            // key_gen only fails for short ikm
            inner: SecretKey::key_gen(&ikm, &[]).expect("32-byte ikm"),
        }
    }

    /// Derive a private key from 32 bytes of input key material.
    pub fn from_seed(ikm: &[u8; 32]) -> Self {
        Self {
            inner: SecretKey::key_gen(ikm, &[]).expect("32-byte ikm"),
        }
    }

    /// Parse a private key from its 32-byte scalar encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = SecretKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{:?}", e)))?;
        Ok(Self { inner })
    }

    /// Raw scalar bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Derive the public key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Sign `message` under the aug scheme (public key prepended).
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let pk = self.inner.sk_to_pk();
        BlsSignature {
            inner: self.inner.sign(message, DST_AUG, &pk.to_bytes()),
        }
    }
}

impl fmt::Debug for BlsPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPrivateKey(..)")
    }
}

/// BLS public key (G1, 48 bytes serialized).
#[derive(Clone, Copy)]
pub struct BlsPublicKey {
    inner: BlstPublicKey,
}

impl BlsPublicKey {
    /// Parse and subgroup-check a 48-byte public key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLS_PUBKEY_LEN {
            return Err(CryptoError::InvalidLength {
                expected: BLS_PUBKEY_LEN,
                actual: bytes.len(),
            });
        }
        let inner = BlstPublicKey::key_validate(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;
        Ok(Self { inner })
    }

    /// Serialized 48-byte form.
    pub fn to_bytes(&self) -> [u8; BLS_PUBKEY_LEN] {
        self.inner.to_bytes()
    }
}

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl std::hash::Hash for BlsPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// BLS signature (G2, 96 bytes serialized).
#[derive(Clone, Copy)]
pub struct BlsSignature {
    inner: BlstSignature,
}

impl BlsSignature {
    /// Parse and subgroup-check a 96-byte signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err(CryptoError::InvalidLength {
                expected: BLS_SIGNATURE_LEN,
                actual: bytes.len(),
            });
        }
        let inner = BlstSignature::sig_validate(bytes, true)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;
        Ok(Self { inner })
    }

    /// Serialized 96-byte form.
    pub fn to_bytes(&self) -> [u8; BLS_SIGNATURE_LEN] {
        self.inner.to_bytes()
    }

    /// Verify `message` under the aug scheme.
    pub fn verify(&self, message: &[u8], pubkey: &BlsPublicKey) -> bool {
        let aug = pubkey.to_bytes();
        self.inner
            .verify(true, message, DST_AUG, &aug, &pubkey.inner, true)
            == BLST_ERROR::BLST_SUCCESS
    }
}

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for BlsSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
