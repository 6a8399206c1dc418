//! 32-byte hash type.
//!
//! [`H256`] is used for block hashes, transaction hashes, merkle roots,
//! challenges and trie roots. Equality and ordering are byte-lexicographic;
//! the zero hash is the sentinel for "genesis parent" and "coinbase
//! previous".

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte hash value.
///
/// # Example
///
/// ```rust
/// use capcore_types::H256;
///
/// let hash = H256::double_sha256(b"block bytes");
/// assert_ne!(hash, H256::ZERO);
/// let parsed: H256 = hash.to_string().parse().unwrap();
/// assert_eq!(parsed, hash);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct H256([u8; HASH_SIZE]);

impl H256 {
    /// The zero hash; sentinel for "no hash".
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// Creates a hash from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a hash from a slice, checking the length.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != HASH_SIZE {
            return Err(Error::InvalidLength {
                expected: HASH_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// SHA-256 of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Self(capcore_crypto::sha256(data))
    }

    /// Double SHA-256 of `data`; the block identifier digest.
    pub fn double_sha256(data: &[u8]) -> Self {
        Self(capcore_crypto::double_sha256(data))
    }

    /// The hash as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The hash as a fixed-size array reference.
    #[inline]
    pub const fn as_array(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Whether this is the zero sentinel.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Parse from hex, with or without `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Hex representation without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", hex::encode(self.0))
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; HASH_SIZE]> for H256 {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<H256> for [u8; HASH_SIZE] {
    fn from(hash: H256) -> Self {
        hash.0
    }
}

impl AsRef<[u8]> for H256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Self::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sha256_known_vector() {
        // Double SHA-256 of "hello".
        let hash = H256::double_sha256(b"hello");
        assert_eq!(
            hash.to_hex(),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_zero_hash() {
        assert!(H256::ZERO.is_zero());
        assert!(!H256::sha256(b"x").is_zero());
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = H256::sha256(b"roundtrip");
        assert_eq!(H256::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(
            H256::from_hex(&format!("0x{}", hash.to_hex())).unwrap(),
            hash
        );
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = H256::from([0x00; 32]);
        let b = H256::from([0x01; 32]);
        let c = H256::from([0xff; 32]);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_serde_json_as_hex() {
        let hash = H256::sha256(b"serde");
        let json = serde_json::to_string(&hash).unwrap();
        assert!(json.contains(&hash.to_hex()));
        let back: H256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_serde_bincode_roundtrip() {
        let hash = H256::sha256(b"bincode");
        let bytes = bincode::serialize(&hash).unwrap();
        let back: H256 = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(H256::from_hex("1234").is_err());
        assert!(H256::from_slice(&[0u8; 31]).is_err());
    }
}
