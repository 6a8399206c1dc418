//! Header key and signature material.
//!
//! Native proof headers are signed with secp256k1; PoS headers with BLS.
//! The variants carry the parsed keys so verification never re-parses, while
//! the wire forms stay canonical (compressed SEC1 / 48-byte G1, DER / 96-byte
//! G2).

use capcore_crypto::{ecdsa, BlsPublicKey, BlsSignature};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A block-builder public key: secp256k1 or BLS, matching the proof family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePubKey {
    /// secp256k1 key (native proofs); 33 bytes compressed.
    Secp(ecdsa::PublicKey),
    /// BLS12-381 G1 key (PoS proofs); 48 bytes.
    Bls(BlsPublicKey),
}

impl NodePubKey {
    /// Canonical serialized form (33 or 48 bytes).
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            NodePubKey::Secp(pk) => pk.serialize_compressed().to_vec(),
            NodePubKey::Bls(pk) => pk.to_bytes().to_vec(),
        }
    }

    /// Parse a key, dispatching on the serialized length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            ecdsa::COMPRESSED_PUBKEY_LEN => Ok(NodePubKey::Secp(ecdsa::PublicKey::from_bytes(
                bytes,
            )?)),
            capcore_crypto::bls::BLS_PUBKEY_LEN => {
                Ok(NodePubKey::Bls(BlsPublicKey::from_bytes(bytes)?))
            }
            n => Err(Error::InvalidLength {
                expected: ecdsa::COMPRESSED_PUBKEY_LEN,
                actual: n,
            }),
        }
    }

    /// Whether this is a secp256k1 key.
    pub fn is_secp(&self) -> bool {
        matches!(self, NodePubKey::Secp(_))
    }

    /// Whether this is a BLS key.
    pub fn is_bls(&self) -> bool {
        matches!(self, NodePubKey::Bls(_))
    }
}

/// A header signature, matching the key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSignature {
    /// ECDSA signature, DER on the wire (70-72 bytes).
    Secp(ecdsa::Signature),
    /// BLS signature (96 bytes).
    Bls(BlsSignature),
}

impl NodeSignature {
    /// Canonical serialized form.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            NodeSignature::Secp(sig) => sig.to_der(),
            NodeSignature::Bls(sig) => sig.to_bytes().to_vec(),
        }
    }

    /// Parse a signature, dispatching on the serialized length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() == capcore_crypto::bls::BLS_SIGNATURE_LEN {
            Ok(NodeSignature::Bls(BlsSignature::from_bytes(bytes)?))
        } else {
            Ok(NodeSignature::Secp(ecdsa::Signature::from_der(bytes)?))
        }
    }

    /// Verify over `message`; BLS uses the aug scheme, ECDSA hashes with
    /// SHA-256 first. Returns `false` when key and signature families
    /// mismatch.
    pub fn verify(&self, message: &[u8], pubkey: &NodePubKey) -> bool {
        match (self, pubkey) {
            (NodeSignature::Secp(sig), NodePubKey::Secp(pk)) => sig.verify(message, pk),
            (NodeSignature::Bls(sig), NodePubKey::Bls(pk)) => sig.verify(message, pk),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcore_crypto::{BlsPrivateKey, PrivateKey};

    #[test]
    fn test_secp_roundtrip_and_verify() {
        let sk = PrivateKey::from_bytes(&[11u8; 32]).unwrap();
        let pk = NodePubKey::Secp(sk.public_key());
        let restored = NodePubKey::from_bytes(&pk.serialize()).unwrap();
        assert_eq!(pk, restored);

        let sig = NodeSignature::Secp(sk.sign(b"header"));
        assert!(sig.verify(b"header", &pk));
        assert!(!sig.verify(b"other", &pk));
    }

    #[test]
    fn test_bls_roundtrip_and_verify() {
        let sk = BlsPrivateKey::from_seed(&[12u8; 32]);
        let pk = NodePubKey::Bls(sk.public_key());
        let restored = NodePubKey::from_bytes(&pk.serialize()).unwrap();
        assert_eq!(pk, restored);

        let sig = NodeSignature::Bls(sk.sign(b"header"));
        assert!(sig.verify(b"header", &pk));
    }

    #[test]
    fn test_family_mismatch_fails_verification() {
        let ssk = PrivateKey::from_bytes(&[13u8; 32]).unwrap();
        let bsk = BlsPrivateKey::from_seed(&[14u8; 32]);
        let sig = NodeSignature::Secp(ssk.sign(b"m"));
        assert!(!sig.verify(b"m", &NodePubKey::Bls(bsk.public_key())));
    }

    #[test]
    fn test_bad_length_rejected() {
        assert!(NodePubKey::from_bytes(&[0u8; 20]).is_err());
    }
}
