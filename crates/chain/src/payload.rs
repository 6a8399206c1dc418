//! Coinbase and transaction payloads.

use capcore_crypto::{sha256, BlsPrivateKey, BlsPublicKey, BlsSignature};
use capcore_types::{ByteReader, ByteWriter};

/// Serialized length of the fixed coinbase payload prefix.
pub const COINBASE_PAYLOAD_LEN: usize = 12;

/// Method tag of the pool-coinbase bind payload.
pub const METHOD_BIND_POOL_COINBASE: u16 = 1;

/// The coinbase payload: the block height and the number of staking-reward
/// outputs, both little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoinbasePayload {
    /// Declared block height; must match the header.
    pub height: u64,
    /// Number of leading coinbase outputs paying staking rewards.
    pub num_staking_reward: u32,
}

impl CoinbasePayload {
    /// Build a payload.
    pub fn new(height: u64, num_staking_reward: u32) -> Self {
        Self {
            height,
            num_staking_reward,
        }
    }

    /// Serialize: `height(u64 LE) || num_staking_reward(u32 LE)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u64_le(self.height);
        w.put_u32_le(self.num_staking_reward);
        w.into_bytes()
    }

    /// Parse the payload prefix; trailing metadata bytes are permitted.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < COINBASE_PAYLOAD_LEN {
            return None;
        }
        let mut r = ByteReader::new(data);
        Some(Self {
            height: r.take_u64_le().ok()?,
            num_staking_reward: r.take_u32_le().ok()?,
        })
    }
}

/// An authenticated pool-coinbase bind.
///
/// Declares where the block reward must be paid whenever the pool key wins
/// a PoS block; the nonce prevents replay. An empty script address deletes
/// the assignment while keeping the nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPoolCoinbase {
    /// The pool public key being bound.
    pub pool_pk: BlsPublicKey,
    /// Aug-scheme signature by the pool key over the bind content.
    pub signature: BlsSignature,
    /// Strictly increasing per-pool nonce, starting at 1.
    pub nonce: u32,
    /// Script hash of the mandated coinbase output; empty to unbind.
    pub coinbase_script_address: Vec<u8>,
}

impl BindPoolCoinbase {
    /// The signed content digest:
    /// `SHA256(pool_pk || nonce(BE4) || len(script)(LE4) || script)`.
    fn signing_digest(pool_pk: &BlsPublicKey, nonce: u32, script: &[u8]) -> [u8; 32] {
        let mut w = ByteWriter::new();
        w.put_raw(&pool_pk.to_bytes());
        w.put_u32_be(nonce);
        w.put_u32_le(script.len() as u32);
        w.put_raw(script);
        sha256(&w.into_bytes())
    }

    /// Build and sign a bind with the pool secret key.
    pub fn sign(pool_sk: &BlsPrivateKey, coinbase_script_address: Vec<u8>, nonce: u32) -> Option<Self> {
        if nonce == 0 {
            return None;
        }
        let pool_pk = pool_sk.public_key();
        let digest = Self::signing_digest(&pool_pk, nonce, &coinbase_script_address);
        Some(Self {
            pool_pk,
            signature: pool_sk.sign(&digest),
            nonce,
            coinbase_script_address,
        })
    }

    /// Verify the pool signature.
    pub fn verify(&self) -> bool {
        if self.nonce == 0 {
            return false;
        }
        let digest =
            Self::signing_digest(&self.pool_pk, self.nonce, &self.coinbase_script_address);
        self.signature.verify(&digest, &self.pool_pk)
    }

    /// Serialize:
    /// `method(u16 BE) || pool_pk(48) || signature(96) || nonce(u32 BE) ||
    /// script`.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u16_be(METHOD_BIND_POOL_COINBASE);
        w.put_raw(&self.pool_pk.to_bytes());
        w.put_raw(&self.signature.to_bytes());
        w.put_u32_be(self.nonce);
        w.put_raw(&self.coinbase_script_address);
        w.into_bytes()
    }
}

/// Decode and authenticate a transaction payload.
///
/// Returns `None` for unknown methods, malformed bytes, a zero nonce or a
/// bad signature: such payloads are meaningless rather than invalid, and
/// carrying one does not reject the transaction.
pub fn decode_payload(payload: &[u8]) -> Option<BindPoolCoinbase> {
    let mut r = ByteReader::new(payload);
    let method = r.take_u16_be().ok()?;
    if method != METHOD_BIND_POOL_COINBASE {
        return None;
    }
    let pool_pk = BlsPublicKey::from_bytes(r.take(48).ok()?).ok()?;
    let signature = BlsSignature::from_bytes(r.take(96).ok()?).ok()?;
    let nonce = r.take_u32_be().ok()?;
    if nonce == 0 {
        return None;
    }
    let coinbase_script_address = r.take_rest().to_vec();
    let bind = BindPoolCoinbase {
        pool_pk,
        signature,
        nonce,
        coinbase_script_address,
    };
    if !bind.verify() {
        tracing::warn!("pool coinbase payload failed signature verification");
        return None;
    }
    Some(bind)
}
