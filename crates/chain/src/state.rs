//! Binding-state transitions.
//!
//! The binding trie maps three key families: 22-byte binding entries,
//! `"p_"`-prefixed pool-coinbase entries, and the fixed network-binding
//! accumulator. Every connected block replays its binding inputs/outputs
//! and pool-coinbase payloads against a working copy of the parent's trie;
//! the resulting root must equal the V2 header commitment.

use capcore_consensus::{enforce_fork_warmup, ChainParams, PAYLOAD_NONCE_GAP};
use capcore_script::parse_binding_script;
use capcore_trie::Trie;
use capcore_types::{Amount, Block, ByteReader, ByteWriter};

use crate::error::{BindingError, BlockError, ConnectError, Result};
use crate::payload::{decode_payload, BindPoolCoinbase};
use crate::txstore::TxStore;

/// Fixed key of the network-binding accumulator.
pub const KEY_NETWORK_BINDING: &[u8] = b"networkbinding";

/// Key prefix of pool-coinbase entries.
pub const POOL_PK_COINBASE_PREFIX: &[u8] = b"p_";

/// The value stored under a binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingInfo {
    /// Bound amount in grains.
    pub amount: u64,
}

impl BindingInfo {
    /// Encode as an 8-byte big-endian amount.
    pub fn encode(&self) -> Vec<u8> {
        self.amount.to_be_bytes().to_vec()
    }

    /// Decode; an empty value is the zero info.
    pub fn decode(data: &[u8]) -> Self {
        if data.len() < 8 {
            return Self::default();
        }
        Self {
            amount: u64::from_be_bytes(data[..8].try_into().expect("8 bytes")),
        }
    }
}

/// The trie key of a pool-coinbase entry.
pub fn pool_pk_key(pool_pk: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(POOL_PK_COINBASE_PREFIX.len() + pool_pk.len());
    key.extend_from_slice(POOL_PK_COINBASE_PREFIX);
    key.extend_from_slice(pool_pk);
    key
}

/// Read the network-binding accumulator; absent means zero.
pub fn get_network_binding(trie: &Trie) -> Result<Amount> {
    match trie.try_get(KEY_NETWORK_BINDING)? {
        None => Ok(Amount::ZERO),
        Some(bytes) => {
            Amount::from_be_bytes(&bytes).map_err(|e| BlockError::Decode(e.to_string()))
        }
    }
}

/// Write the network-binding accumulator.
pub fn put_network_binding(trie: &mut Trie, total: Amount) -> Result<()> {
    trie.try_update(KEY_NETWORK_BINDING, &total.to_be_bytes_trimmed())?;
    Ok(())
}

/// The coinbase assignment and nonce for a pool key; `(None, 0)` when the
/// pool has never bound.
pub fn get_pool_pk_coinbase(trie: &Trie, pool_pk: &[u8]) -> Result<(Option<Vec<u8>>, u32)> {
    match trie.try_get(&pool_pk_key(pool_pk))? {
        None => Ok((None, 0)),
        Some(value) => {
            let mut r = ByteReader::new(&value);
            let nonce = r
                .take_u32_be()
                .map_err(|e| BlockError::Decode(e.to_string()))?;
            let script = r.take_rest();
            if script.is_empty() {
                Ok((None, nonce))
            } else {
                Ok((Some(script.to_vec()), nonce))
            }
        }
    }
}

/// Apply an authenticated pool-coinbase bind to the trie.
///
/// The nonce must advance past the stored one by at most
/// [`PAYLOAD_NONCE_GAP`]; the first bind of a pool must start inside the
/// window above zero. An empty script address deletes the assignment but
/// keeps the nonce.
pub fn set_pool_pk_coinbase(trie: &mut Trie, bind: &BindPoolCoinbase) -> Result<()> {
    let key = pool_pk_key(&bind.pool_pk.to_bytes());
    let state_nonce = match trie.try_get(&key)? {
        None => 0u32,
        Some(value) => {
            let mut r = ByteReader::new(&value);
            r.take_u32_be()
                .map_err(|e| BlockError::Decode(e.to_string()))?
        }
    };
    if bind.nonce <= state_nonce || bind.nonce > state_nonce + PAYLOAD_NONCE_GAP {
        tracing::warn!(
            state_nonce,
            payload_nonce = bind.nonce,
            "pool coinbase nonce outside window"
        );
        return Err(BindingError::InvalidPayloadNonce.into());
    }
    let mut w = ByteWriter::new();
    w.put_u32_be(bind.nonce);
    w.put_raw(&bind.coinbase_script_address);
    trie.try_update(&key, &w.into_bytes())?;
    Ok(())
}

/// Replay one block's binding effects onto a working trie.
///
/// Non-coinbase inputs spending binding outputs delete their entry and
/// shrink the accumulator; binding outputs insert theirs and grow it;
/// payloads update pool-coinbase assignments. Pre-warm-up binding outputs
/// never entered the trie, so spends of them are skipped.
pub fn apply_block_bindings(
    trie: &mut Trie,
    params: &ChainParams,
    block: &Block,
    tx_store: &TxStore,
) -> Result<()> {
    let mut network_binding = get_network_binding(trie)?;
    let initial = network_binding;

    for tx in &block.transactions {
        let is_coinbase = tx.is_coinbase();
        if !is_coinbase {
            for input in &tx.inputs {
                let outpoint = &input.previous_outpoint;
                let prev = tx_store
                    .get(&outpoint.hash)
                    .ok_or(ConnectError::MissingTx)?;
                if !enforce_fork_warmup(params, prev.block_height) {
                    continue;
                }
                let prev_out = prev
                    .tx
                    .outputs
                    .get(outpoint.index as usize)
                    .ok_or(ConnectError::MissingTx)?;
                let Some(binding_hash) = parse_binding_script(&prev_out.pk_script)
                    .map_err(|_| BindingError::InvalidBindingScript)?
                else {
                    continue;
                };
                if binding_hash.len() != capcore_script::BINDING_SCRIPT_HASH_LEN {
                    return Err(BindingError::InvalidBindingScript.into());
                }
                if trie.try_get(&binding_hash)?.is_none() {
                    return Err(BindingError::PlotNotBound.into());
                }
                trie.try_delete(&binding_hash)?;
                network_binding = network_binding
                    .checked_sub(
                        Amount::from_u64(prev_out.value)
                            .map_err(|e| BlockError::Decode(e.to_string()))?,
                    )
                    .map_err(|e| BlockError::Decode(e.to_string()))?;
            }
        }

        for output in &tx.outputs {
            let Some(binding_hash) = parse_binding_script(&output.pk_script)
                .map_err(|_| BindingError::InvalidBindingScript)?
            else {
                continue;
            };
            if binding_hash.len() != capcore_script::BINDING_SCRIPT_HASH_LEN {
                return Err(BindingError::InvalidBindingScript.into());
            }
            if trie.try_get(&binding_hash)?.is_some() {
                return Err(BindingError::PlotAlreadyBound.into());
            }
            trie.try_update(
                &binding_hash,
                &BindingInfo {
                    amount: output.value,
                }
                .encode(),
            )?;
            network_binding = network_binding
                .checked_add(
                    Amount::from_u64(output.value)
                        .map_err(|e| BlockError::Decode(e.to_string()))?,
                )
                .map_err(|e| BlockError::Decode(e.to_string()))?;
        }

        if !is_coinbase {
            if let Some(bind) = decode_payload(&tx.payload) {
                set_pool_pk_coinbase(trie, &bind)?;
            }
        }
    }

    if network_binding != initial {
        put_network_binding(trie, network_binding)?;
    }
    Ok(())
}
