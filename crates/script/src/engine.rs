//! The witness execution engine.

use capcore_crypto::{ecdsa, sha256};
use capcore_types::transaction::{
    SEQUENCE_LOCK_TIME_DISABLED, SEQUENCE_LOCK_TIME_IS_SECONDS, SEQUENCE_LOCK_TIME_MASK,
};
use capcore_types::Transaction;

use crate::opcodes::*;
use crate::standard::{script_info, ScriptClass};
use crate::{Result, ScriptError, MAX_PUBKEYS_PER_MULTISIG};

/// Flags modifying execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFlags {
    /// When set, spending a binding output requires a height-based relative
    /// lock of at least this many blocks (the binding-locked-period fork
    /// rule).
    pub binding_locked_period: Option<u64>,
}

/// Verify one input of `tx` against the output script it spends.
///
/// The final witness item is the redeem script; its SHA-256 must equal the
/// 32-byte hash committed in the output, and it must evaluate to true over
/// the remaining witness items.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    prev_pk_script: &[u8],
    flags: ScriptFlags,
) -> Result<()> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(ScriptError::InvalidStack)?;

    let info = script_info(prev_pk_script);
    let committed = match info.script_hash() {
        Some(hash) => hash,
        None => return Err(ScriptError::Malformed("nonstandard output".into())),
    };

    if info.class == ScriptClass::BindingScriptHash {
        if let Some(period) = flags.binding_locked_period {
            check_binding_sequence(input.sequence, period)?;
        }
    }

    let redeem = input.witness.last().ok_or(ScriptError::EmptyWitness)?;
    if sha256(redeem) != committed {
        return Err(ScriptError::WitnessProgramMismatch);
    }

    let initial: Vec<Vec<u8>> = input.witness[..input.witness.len() - 1].to_vec();
    let digest = tx.sig_hash(input_index);
    execute(redeem, initial, digest.as_array())
}

fn check_binding_sequence(sequence: u64, period: u64) -> Result<()> {
    if sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
        return Err(ScriptError::BindingLock);
    }
    if sequence & SEQUENCE_LOCK_TIME_IS_SECONDS != 0 {
        return Err(ScriptError::BindingLock);
    }
    if sequence & SEQUENCE_LOCK_TIME_MASK < period {
        return Err(ScriptError::BindingLock);
    }
    Ok(())
}

/// Execute a redeem script over an initial stack.
fn execute(script: &[u8], mut stack: Vec<Vec<u8>>, sig_digest: &[u8; 32]) -> Result<()> {
    let pops = parse_script(script)?;
    for pop in &pops {
        match pop.opcode {
            OP_0 => stack.push(Vec::new()),
            0x01..=OP_PUSHDATA1 => stack.push(pop.data.clone()),
            op if (OP_1..=OP_16).contains(&op) => stack.push(vec![op - OP_1 + 1]),
            OP_DUP => {
                let top = stack.last().ok_or(ScriptError::InvalidStack)?.clone();
                stack.push(top);
            }
            OP_SHA256 => {
                let top = stack.pop().ok_or(ScriptError::InvalidStack)?;
                stack.push(sha256(&top).to_vec());
            }
            OP_HASH160 => {
                let top = stack.pop().ok_or(ScriptError::InvalidStack)?;
                stack.push(capcore_crypto::hash160(&top).to_vec());
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = stack.pop().ok_or(ScriptError::InvalidStack)?;
                let a = stack.pop().ok_or(ScriptError::InvalidStack)?;
                let equal = a == b;
                if pop.opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EvalFalse);
                    }
                } else {
                    stack.push(bool_item(equal));
                }
            }
            OP_VERIFY => {
                let top = stack.pop().ok_or(ScriptError::InvalidStack)?;
                if !as_bool(&top) {
                    return Err(ScriptError::EvalFalse);
                }
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pk_bytes = stack.pop().ok_or(ScriptError::InvalidStack)?;
                let sig_bytes = stack.pop().ok_or(ScriptError::InvalidStack)?;
                let ok = check_signature(&sig_bytes, &pk_bytes, sig_digest);
                if pop.opcode == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::SigVerify);
                    }
                } else {
                    stack.push(bool_item(ok));
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let ok = check_multisig(&mut stack, sig_digest)?;
                if pop.opcode == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::SigVerify);
                    }
                } else {
                    stack.push(bool_item(ok));
                }
            }
            op => return Err(ScriptError::UnsupportedOpcode(op)),
        }
    }

    match stack.last() {
        Some(top) if as_bool(top) => Ok(()),
        _ => Err(ScriptError::EvalFalse),
    }
}

/// Pop and verify an m-of-n multisig: stack holds `sig_1..sig_m` below the
/// script-supplied `m <pk_1..pk_n> n`.
fn check_multisig(stack: &mut Vec<Vec<u8>>, sig_digest: &[u8; 32]) -> Result<bool> {
    let n = pop_small_int(stack)?;
    if n == 0 || n > MAX_PUBKEYS_PER_MULTISIG {
        return Err(ScriptError::InvalidMultisig);
    }
    if stack.len() < n + 1 {
        return Err(ScriptError::InvalidStack);
    }
    let pubkeys: Vec<Vec<u8>> = stack.drain(stack.len() - n..).collect();
    let m = pop_small_int(stack)?;
    if m == 0 || m > n {
        return Err(ScriptError::InvalidMultisig);
    }
    if stack.len() < m {
        return Err(ScriptError::InvalidStack);
    }
    let sigs: Vec<Vec<u8>> = stack.drain(stack.len() - m..).collect();

    // Signatures must match public keys in order.
    let mut pk_iter = pubkeys.iter();
    'sigs: for sig in &sigs {
        for pk in pk_iter.by_ref() {
            if check_signature(sig, pk, sig_digest) {
                continue 'sigs;
            }
        }
        return Ok(false);
    }
    Ok(true)
}

fn pop_small_int(stack: &mut Vec<Vec<u8>>) -> Result<usize> {
    let item = stack.pop().ok_or(ScriptError::InvalidStack)?;
    match item.len() {
        0 => Ok(0),
        1 => Ok(item[0] as usize),
        _ => Err(ScriptError::InvalidMultisig),
    }
}

fn check_signature(sig_bytes: &[u8], pk_bytes: &[u8], digest: &[u8; 32]) -> bool {
    let Ok(pk) = ecdsa::PublicKey::from_bytes(pk_bytes) else {
        return false;
    };
    let Ok(sig) = ecdsa::Signature::from_der(sig_bytes) else {
        return false;
    };
    sig.verify_hash(digest, &pk)
}

fn as_bool(item: &[u8]) -> bool {
    item.iter().any(|&b| b != 0)
}

fn bool_item(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

/// Count signature operations in a script: 1 per `CHECKSIG` form, 20 per
/// `CHECKMULTISIG` form. Unparsable scripts count zero.
pub fn count_script_sig_ops(script: &[u8]) -> usize {
    let Ok(pops) = parse_script(script) else {
        return 0;
    };
    pops.iter()
        .map(|pop| match pop.opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => MAX_PUBKEYS_PER_MULTISIG,
            _ => 0,
        })
        .sum()
}

/// Count signature operations for a whole transaction: the redeem script of
/// every input witness plus every output script. Coinbase transactions
/// count zero.
pub fn count_sig_ops(tx: &Transaction) -> usize {
    if tx.is_coinbase() {
        return 0;
    }
    let mut total = 0;
    for input in &tx.inputs {
        if let Some(redeem) = input.witness.last() {
            total += count_script_sig_ops(redeem);
        }
    }
    for output in &tx.outputs {
        total += count_script_sig_ops(&output.pk_script);
    }
    total
}

/// Build the canonical 1-of-1 multisig redeem script for a public key.
pub fn single_key_redeem(pubkey: &ecdsa::PublicKey) -> Vec<u8> {
    let mut script = vec![OP_1];
    push_data(&mut script, &pubkey.serialize_compressed());
    script.push(OP_1);
    script.push(OP_CHECKMULTISIG);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::{binding_script, binding_target, pay_to_witness_script_hash};
    use capcore_crypto::PrivateKey;
    use capcore_types::transaction::MAX_TX_IN_SEQUENCE;
    use capcore_types::{OutPoint, TxInput, TxOutput};

    fn spend_fixture(sk: &PrivateKey) -> (Transaction, Vec<u8>) {
        let redeem = single_key_redeem(&sk.public_key());
        let pk_script = pay_to_witness_script_hash(&sha256(&redeem));
        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(
            capcore_types::H256::sha256(b"prev"),
            0,
        )));
        tx.outputs.push(TxOutput::new(1, vec![OP_0]));
        let sig = sk.sign_hash(tx.sig_hash(0).as_array());
        tx.inputs[0].witness = vec![sig.to_der(), redeem];
        (tx, pk_script)
    }

    #[test]
    fn test_single_key_spend() {
        let sk = PrivateKey::from_bytes(&[51u8; 32]).unwrap();
        let (tx, pk_script) = spend_fixture(&sk);
        verify_input(&tx, 0, &pk_script, ScriptFlags::default()).unwrap();
    }

    #[test]
    fn test_wrong_signature_rejected() {
        let sk = PrivateKey::from_bytes(&[52u8; 32]).unwrap();
        let other = PrivateKey::from_bytes(&[53u8; 32]).unwrap();
        let (mut tx, pk_script) = spend_fixture(&sk);
        let bad_sig = other.sign_hash(tx.sig_hash(0).as_array());
        tx.inputs[0].witness[0] = bad_sig.to_der();
        assert!(verify_input(&tx, 0, &pk_script, ScriptFlags::default()).is_err());
    }

    #[test]
    fn test_wrong_redeem_script_rejected() {
        let sk = PrivateKey::from_bytes(&[54u8; 32]).unwrap();
        let (mut tx, pk_script) = spend_fixture(&sk);
        let other = PrivateKey::from_bytes(&[55u8; 32]).unwrap();
        tx.inputs[0].witness[1] = single_key_redeem(&other.public_key());
        assert_eq!(
            verify_input(&tx, 0, &pk_script, ScriptFlags::default()),
            Err(ScriptError::WitnessProgramMismatch)
        );
    }

    #[test]
    fn test_binding_lock_enforced() {
        let sk = PrivateKey::from_bytes(&[56u8; 32]).unwrap();
        let redeem = single_key_redeem(&sk.public_key());
        let target = binding_target(b"plot", 0, 24);
        let pk_script = binding_script(&sha256(&redeem), &target).unwrap();

        let mut tx = Transaction::new();
        tx.inputs.push(TxInput::new(OutPoint::new(
            capcore_types::H256::sha256(b"prev"),
            0,
        )));
        tx.outputs.push(TxOutput::new(1, vec![OP_0]));
        let sig = sk.sign_hash(tx.sig_hash(0).as_array());
        tx.inputs[0].witness = vec![sig.to_der(), redeem];

        let flags = ScriptFlags {
            binding_locked_period: Some(100),
        };
        // Disabled sequence: rejected.
        tx.inputs[0].sequence = MAX_TX_IN_SEQUENCE;
        assert_eq!(
            verify_input(&tx, 0, &pk_script, flags),
            Err(ScriptError::BindingLock)
        );

        // Height lock of 100: accepted (re-sign, the sequence changed).
        tx.inputs[0].sequence = 100;
        let sig = sk.sign_hash(tx.sig_hash(0).as_array());
        tx.inputs[0].witness[0] = sig.to_der();
        verify_input(&tx, 0, &pk_script, flags).unwrap();

        // Too-short lock: rejected.
        tx.inputs[0].sequence = 99;
        let sig = sk.sign_hash(tx.sig_hash(0).as_array());
        tx.inputs[0].witness[0] = sig.to_der();
        assert_eq!(
            verify_input(&tx, 0, &pk_script, flags),
            Err(ScriptError::BindingLock)
        );
    }

    #[test]
    fn test_sig_op_counting() {
        let sk = PrivateKey::from_bytes(&[57u8; 32]).unwrap();
        let (tx, _) = spend_fixture(&sk);
        // One multisig redeem = 20 sigops.
        assert_eq!(count_sig_ops(&tx), MAX_PUBKEYS_PER_MULTISIG);

        let mut coinbase = Transaction::new();
        coinbase.inputs.push(TxInput::new(OutPoint::null()));
        assert_eq!(count_sig_ops(&coinbase), 0);
    }

    #[test]
    fn test_empty_witness_rejected() {
        let sk = PrivateKey::from_bytes(&[58u8; 32]).unwrap();
        let (mut tx, pk_script) = spend_fixture(&sk);
        tx.inputs[0].witness.clear();
        assert_eq!(
            verify_input(&tx, 0, &pk_script, ScriptFlags::default()),
            Err(ScriptError::EmptyWitness)
        );
    }
}
