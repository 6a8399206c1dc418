//! Standard output script classification and construction.

use crate::opcodes::{parse_script, push_data, ParsedOpcode, OP_0};
use crate::{Result, ScriptError, BINDING_SCRIPT_HASH_LEN};

/// Classes of standard output scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    /// Unrecognized script; spendable only if some redeem path exists, never
    /// indexed.
    NonStandard,
    /// `OP_0 <32-byte script hash>`.
    WitnessV0ScriptHash,
    /// `OP_0 <32-byte script hash> <8-byte frozen period>`.
    StakingScriptHash,
    /// `OP_0 <32-byte holder hash> <22-byte binding script hash>`.
    BindingScriptHash,
}

/// A classified output script.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    /// The detected class.
    pub class: ScriptClass,
    /// Parsed opcodes.
    pub pops: Vec<ParsedOpcode>,
}

impl ScriptInfo {
    /// The 32-byte holder script hash for any standard class.
    pub fn script_hash(&self) -> Option<[u8; 32]> {
        if self.class == ScriptClass::NonStandard {
            return None;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.pops[1].data);
        Some(hash)
    }

    /// The 22-byte binding script hash, for binding outputs.
    pub fn binding_script_hash(&self) -> Option<&[u8]> {
        (self.class == ScriptClass::BindingScriptHash).then(|| self.pops[2].data.as_slice())
    }

    /// The frozen period, for staking outputs.
    pub fn frozen_period(&self) -> Option<u64> {
        if self.class != ScriptClass::StakingScriptHash {
            return None;
        }
        Some(u64::from_le_bytes(
            self.pops[2].data.as_slice().try_into().ok()?,
        ))
    }
}

/// Classify an output script.
pub fn script_info(pk_script: &[u8]) -> ScriptInfo {
    let pops = match parse_script(pk_script) {
        Ok(pops) => pops,
        Err(_) => {
            return ScriptInfo {
                class: ScriptClass::NonStandard,
                pops: Vec::new(),
            }
        }
    };
    let class = classify(&pops);
    ScriptInfo { class, pops }
}

fn classify(pops: &[ParsedOpcode]) -> ScriptClass {
    if pops.len() < 2 || pops[0].opcode != OP_0 || pops[1].data.len() != 32 {
        return ScriptClass::NonStandard;
    }
    match pops.len() {
        2 => ScriptClass::WitnessV0ScriptHash,
        3 if pops[2].data.len() == 8 => ScriptClass::StakingScriptHash,
        // 20-byte hashes are the pre-fork binding form, 22-byte the current
        // one; which lengths are acceptable depends on the call site.
        3 if matches!(pops[2].data.len(), 20 | BINDING_SCRIPT_HASH_LEN) => {
            ScriptClass::BindingScriptHash
        }
        _ => ScriptClass::NonStandard,
    }
}

/// Returns the binding script hash (20 or 22 bytes) if `pk_script` is a
/// binding output.
pub fn parse_binding_script(pk_script: &[u8]) -> Result<Option<Vec<u8>>> {
    let info = script_info(pk_script);
    match info.class {
        ScriptClass::BindingScriptHash => Ok(Some(info.pops[2].data.clone())),
        _ => Ok(None),
    }
}

/// Build a pay-to-witness-script-hash output script.
pub fn pay_to_witness_script_hash(script_hash: &[u8; 32]) -> Vec<u8> {
    let mut out = vec![OP_0];
    push_data(&mut out, script_hash);
    out
}

/// Build a staking output script.
pub fn staking_script(script_hash: &[u8; 32], frozen_period: u64) -> Vec<u8> {
    let mut out = vec![OP_0];
    push_data(&mut out, script_hash);
    push_data(&mut out, &frozen_period.to_le_bytes());
    out
}

/// Build a binding output script.
///
/// `binding_hash` is the 20-byte plot digest followed (in the current
/// form) by the proof type and the plot-size parameter; the bare 20-byte
/// pre-fork form is also accepted.
pub fn binding_script(holder_hash: &[u8; 32], binding_hash: &[u8]) -> Result<Vec<u8>> {
    if !matches!(binding_hash.len(), 20 | BINDING_SCRIPT_HASH_LEN) {
        return Err(ScriptError::Malformed("binding script hash length".into()));
    }
    let mut out = vec![OP_0];
    push_data(&mut out, holder_hash);
    push_data(&mut out, binding_hash);
    Ok(out)
}

/// Build the 22-byte binding script hash for a plot.
pub fn binding_target(plot_identity: &[u8], proof_type: u8, size_param: u8) -> Vec<u8> {
    let mut target = capcore_crypto::hash160(plot_identity).to_vec();
    target.push(proof_type);
    target.push(size_param);
    target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2wsh_classification() {
        let script = pay_to_witness_script_hash(&[0x42; 32]);
        let info = script_info(&script);
        assert_eq!(info.class, ScriptClass::WitnessV0ScriptHash);
        assert_eq!(info.script_hash(), Some([0x42; 32]));
        assert!(info.binding_script_hash().is_none());
    }

    #[test]
    fn test_staking_classification() {
        let script = staking_script(&[0x43; 32], 1_000);
        let info = script_info(&script);
        assert_eq!(info.class, ScriptClass::StakingScriptHash);
        assert_eq!(info.frozen_period(), Some(1_000));
    }

    #[test]
    fn test_binding_classification() {
        let target = binding_target(b"plot identity", 1, 32);
        assert_eq!(target.len(), BINDING_SCRIPT_HASH_LEN);
        let script = binding_script(&[0x44; 32], &target).unwrap();
        let info = script_info(&script);
        assert_eq!(info.class, ScriptClass::BindingScriptHash);
        assert_eq!(info.binding_script_hash(), Some(target.as_slice()));
        assert_eq!(parse_binding_script(&script).unwrap(), Some(target));
    }

    #[test]
    fn test_nonstandard() {
        assert_eq!(script_info(&[0x51]).class, ScriptClass::NonStandard);
        assert_eq!(script_info(&[]).class, ScriptClass::NonStandard);
        assert_eq!(
            parse_binding_script(&pay_to_witness_script_hash(&[1; 32])).unwrap(),
            None
        );
    }
}
