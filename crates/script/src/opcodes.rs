//! The opcode subset standard scripts use.

/// Push an empty byte vector.
pub const OP_0: u8 = 0x00;

/// Largest direct data push; `0x01..=0x4b` push that many bytes.
pub const OP_DATA_75: u8 = 0x4b;

/// Push with one-byte length.
pub const OP_PUSHDATA1: u8 = 0x4c;

/// Push the number 1.
pub const OP_1: u8 = 0x51;

/// Push the number 16.
pub const OP_16: u8 = 0x60;

/// Fail unless the top stack item is true.
pub const OP_VERIFY: u8 = 0x69;

/// Duplicate the top stack item.
pub const OP_DUP: u8 = 0x76;

/// Push equality of the top two items.
pub const OP_EQUAL: u8 = 0x87;

/// `OP_EQUAL` then `OP_VERIFY`.
pub const OP_EQUALVERIFY: u8 = 0x88;

/// Replace the top item with its SHA-256.
pub const OP_SHA256: u8 = 0xa8;

/// Replace the top item with its Hash160.
pub const OP_HASH160: u8 = 0xa9;

/// Verify a signature against a public key.
pub const OP_CHECKSIG: u8 = 0xac;

/// `OP_CHECKSIG` then `OP_VERIFY`.
pub const OP_CHECKSIGVERIFY: u8 = 0xad;

/// Verify m-of-n signatures.
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// `OP_CHECKMULTISIG` then `OP_VERIFY`.
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// A parsed script element: an opcode and its pushed data, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOpcode {
    /// The opcode byte.
    pub opcode: u8,
    /// Data pushed by this opcode; empty for non-push opcodes.
    pub data: Vec<u8>,
}

impl ParsedOpcode {
    /// Whether this element pushes data (including `OP_0` and `OP_N`).
    pub fn is_push(&self) -> bool {
        self.opcode <= OP_PUSHDATA1 || (OP_1..=OP_16).contains(&self.opcode)
    }

    /// The small number pushed by `OP_0`/`OP_N`, if this is one.
    pub fn small_int(&self) -> Option<u8> {
        match self.opcode {
            OP_0 => Some(0),
            op if (OP_1..=OP_16).contains(&op) => Some(op - OP_1 + 1),
            _ => None,
        }
    }
}

/// Parse a script into its opcode sequence.
pub fn parse_script(script: &[u8]) -> crate::Result<Vec<ParsedOpcode>> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < script.len() {
        let opcode = script[i];
        i += 1;
        let data_len = match opcode {
            0x01..=OP_DATA_75 => opcode as usize,
            OP_PUSHDATA1 => {
                let len = *script
                    .get(i)
                    .ok_or_else(|| crate::ScriptError::Malformed("truncated pushdata".into()))?
                    as usize;
                i += 1;
                len
            }
            _ => 0,
        };
        if script.len() < i + data_len {
            return Err(crate::ScriptError::Malformed("truncated push".into()));
        }
        out.push(ParsedOpcode {
            opcode,
            data: script[i..i + data_len].to_vec(),
        });
        i += data_len;
    }
    Ok(out)
}

/// Serialize a data push with the shortest encoding.
pub fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => out.push(OP_0),
        n if n <= OP_DATA_75 as usize => {
            out.push(n as u8);
            out.extend_from_slice(data);
        }
        n => {
            debug_assert!(n <= u8::MAX as usize);
            out.push(OP_PUSHDATA1);
            out.push(n as u8);
            out.extend_from_slice(data);
        }
    }
}
