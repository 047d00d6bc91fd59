//! Output script classification for policy checks.

use crate::sigops::{
    is_p2sh, OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160, OP_PUSHDATA1, OP_RETURN,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    OpReturn,
    Unknown,
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2sh(script) {
        return ScriptType::P2Sh;
    }
    if is_p2pkh(script) {
        return ScriptType::P2Pkh;
    }
    if is_p2pk(script) {
        return ScriptType::P2Pk;
    }
    if script.first().copied() == Some(OP_RETURN) {
        return ScriptType::OpReturn;
    }
    ScriptType::Unknown
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2pk(script: &[u8]) -> bool {
    match script.first().copied() {
        Some(33) | Some(65) => {
            script.len() == script[0] as usize + 2 && script.last().copied() == Some(OP_CHECKSIG)
        }
        _ => false,
    }
}

/// An OP_RETURN output with at most one push of `max_bytes` data.
pub fn is_standard_op_return(script: &[u8], max_bytes: usize) -> bool {
    if script.first().copied() != Some(OP_RETURN) {
        return false;
    }
    if script.len() == 1 {
        return true;
    }
    let opcode = script[1];
    let (len, header) = match opcode {
        0x01..=0x4b => (opcode as usize, 2),
        OP_PUSHDATA1 => match script.get(2) {
            Some(byte) => (*byte as usize, 3),
            None => return false,
        },
        _ => return false,
    };
    len <= max_bytes && header + len == script.len()
}
