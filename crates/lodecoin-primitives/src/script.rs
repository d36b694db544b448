//! Script and witness programs.
//!
//! Scripts are opaque byte programs; this module provides the structural
//! views the engine needs: output-template classification, signature
//! operation counting, and verification of the standard spend forms.

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::hash::hash160;
use crate::transaction::{SigVersion, SighashCache, Transaction};
use bitflags::bitflags;
use secp256k1::{All, Message, Secp256k1};
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

pub(crate) static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// Opcodes the engine dispatches on.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CODESEPARATOR: u8 = 0xab;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
}

use opcodes::*;

/// Maximum number of public keys in a CHECKMULTISIG.
const MAX_MULTISIG_PUBKEYS: usize = 20;

bitflags! {
    /// Script verification flags.
    ///
    /// Bit positions follow Bitcoin Core's interpreter flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VerifyFlags: u32 {
        const NONE = 0;
        const P2SH = 1 << 0;
        const WITNESS = 1 << 11;
        /// The flags every connected block is verified with.
        const STANDARD = Self::P2SH.bits() | Self::WITNESS.bits();
    }
}

/// Script verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("malformed push in script")]
    MalformedPush,
    #[error("unsupported script form")]
    UnsupportedScript,
    #[error("script signature is not the expected push data")]
    BadScriptSig,
    #[error("unexpected witness items on a non-witness spend")]
    WitnessUnexpected,
    #[error("invalid witness stack")]
    BadWitness,
    #[error("script signature must be empty for a witness key spend")]
    WitnessMalleated,
    #[error("witness public key does not match the committed program")]
    WitnessProgramMismatch,
    #[error("public key does not match the committed hash")]
    PubkeyHashMismatch,
    #[error("redeem script does not match the script hash")]
    RedeemMismatch,
    #[error("invalid signature encoding")]
    BadSignatureEncoding,
    #[error("invalid public key encoding")]
    BadPublicKey,
    #[error("signature check failed")]
    InvalidSignature,
}

/// A single parsed script instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Op(u8),
    Push(&'a [u8]),
}

/// Reads the instruction at `pos`. Returns the opcode byte, the range of its
/// push payload (empty for plain opcodes) and the position after it.
fn read_op(data: &[u8], pos: usize) -> Option<Result<(u8, Range<usize>, usize), ScriptError>> {
    let opcode = *data.get(pos)?;
    let result = match opcode {
        0x01..=0x4b => {
            let len = opcode as usize;
            let start = pos + 1;
            match start.checked_add(len) {
                Some(end) if end <= data.len() => Ok((opcode, start..end, end)),
                _ => Err(ScriptError::MalformedPush),
            }
        }
        OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
            let lensize = match opcode {
                OP_PUSHDATA1 => 1,
                OP_PUSHDATA2 => 2,
                _ => 4,
            };
            if pos + 1 + lensize > data.len() {
                return Some(Err(ScriptError::MalformedPush));
            }
            let mut len = 0usize;
            for i in 0..lensize {
                len |= (data[pos + 1 + i] as usize) << (8 * i);
            }
            let start = pos + 1 + lensize;
            match start.checked_add(len) {
                Some(end) if end <= data.len() => Ok((opcode, start..end, end)),
                _ => Err(ScriptError::MalformedPush),
            }
        }
        _ => Ok((opcode, pos..pos, pos + 1)),
    };
    Some(result)
}

/// Iterator over script instructions.
pub struct Instructions<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_op(self.data, self.pos)? {
            Ok((opcode, payload, next)) => {
                self.pos = next;
                if (0x01..=OP_PUSHDATA4).contains(&opcode) {
                    Some(Ok(Instruction::Push(&self.data[payload])))
                } else {
                    Some(Ok(Instruction::Op(opcode)))
                }
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// An opaque byte program.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Script(Vec<u8>);

impl Script {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            data: &self.0,
            pos: 0,
            done: false,
        }
    }

    fn push_data(buf: &mut Vec<u8>, data: &[u8]) {
        match data.len() {
            0..=0x4b => buf.push(data.len() as u8),
            0x4c..=0xff => {
                buf.push(OP_PUSHDATA1);
                buf.push(data.len() as u8);
            }
            0x100..=0xffff => {
                buf.push(OP_PUSHDATA2);
                buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
            _ => {
                buf.push(OP_PUSHDATA4);
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
            }
        }
        buf.extend_from_slice(data);
    }

    /// Builds a script out of raw push elements.
    pub fn from_pushes<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut buf = Vec::new();
        for item in items {
            Self::push_data(&mut buf, item);
        }
        Self(buf)
    }

    /// `<pubkey> OP_CHECKSIG`
    pub fn p2pk(pubkey: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(pubkey.len() + 2);
        Self::push_data(&mut buf, pubkey);
        buf.push(OP_CHECKSIG);
        Self(buf)
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh(hash: &[u8; 20]) -> Self {
        let mut buf = Vec::with_capacity(25);
        buf.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
        buf.extend_from_slice(hash);
        buf.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(buf)
    }

    /// `OP_HASH160 <hash> OP_EQUAL`
    pub fn p2sh(hash: &[u8; 20]) -> Self {
        let mut buf = Vec::with_capacity(23);
        buf.extend_from_slice(&[OP_HASH160, 20]);
        buf.extend_from_slice(hash);
        buf.push(OP_EQUAL);
        Self(buf)
    }

    /// `OP_0 <20-byte-key-hash>`
    pub fn p2wpkh(hash: &[u8; 20]) -> Self {
        let mut buf = Vec::with_capacity(22);
        buf.extend_from_slice(&[OP_0, 20]);
        buf.extend_from_slice(hash);
        Self(buf)
    }

    pub fn as_p2pk(&self) -> Option<&[u8]> {
        let b = &self.0;
        if b.len() == 35 && b[0] == 33 && b[34] == OP_CHECKSIG && (b[1] == 0x02 || b[1] == 0x03) {
            Some(&b[1..34])
        } else if b.len() == 67 && b[0] == 65 && b[66] == OP_CHECKSIG && b[1] == 0x04 {
            Some(&b[1..66])
        } else {
            None
        }
    }

    pub fn as_p2pkh(&self) -> Option<[u8; 20]> {
        let b = &self.0;
        if b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
        {
            Some(b[3..23].try_into().expect("length checked"))
        } else {
            None
        }
    }

    pub fn as_p2sh(&self) -> Option<[u8; 20]> {
        let b = &self.0;
        if b.len() == 23 && b[0] == OP_HASH160 && b[1] == 20 && b[22] == OP_EQUAL {
            Some(b[2..22].try_into().expect("length checked"))
        } else {
            None
        }
    }

    pub fn as_p2wpkh(&self) -> Option<[u8; 20]> {
        match self.witness_program() {
            Some((0, program)) if program.len() == 20 => {
                Some(program.try_into().expect("length checked"))
            }
            _ => None,
        }
    }

    pub fn is_p2sh(&self) -> bool {
        self.as_p2sh().is_some()
    }

    /// Returns `(version, program)` when the script is a witness program.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        let b = &self.0;
        if b.len() < 4 || b.len() > 42 {
            return None;
        }
        let version = match b[0] {
            OP_0 => 0,
            op @ OP_1..=OP_16 => op - OP_1 + 1,
            _ => return None,
        };
        if b[1] as usize != b.len() - 2 {
            return None;
        }
        Some((version, &b[2..]))
    }

    /// Copy of the script with every `OP_CODESEPARATOR` removed, preserving
    /// the original encoding of all other instructions. A malformed tail is
    /// copied through unchanged.
    pub fn remove_separators(&self) -> Script {
        let mut out = Vec::with_capacity(self.0.len());
        let mut pos = 0;
        while let Some(op) = read_op(&self.0, pos) {
            match op {
                Ok((opcode, _, next)) => {
                    if opcode != OP_CODESEPARATOR {
                        out.extend_from_slice(&self.0[pos..next]);
                    }
                    pos = next;
                }
                Err(_) => break,
            }
        }
        out.extend_from_slice(&self.0[pos..]);
        Script(out)
    }

    /// The last push element, used to extract a redeem script out of a
    /// script-sig. `None` when the script is not push-only.
    pub fn last_push(&self) -> Option<&[u8]> {
        let mut last = None;
        for instruction in self.instructions() {
            match instruction {
                Ok(Instruction::Push(data)) => last = Some(data),
                Ok(Instruction::Op(OP_0)) => last = Some(&[] as &[u8]),
                _ => return None,
            }
        }
        last
    }

    /// Counts legacy signature operations.
    ///
    /// `accurate` resolves `OP_CHECKMULTISIG` preceded by a small-integer
    /// key count to that count instead of the 20-key worst case.
    pub fn sigops(&self, accurate: bool) -> usize {
        let mut total = 0;
        let mut last_opcode = None;
        for instruction in self.instructions() {
            match instruction {
                Ok(Instruction::Op(op)) => {
                    match op {
                        OP_CHECKSIG | OP_CHECKSIGVERIFY => total += 1,
                        OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                            total += match last_opcode {
                                Some(n @ OP_1..=OP_16) if accurate => (n - OP_1 + 1) as usize,
                                _ => MAX_MULTISIG_PUBKEYS,
                            };
                        }
                        _ => {}
                    }
                    last_opcode = Some(op);
                }
                Ok(Instruction::Push(_)) => last_opcode = None,
                // Count what parsed; the rest of the script is unexecutable.
                Err(_) => break,
            }
        }
        total
    }

    /// Signature operations of the redeem script carried by `script_sig`
    /// when this script is pay-to-script-hash.
    pub fn p2sh_sigops(&self, script_sig: &Script) -> usize {
        if !self.is_p2sh() {
            return self.sigops(true);
        }
        match script_sig.last_push() {
            Some(redeem) => Script::from_bytes(redeem.to_vec()).sigops(true),
            None => 0,
        }
    }

    /// Witness signature operations of a spend of this output.
    pub fn witness_sigops(&self, script_sig: &Script, witness: &Witness) -> usize {
        if let Some((version, program)) = self.witness_program() {
            return witness_program_sigops(version, program.len(), witness);
        }
        if self.is_p2sh() {
            if let Some(redeem) = script_sig.last_push() {
                let redeem = Script::from_bytes(redeem.to_vec());
                if let Some((version, program)) = redeem.witness_program() {
                    return witness_program_sigops(version, program.len(), witness);
                }
            }
        }
        0
    }
}

fn witness_program_sigops(version: u8, program_len: usize, witness: &Witness) -> usize {
    if version != 0 {
        return 0;
    }
    match program_len {
        20 => 1,
        32 => match witness.last() {
            Some(witness_script) => Script::from_bytes(witness_script.to_vec()).sigops(true),
            None => 0,
        },
        _ => 0,
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

impl Encodable for Script {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        codec::write_compact_size(buf, self.0.len() as u64);
        buf.extend_from_slice(&self.0);
    }
}

impl Decodable for Script {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let len = r.read_compact_size()?;
        let len = r.check_count(len, 1)?;
        Ok(Self(r.read_bytes(len)?.to_vec()))
    }
}

/// A witness: a stack of byte vectors attached to an input.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Witness(Vec<Vec<u8>>);

impl Witness {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_items(items: Vec<Vec<u8>>) -> Self {
        Self(items)
    }

    pub fn push(&mut self, item: Vec<u8>) {
        self.0.push(item);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.0.get(index).map(Vec::as_slice)
    }

    pub fn last(&self) -> Option<&[u8]> {
        self.0.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(Vec::as_slice)
    }

    /// Serialized size of the witness stack.
    pub fn encoded_size(&self) -> usize {
        codec::compact_size_len(self.0.len() as u64)
            + self
                .0
                .iter()
                .map(|item| codec::compact_size_len(item.len() as u64) + item.len())
                .sum::<usize>()
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for item in &self.0 {
            list.entry(&hex::encode(item));
        }
        list.finish()
    }
}

impl Encodable for Witness {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        codec::write_compact_size(buf, self.0.len() as u64);
        for item in &self.0 {
            codec::write_compact_size(buf, item.len() as u64);
            buf.extend_from_slice(item);
        }
    }
}

impl Decodable for Witness {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let count = r.read_compact_size()?;
        let count = r.check_count(count, 1)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let len = r.read_compact_size()?;
            let len = r.check_count(len, 1)?;
            items.push(r.read_bytes(len)?.to_vec());
        }
        Ok(Self(items))
    }
}

/// Verifies one input spend of `script_pubkey`.
///
/// Covers the standard output forms (p2pk, p2pkh, p2wpkh and p2sh-wrapped
/// p2wpkh); any other program is reported as [`ScriptError::UnsupportedScript`].
#[allow(clippy::too_many_arguments)]
pub fn verify_script(
    script_sig: &Script,
    witness: &Witness,
    script_pubkey: &Script,
    tx: &Transaction,
    index: usize,
    value: i64,
    flags: VerifyFlags,
    cache: &mut SighashCache,
) -> Result<(), ScriptError> {
    if let Some(pubkey) = script_pubkey.as_p2pk() {
        if !witness.is_empty() {
            return Err(ScriptError::WitnessUnexpected);
        }
        let sig = only_push(script_sig)?;
        return check_sig(
            tx,
            index,
            sig,
            pubkey,
            script_pubkey,
            value,
            SigVersion::Base,
            cache,
        );
    }

    if let Some(hash) = script_pubkey.as_p2pkh() {
        if !witness.is_empty() {
            return Err(ScriptError::WitnessUnexpected);
        }
        let (sig, pubkey) = two_pushes(script_sig)?;
        if hash160(pubkey) != hash {
            return Err(ScriptError::PubkeyHashMismatch);
        }
        return check_sig(
            tx,
            index,
            sig,
            pubkey,
            script_pubkey,
            value,
            SigVersion::Base,
            cache,
        );
    }

    if let Some(program) = script_pubkey.as_p2wpkh() {
        if !flags.contains(VerifyFlags::WITNESS) {
            // Pre-segwit rules: a bare v0 program is anyone-can-spend.
            return Ok(());
        }
        if !script_sig.is_empty() {
            return Err(ScriptError::WitnessMalleated);
        }
        return verify_p2wpkh(tx, index, witness, &program, value, cache);
    }

    if let Some(script_hash) = script_pubkey.as_p2sh() {
        let redeem = only_push(script_sig)?;
        if hash160(redeem) != script_hash {
            return Err(ScriptError::RedeemMismatch);
        }
        if !flags.contains(VerifyFlags::P2SH) {
            // Pre-BIP16 rules: the redeem push alone satisfies the hash.
            return Ok(());
        }
        let redeem = Script::from_bytes(redeem.to_vec());
        if let Some(program) = redeem.as_p2wpkh() {
            if !flags.contains(VerifyFlags::WITNESS) {
                return Ok(());
            }
            return verify_p2wpkh(tx, index, witness, &program, value, cache);
        }
        return Err(ScriptError::UnsupportedScript);
    }

    Err(ScriptError::UnsupportedScript)
}

fn verify_p2wpkh(
    tx: &Transaction,
    index: usize,
    witness: &Witness,
    program: &[u8; 20],
    value: i64,
    cache: &mut SighashCache,
) -> Result<(), ScriptError> {
    if witness.len() != 2 {
        return Err(ScriptError::BadWitness);
    }
    let sig = witness.get(0).expect("length checked");
    let pubkey = witness.get(1).expect("length checked");
    if hash160(pubkey) != *program {
        return Err(ScriptError::WitnessProgramMismatch);
    }
    // BIP 143: the script code is the canonical p2pkh over the program.
    let script_code = Script::p2pkh(program);
    check_sig(
        tx,
        index,
        sig,
        pubkey,
        &script_code,
        value,
        SigVersion::WitnessV0,
        cache,
    )
}

fn only_push(script: &Script) -> Result<&[u8], ScriptError> {
    let mut instructions = script.instructions();
    let data = match instructions.next() {
        Some(Ok(Instruction::Push(data))) => data,
        _ => return Err(ScriptError::BadScriptSig),
    };
    if instructions.next().is_some() {
        return Err(ScriptError::BadScriptSig);
    }
    Ok(data)
}

fn two_pushes(script: &Script) -> Result<(&[u8], &[u8]), ScriptError> {
    let mut instructions = script.instructions();
    let first = match instructions.next() {
        Some(Ok(Instruction::Push(data))) => data,
        _ => return Err(ScriptError::BadScriptSig),
    };
    let second = match instructions.next() {
        Some(Ok(Instruction::Push(data))) => data,
        _ => return Err(ScriptError::BadScriptSig),
    };
    if instructions.next().is_some() {
        return Err(ScriptError::BadScriptSig);
    }
    Ok((first, second))
}

#[allow(clippy::too_many_arguments)]
fn check_sig(
    tx: &Transaction,
    index: usize,
    sig: &[u8],
    pubkey: &[u8],
    script_code: &Script,
    value: i64,
    sig_version: SigVersion,
    cache: &mut SighashCache,
) -> Result<(), ScriptError> {
    let (sig, sighash_type) = parse_signature(sig)?;
    let pubkey =
        secp256k1::PublicKey::from_slice(pubkey).map_err(|_| ScriptError::BadPublicKey)?;
    let digest = tx.signature_hash(
        index,
        script_code,
        value,
        sighash_type,
        sig_version,
        Some(cache),
    );
    let msg = Message::from_digest(digest.to_byte_array());
    SECP.verify_ecdsa(&msg, &sig, &pubkey).map_err(|err| {
        tracing::trace!(?err, input = index, "signature check failed");
        ScriptError::InvalidSignature
    })
}

/// Splits `der-signature ‖ sighash-type-byte`.
fn parse_signature(sig: &[u8]) -> Result<(secp256k1::ecdsa::Signature, u32), ScriptError> {
    let (sighash_type, der) = match sig.split_last() {
        Some((last, der)) => (u32::from(*last), der),
        None => return Err(ScriptError::BadSignatureEncoding),
    };
    let sig = secp256k1::ecdsa::Signature::from_der(der)
        .map_err(|_| ScriptError::BadSignatureEncoding)?;
    Ok((sig, sighash_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let hash = [0x11u8; 20];
        assert_eq!(Script::p2pkh(&hash).as_p2pkh(), Some(hash));
        assert_eq!(Script::p2sh(&hash).as_p2sh(), Some(hash));
        assert_eq!(Script::p2wpkh(&hash).as_p2wpkh(), Some(hash));
        assert!(Script::p2pkh(&hash).as_p2sh().is_none());

        let mut pubkey = [0x02u8; 33].to_vec();
        pubkey[1] = 0x7f;
        assert_eq!(Script::p2pk(&pubkey).as_p2pk(), Some(pubkey.as_slice()));
    }

    #[test]
    fn witness_program_detection() {
        let p2wpkh = Script::p2wpkh(&[0x22; 20]);
        assert_eq!(p2wpkh.witness_program().map(|(v, p)| (v, p.len())), Some((0, 20)));

        let mut v1 = vec![OP_1, 32];
        v1.extend_from_slice(&[0u8; 32]);
        assert_eq!(
            Script::from_bytes(v1).witness_program().map(|(v, p)| (v, p.len())),
            Some((1, 32))
        );
    }

    #[test]
    fn strips_code_separators() {
        let mut bytes = vec![OP_CODESEPARATOR];
        bytes.extend_from_slice(Script::p2pkh(&[0x33; 20]).as_bytes());
        bytes.push(OP_CODESEPARATOR);
        let stripped = Script::from_bytes(bytes).remove_separators();
        assert_eq!(stripped, Script::p2pkh(&[0x33; 20]));

        // A push containing the separator byte is left alone.
        let script = Script::from_pushes([&[OP_CODESEPARATOR][..]]);
        assert_eq!(script.remove_separators(), script);
    }

    #[test]
    fn sigop_counting() {
        assert_eq!(Script::p2pkh(&[0; 20]).sigops(false), 1);

        // 2-of-3 bare multisig.
        let multisig = {
            let mut bytes = vec![OP_1 + 1];
            for _ in 0..3 {
                bytes.push(33);
                bytes.extend_from_slice(&[0x02; 33]);
            }
            bytes.push(OP_1 + 2);
            bytes.push(OP_CHECKMULTISIG);
            Script::from_bytes(bytes)
        };
        assert_eq!(multisig.sigops(true), 3);
        assert_eq!(multisig.sigops(false), MAX_MULTISIG_PUBKEYS);
    }

    #[test]
    fn p2sh_sigops_use_redeem_script() {
        let redeem = Script::p2pkh(&[0x44; 20]);
        let script_sig = Script::from_pushes([redeem.as_bytes()]);
        let spk = Script::p2sh(&hash160(redeem.as_bytes()));
        assert_eq!(spk.p2sh_sigops(&script_sig), 1);
        assert_eq!(spk.p2sh_sigops(&Script::new()), 0);
    }

    #[test]
    fn witness_sigops() {
        let spk = Script::p2wpkh(&[0x55; 20]);
        assert_eq!(spk.witness_sigops(&Script::new(), &Witness::new()), 1);

        let program = Script::p2wpkh(&[0x66; 20]);
        let spk = Script::p2sh(&hash160(program.as_bytes()));
        let script_sig = Script::from_pushes([program.as_bytes()]);
        assert_eq!(spk.witness_sigops(&script_sig, &Witness::new()), 1);
    }

    #[test]
    fn last_push_requires_push_only() {
        let redeem = [0xaa; 4];
        let script_sig = Script::from_pushes([&[0x01][..], &redeem[..]]);
        assert_eq!(script_sig.last_push(), Some(&redeem[..]));

        let mut bytes = script_sig.into_bytes();
        bytes.push(OP_DUP);
        assert_eq!(Script::from_bytes(bytes).last_push(), None);
    }
}
