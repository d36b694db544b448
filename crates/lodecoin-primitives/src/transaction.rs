//! Transaction model: wire codec, signature hashing, verification and
//! signing of the standard output forms, and the contextual consensus
//! checks.

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::coin::Coin;
use crate::consensus::{
    BYTES_PER_SIGOP, COINBASE_MATURITY, LOCKTIME_THRESHOLD, MAX_BLOCK_SIZE,
    MAX_COINBASE_SCRIPT_LEN, MAX_MONEY, MIN_COINBASE_SCRIPT_LEN, SEQUENCE_DISABLE_FLAG,
    SEQUENCE_FINAL, SEQUENCE_MASK, SEQUENCE_TYPE_FLAG, WITNESS_SCALE_FACTOR,
};
use crate::hash::{hash160, Hash256};
use crate::script::{verify_script, Script, ScriptError, VerifyFlags, Witness, SECP};
use crate::view::View;
use secp256k1::{Message, PublicKey, SecretKey};
use std::collections::HashSet;
use std::fmt;

/// Signature hash type constants.
pub mod sighash {
    pub const ALL: u32 = 0x01;
    pub const NONE: u32 = 0x02;
    pub const SINGLE: u32 = 0x03;
    pub const ANYONECANPAY: u32 = 0x80;

    /// Mask selecting the output-handling mode of a hash type.
    pub const OUTPUT_MASK: u32 = 0x1f;
}

/// Signature hashing scheme for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigVersion {
    /// Legacy sighash, used by bare and P2SH-redeemed scripts.
    Base,
    /// BIP 143 sighash, used by version-0 witness programs.
    WitnessV0,
}

/// Memoized BIP 143 sub-hashes, shared across the signatures of one
/// transaction.
#[derive(Debug, Default)]
pub struct SighashCache {
    pub prevouts: Option<Hash256>,
    pub sequences: Option<Hash256>,
    pub outputs: Option<Hash256>,
}

/// A reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The coinbase marker: all-zero txid, index `0xffffffff`.
    pub const fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.vout == u32::MAX && self.txid.is_zero()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl Encodable for OutPoint {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.txid.as_bytes());
        buf.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let txid = Hash256::from_byte_array(r.read_array()?);
        let vout = r.read_u32()?;
        Ok(Self { txid, vout })
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::null()
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Witness,
}

impl TxIn {
    fn encoded_size(&self) -> usize {
        36 + codec::compact_size_len(self.script_sig.len() as u64) + self.script_sig.len() + 4
    }
}

// The witness is not part of the input encoding; it travels in the witness
// section of the transaction.
impl Encodable for TxIn {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.previous_output.encode_into(buf);
        self.script_sig.encode_into(buf);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
    }
}

impl Decodable for TxIn {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        Ok(Self {
            previous_output: OutPoint::decode(r)?,
            script_sig: Script::decode(r)?,
            sequence: r.read_u32()?,
            witness: Witness::new(),
        })
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOut {
    /// Value in satoshis.
    pub value: i64,
    pub script_pubkey: Script,
}

impl TxOut {
    fn encoded_size(&self) -> usize {
        8 + codec::compact_size_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Encodable for TxOut {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        self.script_pubkey.encode_into(buf);
    }
}

impl Decodable for TxOut {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        Ok(Self {
            value: r.read_i64()?,
            script_pubkey: Script::decode(r)?,
        })
    }
}

/// Contextual and context-free consensus failures, carrying the reject
/// reason and misbehavior score the peer layer reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("transaction has no inputs")]
    VinEmpty,
    #[error("transaction has no outputs")]
    VoutEmpty,
    #[error("transaction exceeds the maximum block size")]
    Oversize,
    #[error("output value is negative")]
    VoutNegative,
    #[error("output value exceeds the money supply")]
    VoutTooLarge,
    #[error("total output value exceeds the money supply")]
    TxoutTotalTooLarge,
    #[error("transaction spends the same outpoint twice")]
    InputsDuplicate,
    #[error("coinbase script length out of range")]
    BadCoinbaseLength,
    #[error("non-coinbase input refers to a null previous output")]
    PrevoutNull,
    #[error("input spends a missing or already spent coin")]
    MissingOrSpent,
    #[error("coinbase output spent before maturity")]
    PrematureCoinbaseSpend,
    #[error("input values out of range")]
    InputValuesOutOfRange,
    #[error("total input value below total output value")]
    InBelowOut,
    #[error("fee is negative")]
    FeeNegative,
    #[error("fee exceeds the money supply")]
    FeeOutOfRange,
}

impl TxError {
    /// Reject reason reported to peers.
    pub fn reject_reason(&self) -> &'static str {
        match self {
            Self::VinEmpty => "bad-txns-vin-empty",
            Self::VoutEmpty => "bad-txns-vout-empty",
            Self::Oversize => "bad-txns-oversize",
            Self::VoutNegative => "bad-txns-vout-negative",
            Self::VoutTooLarge => "bad-txns-vout-toolarge",
            Self::TxoutTotalTooLarge => "bad-txns-txouttotal-toolarge",
            Self::InputsDuplicate => "bad-txns-inputs-duplicate",
            Self::BadCoinbaseLength => "bad-cb-length",
            Self::PrevoutNull => "bad-txns-prevout-null",
            Self::MissingOrSpent => "bad-txns-inputs-missingorspent",
            Self::PrematureCoinbaseSpend => "bad-txns-premature-spend-of-coinbase",
            Self::InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            Self::InBelowOut => "bad-txns-in-belowout",
            Self::FeeNegative => "bad-txns-fee-negative",
            Self::FeeOutOfRange => "bad-txns-fee-outofrange",
        }
    }

    /// Misbehavior score charged to the relaying peer.
    pub fn score(&self) -> u32 {
        match self {
            Self::PrevoutNull => 10,
            Self::MissingOrSpent | Self::PrematureCoinbaseSpend => 0,
            _ => 100,
        }
    }
}

/// Full-transaction verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("input {index} spends missing or spent coin {outpoint}")]
    MissingCoin { index: usize, outpoint: OutPoint },
    #[error("input {index} failed script verification: {source}")]
    Script { index: usize, source: ScriptError },
}

/// Signing failure for [`Transaction::sign_input`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("key does not control the previous output")]
    KeyMismatch,
    #[error("previous output script is not a supported form")]
    UnsupportedScript,
}

/// A bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub input: Vec<TxIn>,
    pub output: Vec<TxOut>,
    pub lock_time: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 1,
            input: Vec::new(),
            output: Vec::new(),
            lock_time: 0,
        }
    }
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.input.len() == 1 && self.input[0].previous_output.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.input.iter().any(|input| !input.witness.is_empty())
    }

    fn digest(&self, witness: bool) -> Hash256 {
        let mut buf = Vec::with_capacity(self.total_size());
        self.encode_with(&mut buf, witness);
        Hash256::hash(&buf)
    }

    /// Hash of the legacy (witness-less) encoding.
    pub fn txid(&self) -> Hash256 {
        self.digest(false)
    }

    /// Hash of the full encoding; equals [`Self::txid`] when no input
    /// carries a witness.
    pub fn wtxid(&self) -> Hash256 {
        self.digest(true)
    }

    fn encode_with(&self, buf: &mut Vec<u8>, witness: bool) {
        let witness = witness && self.has_witness();

        buf.extend_from_slice(&self.version.to_le_bytes());

        if witness {
            buf.push(0x00);
            buf.push(0x01);
        }

        codec::write_compact_size(buf, self.input.len() as u64);
        for input in &self.input {
            input.encode_into(buf);
        }

        codec::write_compact_size(buf, self.output.len() as u64);
        for output in &self.output {
            output.encode_into(buf);
        }

        if witness {
            for input in &self.input {
                input.witness.encode_into(buf);
            }
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Encodes the legacy (witness-less) form.
    pub fn encode_base(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.base_size());
        self.encode_with(&mut buf, false);
        buf
    }

    /// Serialized size excluding witness data.
    pub fn base_size(&self) -> usize {
        4 + codec::compact_size_len(self.input.len() as u64)
            + self.input.iter().map(TxIn::encoded_size).sum::<usize>()
            + codec::compact_size_len(self.output.len() as u64)
            + self.output.iter().map(TxOut::encoded_size).sum::<usize>()
            + 4
    }

    /// Serialized size of the witness section, including marker and flag.
    /// Zero when no input carries a witness.
    pub fn witness_size(&self) -> usize {
        if !self.has_witness() {
            return 0;
        }
        2 + self
            .input
            .iter()
            .map(|input| input.witness.encoded_size())
            .sum::<usize>()
    }

    pub fn total_size(&self) -> usize {
        self.base_size() + self.witness_size()
    }

    /// BIP 141 weight: four units per base byte, one per witness byte.
    pub fn weight(&self) -> usize {
        self.base_size() * WITNESS_SCALE_FACTOR + self.witness_size()
    }

    /// Virtual size: weight rounded up to whole virtual bytes.
    pub fn vsize(&self) -> usize {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// Computes the digest an input signature commits to.
    ///
    /// `prev_script` is the script code of the spent output, `value` its
    /// amount (only used by BIP 143). The legacy scheme ignores `cache`.
    pub fn signature_hash(
        &self,
        index: usize,
        prev_script: &Script,
        value: i64,
        sighash_type: u32,
        sig_version: SigVersion,
        cache: Option<&mut SighashCache>,
    ) -> Hash256 {
        match sig_version {
            SigVersion::Base => self.sighash_v0(index, prev_script, sighash_type),
            SigVersion::WitnessV0 => {
                self.sighash_v1(index, prev_script, value, sighash_type, cache)
            }
        }
    }

    fn sighash_v0(&self, index: usize, prev_script: &Script, sighash_type: u32) -> Hash256 {
        if sighash_type & sighash::OUTPUT_MASK == sighash::SINGLE && index >= self.output.len() {
            // Old bitcoind returned 1 as an error code here; the "error
            // code" ended up being signed as a hash and is now consensus.
            let mut bug = [0u8; 32];
            bug[0] = 0x01;
            return Hash256::from_byte_array(bug);
        }

        let prev = prev_script.remove_separators();
        let mut buf = Vec::with_capacity(self.base_size() + prev.len());

        buf.extend_from_slice(&self.version.to_le_bytes());

        if sighash_type & sighash::ANYONECANPAY != 0 {
            // Commit to the signed input only.
            let input = &self.input[index];
            codec::write_compact_size(&mut buf, 1);
            input.previous_output.encode_into(&mut buf);
            prev.encode_into(&mut buf);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        } else {
            codec::write_compact_size(&mut buf, self.input.len() as u64);
            for (i, input) in self.input.iter().enumerate() {
                input.previous_output.encode_into(&mut buf);

                if i == index {
                    prev.encode_into(&mut buf);
                    buf.extend_from_slice(&input.sequence.to_le_bytes());
                    continue;
                }

                // Scripts of other inputs are blanked; their sequences are
                // zeroed under NONE and SINGLE.
                codec::write_compact_size(&mut buf, 0);
                let sequence = match sighash_type & sighash::OUTPUT_MASK {
                    sighash::NONE | sighash::SINGLE => 0,
                    _ => input.sequence,
                };
                buf.extend_from_slice(&sequence.to_le_bytes());
            }
        }

        match sighash_type & sighash::OUTPUT_MASK {
            sighash::NONE => {
                codec::write_compact_size(&mut buf, 0);
            }
            sighash::SINGLE => {
                // Outputs truncated to the signed index; earlier slots are
                // nulled out.
                codec::write_compact_size(&mut buf, index as u64 + 1);
                for _ in 0..index {
                    buf.extend_from_slice(&(-1i64).to_le_bytes());
                    codec::write_compact_size(&mut buf, 0);
                }
                self.output[index].encode_into(&mut buf);
            }
            _ => {
                codec::write_compact_size(&mut buf, self.output.len() as u64);
                for output in &self.output {
                    output.encode_into(&mut buf);
                }
            }
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&sighash_type.to_le_bytes());

        Hash256::hash(&buf)
    }

    fn sighash_v1(
        &self,
        index: usize,
        prev_script: &Script,
        value: i64,
        sighash_type: u32,
        mut cache: Option<&mut SighashCache>,
    ) -> Hash256 {
        let input = &self.input[index];
        let anyone_can_pay = sighash_type & sighash::ANYONECANPAY != 0;
        let output_mode = sighash_type & sighash::OUTPUT_MASK;

        let mut prevouts = Hash256::ZERO;
        let mut sequences = Hash256::ZERO;
        let mut outputs = Hash256::ZERO;

        if !anyone_can_pay {
            prevouts = match cache.as_ref().and_then(|c| c.prevouts) {
                Some(hash) => hash,
                None => {
                    let mut buf = Vec::with_capacity(self.input.len() * 36);
                    for input in &self.input {
                        input.previous_output.encode_into(&mut buf);
                    }
                    let hash = Hash256::hash(&buf);
                    if let Some(c) = cache.as_deref_mut() {
                        c.prevouts = Some(hash);
                    }
                    hash
                }
            };
        }

        if !anyone_can_pay && output_mode != sighash::SINGLE && output_mode != sighash::NONE {
            sequences = match cache.as_ref().and_then(|c| c.sequences) {
                Some(hash) => hash,
                None => {
                    let mut buf = Vec::with_capacity(self.input.len() * 4);
                    for input in &self.input {
                        buf.extend_from_slice(&input.sequence.to_le_bytes());
                    }
                    let hash = Hash256::hash(&buf);
                    if let Some(c) = cache.as_deref_mut() {
                        c.sequences = Some(hash);
                    }
                    hash
                }
            };
        }

        if output_mode != sighash::SINGLE && output_mode != sighash::NONE {
            outputs = match cache.as_ref().and_then(|c| c.outputs) {
                Some(hash) => hash,
                None => {
                    let mut buf = Vec::new();
                    for output in &self.output {
                        output.encode_into(&mut buf);
                    }
                    let hash = Hash256::hash(&buf);
                    if let Some(c) = cache.as_deref_mut() {
                        c.outputs = Some(hash);
                    }
                    hash
                }
            };
        } else if output_mode == sighash::SINGLE && index < self.output.len() {
            let mut buf = Vec::new();
            self.output[index].encode_into(&mut buf);
            outputs = Hash256::hash(&buf);
        }

        let mut buf = Vec::with_capacity(156 + prev_script.len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(prevouts.as_bytes());
        buf.extend_from_slice(sequences.as_bytes());
        input.previous_output.encode_into(&mut buf);
        prev_script.encode_into(&mut buf);
        buf.extend_from_slice(&value.to_le_bytes());
        buf.extend_from_slice(&input.sequence.to_le_bytes());
        buf.extend_from_slice(outputs.as_bytes());
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&sighash_type.to_le_bytes());

        Hash256::hash(&buf)
    }

    /// Verifies every input against the coins in `view`.
    pub fn verify(&self, view: &View, flags: VerifyFlags) -> Result<(), VerifyError> {
        let mut cache = SighashCache::default();

        for (index, input) in self.input.iter().enumerate() {
            let coin = view
                .get(&input.previous_output)
                .ok_or(VerifyError::MissingCoin {
                    index,
                    outpoint: input.previous_output,
                })?;

            self.verify_input(index, &coin.output, flags, &mut cache)
                .map_err(|source| VerifyError::Script { index, source })?;
        }

        Ok(())
    }

    /// Verifies a single input against the output it spends.
    pub fn verify_input(
        &self,
        index: usize,
        coin: &TxOut,
        flags: VerifyFlags,
        cache: &mut SighashCache,
    ) -> Result<(), ScriptError> {
        let input = &self.input[index];
        verify_script(
            &input.script_sig,
            &input.witness,
            &coin.script_pubkey,
            self,
            index,
            coin.value,
            flags,
            cache,
        )
    }

    /// Signs input `index` spending `coin` with `secret_key`.
    ///
    /// Supports the standard forms: p2pk (either key encoding), p2pkh,
    /// p2wpkh and p2sh-wrapped p2wpkh.
    pub fn sign_input(
        &mut self,
        index: usize,
        coin: &TxOut,
        secret_key: &SecretKey,
        sighash_type: u32,
        mut cache: Option<&mut SighashCache>,
    ) -> Result<(), SignError> {
        let script = &coin.script_pubkey;
        let value = coin.value;

        let pubkey = PublicKey::from_secret_key(&SECP, secret_key);
        let pub_compressed = pubkey.serialize();
        let pub_uncompressed = pubkey.serialize_uncompressed();

        if let Some(expected) = script.as_p2pk() {
            if expected != pub_compressed && expected != pub_uncompressed {
                return Err(SignError::KeyMismatch);
            }

            let digest =
                self.signature_hash(index, script, value, sighash_type, SigVersion::Base, None);
            let sig = sign_digest(secret_key, digest, sighash_type);

            self.input[index].script_sig = Script::from_pushes([sig.as_slice()]);
            return Ok(());
        }

        let hash_compressed = hash160(&pub_compressed);
        let hash_uncompressed = hash160(&pub_uncompressed);

        if let Some(hash) = script.as_p2pkh() {
            let pubkey: &[u8] = if hash == hash_compressed {
                &pub_compressed
            } else if hash == hash_uncompressed {
                &pub_uncompressed
            } else {
                return Err(SignError::KeyMismatch);
            };

            let digest =
                self.signature_hash(index, script, value, sighash_type, SigVersion::Base, None);
            let sig = sign_digest(secret_key, digest, sighash_type);

            self.input[index].script_sig = Script::from_pushes([sig.as_slice(), pubkey]);
            return Ok(());
        }

        if let Some(program) = script.as_p2wpkh() {
            if program != hash_compressed {
                return Err(SignError::KeyMismatch);
            }

            let redeem = Script::p2pkh(&program);
            let digest = self.signature_hash(
                index,
                &redeem,
                value,
                sighash_type,
                SigVersion::WitnessV0,
                cache.as_deref_mut(),
            );
            let sig = sign_digest(secret_key, digest, sighash_type);

            let witness = &mut self.input[index].witness;
            witness.clear();
            witness.push(sig);
            witness.push(pub_compressed.to_vec());
            return Ok(());
        }

        if let Some(script_hash) = script.as_p2sh() {
            let program = Script::p2wpkh(&hash_compressed);
            if hash160(program.as_bytes()) != script_hash {
                return Err(SignError::KeyMismatch);
            }

            self.input[index].script_sig = Script::from_pushes([program.as_bytes()]);

            let redeem = Script::p2pkh(&hash_compressed);
            let digest = self.signature_hash(
                index,
                &redeem,
                value,
                sighash_type,
                SigVersion::WitnessV0,
                cache.as_deref_mut(),
            );
            let sig = sign_digest(secret_key, digest, sighash_type);

            let witness = &mut self.input[index].witness;
            witness.clear();
            witness.push(sig);
            witness.push(pub_compressed.to_vec());
            return Ok(());
        }

        Err(SignError::UnsupportedScript)
    }

    pub fn has_duplicate_inputs(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.input.len());
        self.input
            .iter()
            .any(|input| !seen.insert(input.previous_output))
    }

    /// Context-free consensus checks.
    pub fn check_sanity(&self) -> Result<(), TxError> {
        if self.input.is_empty() {
            return Err(TxError::VinEmpty);
        }

        if self.output.is_empty() {
            return Err(TxError::VoutEmpty);
        }

        if self.base_size() > MAX_BLOCK_SIZE {
            return Err(TxError::Oversize);
        }

        let mut total: i64 = 0;
        for output in &self.output {
            if output.value < 0 {
                return Err(TxError::VoutNegative);
            }
            if output.value > MAX_MONEY {
                return Err(TxError::VoutTooLarge);
            }
            total = total
                .checked_add(output.value)
                .ok_or(TxError::TxoutTotalTooLarge)?;
            if total > MAX_MONEY {
                return Err(TxError::TxoutTotalTooLarge);
            }
        }

        if self.has_duplicate_inputs() {
            return Err(TxError::InputsDuplicate);
        }

        if self.is_coinbase() {
            let len = self.input[0].script_sig.len();
            if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
                return Err(TxError::BadCoinbaseLength);
            }
        } else if self.input.iter().any(|i| i.previous_output.is_null()) {
            return Err(TxError::PrevoutNull);
        }

        Ok(())
    }

    /// Contextual checks of the spent coins: existence, coinbase maturity
    /// and monetary ranges. `height` is the height of the connecting block.
    pub fn check_inputs(&self, view: &View, height: u32) -> Result<(), TxError> {
        let mut total: i64 = 0;

        for input in &self.input {
            let coin = view
                .get(&input.previous_output)
                .ok_or(TxError::MissingOrSpent)?;

            if coin.coinbase {
                let depth = height.checked_sub(coin.height);
                if depth.map_or(true, |depth| depth < COINBASE_MATURITY) {
                    return Err(TxError::PrematureCoinbaseSpend);
                }
            }

            if coin.output.value < 0 || coin.output.value > MAX_MONEY {
                return Err(TxError::InputValuesOutOfRange);
            }

            total = total
                .checked_add(coin.output.value)
                .ok_or(TxError::InputValuesOutOfRange)?;
            if total > MAX_MONEY {
                return Err(TxError::InputValuesOutOfRange);
            }
        }

        // Output overflow was already rejected by check_sanity.
        let value = self.output_value();

        if total < value {
            return Err(TxError::InBelowOut);
        }

        let fee = total - value;
        if fee < 0 {
            return Err(TxError::FeeNegative);
        }
        if fee > MAX_MONEY {
            return Err(TxError::FeeOutOfRange);
        }

        Ok(())
    }

    /// Signature operations in input and output scripts, pre-BIP16 rules.
    pub fn legacy_sigops(&self) -> usize {
        self.input
            .iter()
            .map(|input| input.script_sig.sigops(false))
            .sum::<usize>()
            + self
                .output
                .iter()
                .map(|output| output.script_pubkey.sigops(false))
                .sum::<usize>()
    }

    /// Signature operations in spent P2SH redeem scripts.
    pub fn p2sh_sigops(&self, view: &View) -> usize {
        if self.is_coinbase() {
            return 0;
        }

        self.input
            .iter()
            .filter_map(|input| {
                let coin = view.get(&input.previous_output)?;
                coin.output
                    .script_pubkey
                    .is_p2sh()
                    .then(|| coin.output.script_pubkey.p2sh_sigops(&input.script_sig))
            })
            .sum()
    }

    /// Signature operations in spent witness programs.
    pub fn witness_sigops(&self, view: &View) -> usize {
        if self.is_coinbase() {
            return 0;
        }

        self.input
            .iter()
            .filter_map(|input| {
                let coin = view.get(&input.previous_output)?;
                Some(
                    coin.output
                        .script_pubkey
                        .witness_sigops(&input.script_sig, &input.witness),
                )
            })
            .sum()
    }

    /// Weighted signature operation cost.
    pub fn sigops_cost(&self, view: &View, flags: VerifyFlags) -> usize {
        let mut cost = self.legacy_sigops() * WITNESS_SCALE_FACTOR;

        if flags.contains(VerifyFlags::P2SH) {
            cost += self.p2sh_sigops(view) * WITNESS_SCALE_FACTOR;
        }

        if flags.contains(VerifyFlags::WITNESS) {
            cost += self.witness_sigops(view);
        }

        cost
    }

    /// Virtual signature operations: cost rounded up to whole legacy ops.
    pub fn sigops(&self, view: &View, flags: VerifyFlags) -> usize {
        (self.sigops_cost(view, flags) + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// Virtual size after granting weight for counted sigops.
    pub fn sigops_size(&self, sigops: usize) -> usize {
        let weight = self.weight().max(sigops * BYTES_PER_SIGOP);
        (weight + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// True when any input signals BIP 125 replaceability.
    pub fn is_rbf(&self) -> bool {
        self.input.iter().any(|input| input.sequence < 0xffff_fffe)
    }

    /// True when the transaction is final at the given height and time.
    pub fn is_final(&self, height: u32, time: u32) -> bool {
        if self.lock_time == 0 {
            return true;
        }

        let predicate = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            time
        };
        if self.lock_time < predicate {
            return true;
        }

        self.input
            .iter()
            .all(|input| input.sequence == SEQUENCE_FINAL)
    }

    /// CHECKLOCKTIMEVERIFY predicate for input `index`.
    pub fn verify_locktime(&self, index: usize, predicate: u32) -> bool {
        // Lock times must agree on their unit (blocks or seconds).
        if (self.lock_time < LOCKTIME_THRESHOLD) != (predicate < LOCKTIME_THRESHOLD) {
            return false;
        }

        if predicate > self.lock_time {
            return false;
        }

        self.input[index].sequence != SEQUENCE_FINAL
    }

    /// CHECKSEQUENCEVERIFY / BIP 68 predicate for input `index`.
    pub fn verify_sequence(&self, index: usize, predicate: u32) -> bool {
        // A disabled predicate always passes, for future softforks.
        if predicate & SEQUENCE_DISABLE_FLAG != 0 {
            return true;
        }

        if self.version < 2 {
            return false;
        }

        let sequence = self.input[index].sequence;

        if sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return false;
        }

        if (sequence & SEQUENCE_TYPE_FLAG) != (predicate & SEQUENCE_TYPE_FLAG) {
            return false;
        }

        (predicate & SEQUENCE_MASK) <= (sequence & SEQUENCE_MASK)
    }

    /// Total value of the spent coins; `None` when one is missing.
    pub fn input_value(&self, view: &View) -> Option<i64> {
        self.input
            .iter()
            .map(|input| view.get(&input.previous_output).map(|coin| coin.output.value))
            .try_fold(0i64, |total, value| Some(total + value?))
    }

    pub fn output_value(&self) -> i64 {
        self.output.iter().map(|output| output.value).sum()
    }

    /// Fee paid by the transaction; `None` when a spent coin is missing.
    pub fn fee(&self, view: &View) -> Option<i64> {
        Some(self.input_value(view)? - self.output_value())
    }

    /// Builds the coin created by output `index` at `height`.
    pub fn coin(&self, index: u32, height: u32) -> Coin {
        Coin {
            version: self.version,
            height,
            coinbase: self.is_coinbase(),
            spent: false,
            output: self.output[index as usize].clone(),
        }
    }
}

fn sign_digest(secret_key: &SecretKey, digest: Hash256, sighash_type: u32) -> Vec<u8> {
    let msg = Message::from_digest(digest.to_byte_array());
    let sig = SECP.sign_ecdsa(&msg, secret_key);
    let mut bytes = sig.serialize_der().to_vec();
    bytes.push(sighash_type as u8);
    bytes
}

impl Encodable for Transaction {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.encode_with(buf, true);
    }
}

impl Decodable for Transaction {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let version = r.read_i32()?;

        // A zero marker byte followed by a nonzero flags byte announces the
        // extended (witness) encoding; a legacy transaction starting with a
        // zero input count never has a nonzero byte there.
        let mut flags = 0u8;
        if let (Some(0x00), Some(byte)) = (r.peek(0), r.peek(1)) {
            if byte != 0x00 {
                flags = byte;
                r.skip(2)?;
            }
        }

        let count = r.read_compact_size()?;
        let count = r.check_count(count, 41)?;
        let mut input = Vec::with_capacity(count);
        for _ in 0..count {
            input.push(TxIn::decode(r)?);
        }

        let count = r.read_compact_size()?;
        let count = r.check_count(count, 9)?;
        let mut output = Vec::with_capacity(count);
        for _ in 0..count {
            output.push(TxOut::decode(r)?);
        }

        if flags & 0x01 != 0 {
            flags ^= 0x01;
            for txin in &mut input {
                txin.witness = Witness::decode(r)?;
            }
        }

        if flags != 0 {
            return Err(codec::Error::ParseFailed("unknown transaction flags"));
        }

        // Cannot be re-encoded without colliding with the witness marker,
        // and cannot be valid either way.
        if input.is_empty() && !output.is_empty() {
            return Err(codec::Error::ParseFailed(
                "no inputs in a transaction with outputs",
            ));
        }

        let lock_time = r.read_u32()?;

        Ok(Self {
            version,
            input,
            output,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::sighash::{ALL, ANYONECANPAY, SINGLE};
    use super::*;
    use crate::codec::deserialize;
    use crate::consensus::COIN;
    use crate::view::View;

    fn secret() -> SecretKey {
        SecretKey::from_slice(&[0xaa; 32]).unwrap()
    }

    fn dummy_prevout(tag: u8) -> OutPoint {
        OutPoint::new(Hash256::from_byte_array([tag; 32]), 0)
    }

    fn input(prevout: OutPoint) -> TxIn {
        TxIn {
            previous_output: prevout,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
            witness: Witness::new(),
        }
    }

    fn template() -> Transaction {
        Transaction {
            version: 2,
            input: vec![input(dummy_prevout(1))],
            output: vec![TxOut {
                value: 49 * COIN,
                script_pubkey: Script::p2pkh(&[0x05; 20]),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn legacy_roundtrip_and_txid() {
        let tx = template();
        assert!(!tx.has_witness());
        assert_eq!(tx.encode(), tx.encode_base());
        assert_eq!(tx.txid(), tx.wtxid());

        let decoded: Transaction = deserialize(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn segwit_roundtrip() {
        let mut tx = template();
        tx.input[0].witness = Witness::from_items(vec![vec![0x01; 71], vec![0x02; 33]]);

        let encoded = tx.encode();
        assert_eq!(&encoded[4..6], &[0x00, 0x01]);
        assert_ne!(tx.txid(), tx.wtxid());
        assert_eq!(tx.total_size(), encoded.len());
        assert_eq!(tx.weight(), tx.base_size() * 4 + tx.witness_size());

        let decoded: Transaction = deserialize(&encoded).unwrap();
        assert_eq!(decoded, tx);

        // The base encoding drops the witness.
        let base: Transaction = deserialize(&tx.encode_base()).unwrap();
        assert!(base.input[0].witness.is_empty());
        assert_eq!(base.txid(), tx.txid());
    }

    #[test]
    fn decode_rejects_inputless_tx_with_outputs() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&[0x00, 0x01]); // witness marker and flag
        bytes.push(0x00); // no inputs
        bytes.push(0x01); // one output
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.push(0x00); // empty script
        bytes.extend_from_slice(&0u32.to_le_bytes());

        assert!(deserialize::<Transaction>(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_unknown_flags() {
        let mut tx = template();
        tx.input[0].witness = Witness::from_items(vec![vec![0x01]]);
        let mut bytes = tx.encode();
        bytes[5] = 0x03; // flags beyond bit 0

        assert!(deserialize::<Transaction>(&bytes).is_err());
    }

    #[test]
    fn sighash_single_out_of_range_bug() {
        let mut tx = template();
        tx.input.push(input(dummy_prevout(2)));

        let mut expected = [0u8; 32];
        expected[0] = 0x01;

        let digest = tx.signature_hash(
            1,
            &Script::p2pkh(&[0x07; 20]),
            0,
            SINGLE,
            SigVersion::Base,
            None,
        );
        assert_eq!(digest, Hash256::from_byte_array(expected));
    }

    #[test]
    fn sighash_cache_is_transparent() {
        let mut tx = template();
        tx.input.push(input(dummy_prevout(2)));
        let prev = Script::p2pkh(&[0x07; 20]);

        let mut cache = SighashCache::default();
        let cached: Vec<Hash256> = (0..2)
            .map(|i| {
                tx.signature_hash(i, &prev, 1000, ALL, SigVersion::WitnessV0, Some(&mut cache))
            })
            .collect();

        assert!(cache.prevouts.is_some());
        assert!(cache.sequences.is_some());
        assert!(cache.outputs.is_some());

        let uncached: Vec<Hash256> = (0..2)
            .map(|i| tx.signature_hash(i, &prev, 1000, ALL, SigVersion::WitnessV0, None))
            .collect();
        assert_eq!(cached, uncached);

        // ANYONECANPAY commits to nothing cacheable.
        let mut cache = SighashCache::default();
        tx.signature_hash(
            0,
            &prev,
            1000,
            ALL | ANYONECANPAY,
            SigVersion::WitnessV0,
            Some(&mut cache),
        );
        assert!(cache.prevouts.is_none());
        assert!(cache.sequences.is_none());
    }

    fn sign_and_verify(script_pubkey: Script) {
        let coin_out = TxOut {
            value: 50 * COIN,
            script_pubkey,
        };

        let mut tx = template();
        tx.sign_input(0, &coin_out, &secret(), ALL, None).unwrap();

        let mut view = View::new();
        view.insert(
            tx.input[0].previous_output,
            Coin {
                version: 1,
                height: 1,
                coinbase: false,
                spent: false,
                output: coin_out,
            },
        );

        tx.verify(&view, VerifyFlags::STANDARD).unwrap();

        // Malleating the signed output must break the signature.
        let mut tampered = tx.clone();
        tampered.output[0].value -= 1;
        assert!(tampered.verify(&view, VerifyFlags::STANDARD).is_err());
    }

    #[test]
    fn sign_verify_standard_forms() {
        let pubkey = secret().public_key(&SECP);
        let compressed = pubkey.serialize();
        let uncompressed = pubkey.serialize_uncompressed();
        let key_hash = hash160(&compressed);
        let program = Script::p2wpkh(&key_hash);

        sign_and_verify(Script::p2pk(&compressed));
        sign_and_verify(Script::p2pk(&uncompressed));
        sign_and_verify(Script::p2pkh(&key_hash));
        sign_and_verify(Script::p2pkh(&hash160(&uncompressed)));
        sign_and_verify(program.clone());
        sign_and_verify(Script::p2sh(&hash160(program.as_bytes())));
    }

    #[test]
    fn sign_rejects_foreign_outputs() {
        let coin_out = TxOut {
            value: COIN,
            script_pubkey: Script::p2pkh(&[0x99; 20]),
        };
        let mut tx = template();
        assert_eq!(
            tx.sign_input(0, &coin_out, &secret(), ALL, None),
            Err(SignError::KeyMismatch)
        );

        let coin_out = TxOut {
            value: COIN,
            script_pubkey: Script::from_bytes(vec![0x51]),
        };
        assert_eq!(
            tx.sign_input(0, &coin_out, &secret(), ALL, None),
            Err(SignError::UnsupportedScript)
        );
    }

    fn assert_rejects(tx: &Transaction, reason: &str, score: u32) {
        let err = tx.check_sanity().unwrap_err();
        assert_eq!(err.reject_reason(), reason);
        assert_eq!(err.score(), score);
    }

    #[test]
    fn sanity_scenarios() {
        assert!(template().check_sanity().is_ok());

        let mut tx = template();
        tx.input.clear();
        assert_rejects(&tx, "bad-txns-vin-empty", 100);

        let mut tx = template();
        tx.output.clear();
        assert_rejects(&tx, "bad-txns-vout-empty", 100);

        let mut tx = template();
        tx.input.push(input(dummy_prevout(1)));
        assert_rejects(&tx, "bad-txns-inputs-duplicate", 100);

        let mut tx = template();
        tx.output[0].value = -1;
        assert_rejects(&tx, "bad-txns-vout-negative", 100);

        let mut tx = template();
        tx.output[0].value = MAX_MONEY + 1;
        assert_rejects(&tx, "bad-txns-vout-toolarge", 100);

        let mut tx = template();
        tx.output[0].value = MAX_MONEY;
        tx.output.push(TxOut {
            value: 1,
            script_pubkey: Script::new(),
        });
        assert_rejects(&tx, "bad-txns-txouttotal-toolarge", 100);

        // Null prevout on a non-coinbase transaction.
        let mut tx = template();
        tx.input.push(input(OutPoint::null()));
        assert_rejects(&tx, "bad-txns-prevout-null", 10);

        // Coinbase with a one-byte script.
        let mut tx = template();
        tx.input = vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Script::from_bytes(vec![0x00]),
            sequence: SEQUENCE_FINAL,
            witness: Witness::new(),
        }];
        assert!(tx.is_coinbase());
        assert_rejects(&tx, "bad-cb-length", 100);
    }

    #[test]
    fn input_checks_against_view() {
        let coin = Coin {
            version: 1,
            height: 10,
            coinbase: false,
            spent: false,
            output: TxOut {
                value: 50 * COIN,
                script_pubkey: Script::p2pkh(&[0x01; 20]),
            },
        };

        let tx = template();

        let empty = View::new();
        assert_eq!(
            tx.check_inputs(&empty, 110),
            Err(TxError::MissingOrSpent)
        );

        let mut view = View::new();
        view.insert(tx.input[0].previous_output, coin.clone());
        assert!(tx.check_inputs(&view, 110).is_ok());
        assert_eq!(tx.fee(&view), Some(COIN));

        // A coinbase coin needs a hundred confirmations.
        let mut view = View::new();
        view.insert(
            tx.input[0].previous_output,
            Coin {
                coinbase: true,
                ..coin.clone()
            },
        );
        assert_eq!(
            tx.check_inputs(&view, 109),
            Err(TxError::PrematureCoinbaseSpend)
        );
        assert!(tx.check_inputs(&view, 110).is_ok());

        // Spending more than the coin is worth.
        let mut view = View::new();
        view.insert(
            tx.input[0].previous_output,
            Coin {
                output: TxOut {
                    value: COIN,
                    script_pubkey: Script::p2pkh(&[0x01; 20]),
                },
                ..coin
            },
        );
        assert_eq!(tx.check_inputs(&view, 110), Err(TxError::InBelowOut));
    }

    #[test]
    fn sigops_and_cost() {
        let mut view = View::new();
        let mut tx = template();
        assert_eq!(tx.legacy_sigops(), 1); // the p2pkh output

        let redeem = Script::p2pkh(&[0x44; 20]);
        tx.input[0].script_sig = Script::from_pushes([redeem.as_bytes()]);
        view.insert(
            tx.input[0].previous_output,
            Coin {
                version: 1,
                height: 1,
                coinbase: false,
                spent: false,
                output: TxOut {
                    value: COIN,
                    script_pubkey: Script::p2sh(&hash160(redeem.as_bytes())),
                },
            },
        );

        assert_eq!(tx.p2sh_sigops(&view), 1);
        assert_eq!(
            tx.sigops_cost(&view, VerifyFlags::STANDARD),
            2 * WITNESS_SCALE_FACTOR
        );
        assert_eq!(tx.sigops(&view, VerifyFlags::STANDARD), 2);
    }

    #[test]
    fn rbf_and_finality() {
        let mut tx = template();
        assert!(!tx.is_rbf());
        assert!(tx.is_final(0, 0));

        tx.input[0].sequence = 0xffff_fffd;
        assert!(tx.is_rbf());

        tx.lock_time = 100;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));

        // Sequence-final inputs make any locktime final.
        tx.input[0].sequence = SEQUENCE_FINAL;
        assert!(tx.is_final(100, 0));
    }

    #[test]
    fn sequence_locks() {
        let mut tx = template();
        tx.input[0].sequence = 10;
        assert!(tx.verify_sequence(0, 5));
        assert!(!tx.verify_sequence(0, 11));
        assert!(tx.verify_sequence(0, SEQUENCE_DISABLE_FLAG | 11));

        // Type mismatch between predicate and input.
        assert!(!tx.verify_sequence(0, SEQUENCE_TYPE_FLAG | 5));

        tx.version = 1;
        assert!(!tx.verify_sequence(0, 5));
    }
}
