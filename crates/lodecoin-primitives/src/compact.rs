//! Compact block relay (BIP 152).
//!
//! A compact block announces a block as its header plus 48-bit short
//! transaction ids, with the coinbase prefilled. The receiver fills slots
//! from its mempool, requests whatever is left with `getblocktxn`, and
//! finalizes the reconstruction into a full block.

use crate::block::{Block, Header};
use crate::codec::{self, Decodable, Encodable, Reader};
use crate::consensus::MAX_BLOCK_SIZE;
use crate::hash::{sha256, Hash256};
use crate::transaction::Transaction;
use bitcoin_hashes::{siphash24, Hash as _};
use std::collections::HashMap;

/// Reconstruction failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompactBlockError {
    #[error("compact block announces no transactions")]
    Empty,
    #[error("compact block announces too many transactions")]
    TooManyTransactions,
    #[error("prefilled transaction index out of range")]
    BadPrefillIndex,
    /// Soft failure: the peer must fall back to requesting the full block.
    #[error("two transactions share a short id")]
    ShortIdCollision,
    #[error("block transaction response does not match the missing set")]
    ResponseMismatch,
    #[error("reconstruction is missing transactions")]
    Incomplete,
}

/// A transaction sent along with the compact block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefilledTransaction {
    /// Differential position: offset from the previous prefilled slot,
    /// minus one. The coinbase prefill of a fresh announcement is `0`.
    pub index: u16,
    pub tx: Transaction,
}

/// A compact block and its reconstruction state.
pub struct CompactBlock {
    pub block_hash: Hash256,
    pub header: Header,
    pub key_nonce: u64,
    pub short_ids: Vec<u64>,
    pub prefilled: Vec<PrefilledTransaction>,
    /// Receive timestamp, maintained by the peer layer for timeouts.
    pub now: u64,
    sipkey: [u8; 32],
    avail: Vec<Option<Transaction>>,
    id_map: HashMap<u64, usize>,
    count: usize,
}

/// SHA-256 over `header ‖ le64(nonce)`; the first 16 bytes key the
/// short-id siphash.
fn derive_sipkey(header: &Header, key_nonce: u64) -> [u8; 32] {
    let mut data = Vec::with_capacity(Header::SIZE + 8);
    header.encode_into(&mut data);
    data.extend_from_slice(&key_nonce.to_le_bytes());
    sha256(&data)
}

impl CompactBlock {
    /// Builds the announcement for `block`, prefilling the coinbase and
    /// fingerprinting every other transaction by wtxid (txid when the peer
    /// negotiated the non-witness version).
    pub fn from_block(block: &Block, witness: bool) -> Self {
        let header = block.header;
        let key_nonce = fastrand::u64(..);
        let sipkey = derive_sipkey(&header, key_nonce);

        let mut compact = Self {
            block_hash: header.block_hash(),
            header,
            key_nonce,
            short_ids: Vec::with_capacity(block.txdata.len().saturating_sub(1)),
            prefilled: Vec::with_capacity(1),
            now: 0,
            sipkey,
            avail: Vec::new(),
            id_map: HashMap::new(),
            count: 0,
        };

        for tx in &block.txdata[1..] {
            let hash = if witness { tx.wtxid() } else { tx.txid() };
            compact.short_ids.push(compact.short_id(&hash));
        }

        if let Some(coinbase) = block.coinbase() {
            compact.prefilled.push(PrefilledTransaction {
                index: 0,
                tx: coinbase.clone(),
            });
        }

        compact
    }

    /// 48-bit short id of a transaction hash under this block's key.
    pub fn short_id(&self, hash: &Hash256) -> u64 {
        let k0 = u64::from_le_bytes(self.sipkey[0..8].try_into().expect("length checked"));
        let k1 = u64::from_le_bytes(self.sipkey[8..16].try_into().expect("length checked"));
        siphash24::Hash::hash_with_keys(k0, k1, hash.as_bytes()).as_u64() & 0xffff_ffff_ffff
    }

    /// Total number of transactions in the announced block.
    pub fn total(&self) -> usize {
        self.prefilled.len() + self.short_ids.len()
    }

    /// Prepares the reconstruction state: places the prefilled
    /// transactions and indexes the short ids of the open slots.
    ///
    /// A [`CompactBlockError::ShortIdCollision`] is a soft failure; the
    /// caller falls back to a full block request.
    pub fn setup(&mut self) -> Result<(), CompactBlockError> {
        let total = self.total();

        if total == 0 {
            return Err(CompactBlockError::Empty);
        }

        if total > MAX_BLOCK_SIZE / 10 {
            return Err(CompactBlockError::TooManyTransactions);
        }

        // Refuse to build a short-id table bigger than any valid block
        // could need (hashdos).
        if total > (MAX_BLOCK_SIZE - 81) / 60 {
            return Err(CompactBlockError::TooManyTransactions);
        }

        assert!(self.avail.is_empty() && self.count == 0);

        self.avail = vec![None; total];

        let mut last: i64 = -1;
        for (i, prefilled) in self.prefilled.iter().enumerate() {
            last += i64::from(prefilled.index) + 1;

            if !(0..=0xffff).contains(&last) {
                return Err(CompactBlockError::BadPrefillIndex);
            }

            if last as usize > self.short_ids.len() + i {
                return Err(CompactBlockError::BadPrefillIndex);
            }

            self.avail[last as usize] = Some(prefilled.tx.clone());
            self.count += 1;
        }

        let mut offset = 0;
        for (i, &id) in self.short_ids.iter().enumerate() {
            while self.avail[i + offset].is_some() {
                offset += 1;
            }

            if self.id_map.insert(id, i + offset).is_some() {
                return Err(CompactBlockError::ShortIdCollision);
            }
        }

        Ok(())
    }

    /// Places a mempool transaction whose hash produced `id`, consuming
    /// the id mapping. Returns `false` when the id is unknown.
    pub fn provide(&mut self, id: u64, tx: Transaction) -> bool {
        let Some(index) = self.id_map.remove(&id) else {
            return false;
        };
        debug_assert!(self.avail[index].is_none());
        self.avail[index] = Some(tx);
        self.count += 1;
        true
    }

    /// Indices of the slots still missing a transaction, ascending.
    pub fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        self.avail
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.total()
    }

    /// Fills the remaining slots, in order, from a `blocktxn` response.
    /// Every response transaction must be used, and none may be missing.
    pub fn fill_missing(&mut self, response: &BlockTxn) -> Result<(), CompactBlockError> {
        let mut used = 0;

        for slot in &mut self.avail {
            if slot.is_some() {
                continue;
            }

            let Some(tx) = response.transactions.get(used) else {
                return Err(CompactBlockError::ResponseMismatch);
            };

            *slot = Some(tx.clone());
            self.count += 1;
            used += 1;
        }

        if used != response.transactions.len() {
            return Err(CompactBlockError::ResponseMismatch);
        }

        Ok(())
    }

    /// Consumes the reconstruction into the full block, preserving
    /// transaction order.
    pub fn finalize(self) -> Result<Block, CompactBlockError> {
        if !self.is_complete() {
            return Err(CompactBlockError::Incomplete);
        }

        let txdata = self
            .avail
            .into_iter()
            .map(|slot| slot.ok_or(CompactBlockError::Incomplete))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Block {
            header: self.header,
            txdata,
        })
    }

    fn encode_with(&self, buf: &mut Vec<u8>, witness: bool) {
        self.header.encode_into(buf);
        buf.extend_from_slice(&self.key_nonce.to_le_bytes());

        codec::write_compact_size(buf, self.short_ids.len() as u64);
        for &id in &self.short_ids {
            buf.extend_from_slice(&((id & 0xffff_ffff) as u32).to_le_bytes());
            buf.extend_from_slice(&((id >> 32) as u16).to_le_bytes());
        }

        codec::write_compact_size(buf, self.prefilled.len() as u64);
        for prefilled in &self.prefilled {
            codec::write_compact_size(buf, u64::from(prefilled.index));
            if witness {
                prefilled.tx.encode_into(buf);
            } else {
                buf.extend_from_slice(&prefilled.tx.encode_base());
            }
        }
    }

    /// Encodes without witness data, for peers speaking the non-witness
    /// version.
    pub fn encode_base(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_with(&mut buf, false);
        buf
    }
}

impl Encodable for CompactBlock {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.encode_with(buf, true);
    }
}

impl Decodable for CompactBlock {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let header = Header::decode(r)?;
        let key_nonce = r.read_u64()?;
        let sipkey = derive_sipkey(&header, key_nonce);

        let id_count = r.read_compact_size()?;
        let id_count = r.check_count(id_count, 6)?;
        let mut short_ids = Vec::with_capacity(id_count);
        for _ in 0..id_count {
            let lo = r.read_u32()?;
            let hi = r.read_u16()?;
            short_ids.push((u64::from(hi) << 32) | u64::from(lo));
        }

        let tx_count = r.read_compact_size()?;
        let tx_count = r.check_count(tx_count, 11)?;
        let mut prefilled = Vec::with_capacity(tx_count);
        for _ in 0..tx_count {
            let index = r.read_compact_size()?;

            if index > 0xffff {
                return Err(codec::Error::ParseFailed("prefill index out of range"));
            }

            if index as usize >= tx_count + id_count {
                return Err(codec::Error::ParseFailed("prefill index out of range"));
            }

            prefilled.push(PrefilledTransaction {
                index: index as u16,
                tx: Transaction::decode(r)?,
            });
        }

        Ok(Self {
            block_hash: header.block_hash(),
            header,
            key_nonce,
            short_ids,
            prefilled,
            now: 0,
            sipkey,
            avail: Vec::new(),
            id_map: HashMap::new(),
            count: 0,
        })
    }
}

/// `getblocktxn`: a request for the transactions missing from a compact
/// block, by ascending index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockTxn {
    pub block_hash: Hash256,
    /// Absolute indices; the wire carries first-then-delta-minus-one.
    pub indexes: Vec<u64>,
}

impl GetBlockTxn {
    /// The request covering every slot `compact` is still missing.
    pub fn from_compact(compact: &CompactBlock) -> Self {
        Self {
            block_hash: compact.block_hash,
            indexes: compact.missing().map(|index| index as u64).collect(),
        }
    }
}

impl Encodable for GetBlockTxn {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.block_hash.as_bytes());
        codec::write_compact_size(buf, self.indexes.len() as u64);
        for (i, &index) in self.indexes.iter().enumerate() {
            let delta = if i > 0 {
                index - self.indexes[i - 1] - 1
            } else {
                index
            };
            codec::write_compact_size(buf, delta);
        }
    }
}

impl Decodable for GetBlockTxn {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let block_hash = Hash256::from_byte_array(r.read_array()?);

        let count = r.read_compact_size()?;
        let count = r.check_count(count, 1)?;
        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let delta = r.read_compact_size()?;
            if delta > 0xffff {
                return Err(codec::Error::ParseFailed("getblocktxn index out of range"));
            }
            indexes.push(delta);
        }

        // Second pass resolves the deltas into absolute positions.
        let mut offset = 0u64;
        for index in &mut indexes {
            *index += offset;
            if *index > 0xffff {
                return Err(codec::Error::ParseFailed("getblocktxn index out of range"));
            }
            offset = *index + 1;
        }

        Ok(Self {
            block_hash,
            indexes,
        })
    }
}

/// `blocktxn`: the transactions answering a [`GetBlockTxn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTxn {
    pub block_hash: Hash256,
    pub transactions: Vec<Transaction>,
}

impl BlockTxn {
    /// Collects the requested transactions out of `block`. Indices past
    /// the end of the block are ignored.
    pub fn from_block(block: &Block, request: &GetBlockTxn) -> Self {
        let mut transactions = Vec::with_capacity(request.indexes.len());
        for &index in &request.indexes {
            match block.txdata.get(index as usize) {
                Some(tx) => transactions.push(tx.clone()),
                None => break,
            }
        }
        Self {
            block_hash: block.block_hash(),
            transactions,
        }
    }

    /// Encodes without witness data.
    pub fn encode_base(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.block_hash.as_bytes());
        codec::write_compact_size(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.encode_base());
        }
        buf
    }
}

impl Encodable for BlockTxn {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.block_hash.as_bytes());
        codec::write_compact_size(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(buf);
        }
    }
}

impl Decodable for BlockTxn {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let block_hash = Hash256::from_byte_array(r.read_array()?);
        let count = r.read_compact_size()?;
        let count = r.check_count(count, 10)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::decode(r)?);
        }
        Ok(Self {
            block_hash,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deserialize;
    use crate::consensus::COIN;
    use crate::network::Network;
    use crate::script::{Script, Witness};
    use crate::transaction::{OutPoint, TxIn, TxOut};

    fn test_tx(tag: u8) -> Transaction {
        Transaction {
            version: 2,
            input: vec![TxIn {
                previous_output: OutPoint::new(Hash256::from_byte_array([tag; 32]), 0),
                script_sig: Script::new(),
                sequence: 0xffff_fffd,
                witness: Witness::from_items(vec![vec![tag, tag]]),
            }],
            output: vec![TxOut {
                value: i64::from(tag) * COIN,
                script_pubkey: Script::p2pkh(&[tag; 20]),
            }],
            lock_time: 0,
        }
    }

    fn test_block(tx_count: u8) -> Block {
        let genesis = Network::Regtest.genesis_block();
        let mut txdata = vec![genesis.txdata[0].clone()];
        for tag in 1..=tx_count {
            txdata.push(test_tx(tag));
        }
        Block {
            header: Header {
                prev_blockhash: genesis.block_hash(),
                ..genesis.header
            },
            txdata,
        }
    }

    #[test]
    fn reconstruction_roundtrip() {
        let block = test_block(4);
        let compact = CompactBlock::from_block(&block, true);
        assert_eq!(compact.short_ids.len(), 4);
        assert_eq!(compact.prefilled.len(), 1);

        // Ship it over the wire.
        let mut received: CompactBlock = deserialize(&compact.encode()).unwrap();
        received.setup().unwrap();
        assert_eq!(received.total(), 5);

        // The mempool knows transactions 1 and 3.
        for tx in [&block.txdata[1], &block.txdata[3]] {
            let id = received.short_id(&tx.wtxid());
            assert!(received.provide(id, tx.clone()));
        }
        assert!(!received.is_complete());

        // Request and answer the rest.
        let request = GetBlockTxn::from_compact(&received);
        assert_eq!(request.indexes, vec![2, 4]);

        let request: GetBlockTxn = deserialize(&request.encode()).unwrap();
        let response = BlockTxn::from_block(&block, &request);
        let response: BlockTxn = deserialize(&response.encode()).unwrap();

        received.fill_missing(&response).unwrap();
        assert!(received.is_complete());

        assert_eq!(received.finalize().unwrap(), block);
    }

    #[test]
    fn prefilled_only_block_needs_no_request() {
        let block = test_block(0);
        let compact = CompactBlock::from_block(&block, true);
        let mut received: CompactBlock = deserialize(&compact.encode()).unwrap();
        received.setup().unwrap();
        assert!(received.is_complete());
        assert_eq!(received.finalize().unwrap(), block);
    }

    #[test]
    fn setup_rejects_empty_and_oversized() {
        let genesis = Network::Regtest.genesis_block();

        // Header + nonce + zero ids + zero prefills.
        let mut bytes = genesis.header.encode();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.push(0x00);
        bytes.push(0x00);
        let mut empty: CompactBlock = deserialize(&bytes).unwrap();
        assert_eq!(empty.setup(), Err(CompactBlockError::Empty));

        // One id past the hashdos bound.
        let limit = (MAX_BLOCK_SIZE - 81) / 60;
        let mut bytes = genesis.header.encode();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        codec::write_compact_size(&mut bytes, limit as u64 + 1);
        for i in 0..=limit {
            bytes.extend_from_slice(&(i as u32).to_le_bytes());
            bytes.extend_from_slice(&[0u8; 2]);
        }
        bytes.push(0x00);
        let mut oversized: CompactBlock = deserialize(&bytes).unwrap();
        assert_eq!(
            oversized.setup(),
            Err(CompactBlockError::TooManyTransactions)
        );
    }

    #[test]
    fn duplicate_short_id_is_soft_failure() {
        let genesis = Network::Regtest.genesis_block();
        let mut bytes = genesis.header.encode();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        codec::write_compact_size(&mut bytes, 2);
        for _ in 0..2 {
            bytes.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
            bytes.extend_from_slice(&0xcafeu16.to_le_bytes());
        }
        bytes.push(0x00);

        let mut compact: CompactBlock = deserialize(&bytes).unwrap();
        assert_eq!(compact.setup(), Err(CompactBlockError::ShortIdCollision));
    }

    #[test]
    fn getblocktxn_index_codec() {
        let request = GetBlockTxn {
            block_hash: Hash256::from_byte_array([9; 32]),
            indexes: vec![0, 1, 5, 6, 1000],
        };
        let decoded: GetBlockTxn = deserialize(&request.encode()).unwrap();
        assert_eq!(decoded, request);

        // 0xffff is the last representable index.
        let request = GetBlockTxn {
            block_hash: Hash256::ZERO,
            indexes: vec![0xffff],
        };
        assert_eq!(
            deserialize::<GetBlockTxn>(&request.encode()).unwrap(),
            request
        );

        let request = GetBlockTxn {
            block_hash: Hash256::ZERO,
            indexes: vec![0xffff, 0x10000],
        };
        assert!(deserialize::<GetBlockTxn>(&request.encode()).is_err());
    }

    #[test]
    fn fill_missing_requires_exact_response() {
        let block = test_block(2);
        let compact = CompactBlock::from_block(&block, true);
        let mut received: CompactBlock = deserialize(&compact.encode()).unwrap();
        received.setup().unwrap();

        // Short response.
        let short = BlockTxn {
            block_hash: block.block_hash(),
            transactions: vec![block.txdata[1].clone()],
        };
        assert_eq!(
            received.fill_missing(&short),
            Err(CompactBlockError::ResponseMismatch)
        );
    }

    #[test]
    fn short_ids_differ_between_txid_and_wtxid() {
        let block = test_block(1);
        let compact = CompactBlock::from_block(&block, true);
        let tx = &block.txdata[1];
        assert_ne!(tx.txid(), tx.wtxid());
        assert_eq!(compact.short_ids[0], compact.short_id(&tx.wtxid()));
        assert_ne!(compact.short_ids[0], compact.short_id(&tx.txid()));
    }
}
