//! Block and header structures.

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::hash::Hash256;
use crate::transaction::Transaction;
use primitive_types::U256;

/// An 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: i32,
    pub prev_blockhash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub const SIZE: usize = 80;

    pub fn block_hash(&self) -> Hash256 {
        Hash256::hash(&self.encode())
    }

    /// Proof-of-work target encoded in `bits`. Zero for negative or
    /// overflowing compact encodings.
    pub fn target(&self) -> U256 {
        let exponent = self.bits >> 24;
        let mantissa = self.bits & 0x007f_ffff;

        if self.bits & 0x0080_0000 != 0 || mantissa == 0 {
            return U256::zero();
        }

        if exponent <= 3 {
            U256::from(mantissa >> (8 * (3 - exponent)))
        } else if exponent <= 32 {
            U256::from(mantissa) << (8 * (exponent - 3))
        } else {
            U256::zero()
        }
    }

    /// Expected number of hashes to meet the target: `2^256 / (target + 1)`.
    pub fn work(&self) -> U256 {
        let target = self.target();
        if target.is_zero() {
            return U256::zero();
        }
        (!target / (target + 1)) + 1
    }
}

impl Encodable for Header {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_blockhash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl Decodable for Header {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        Ok(Self {
            version: r.read_i32()?,
            prev_blockhash: Hash256::from_byte_array(r.read_array()?),
            merkle_root: Hash256::from_byte_array(r.read_array()?),
            time: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub txdata: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.txdata.first()
    }

    /// Fully serialized size, witness included.
    pub fn total_size(&self) -> usize {
        Header::SIZE
            + codec::compact_size_len(self.txdata.len() as u64)
            + self.txdata.iter().map(Transaction::total_size).sum::<usize>()
    }
}

impl Encodable for Block {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        codec::write_compact_size(buf, self.txdata.len() as u64);
        for tx in &self.txdata {
            tx.encode_into(buf);
        }
    }
}

impl Decodable for Block {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let header = Header::decode(r)?;
        let count = r.read_compact_size()?;
        let count = r.check_count(count, 10)?;
        let mut txdata = Vec::with_capacity(count);
        for _ in 0..count {
            txdata.push(Transaction::decode(r)?);
        }
        Ok(Self { header, txdata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn header_codec_is_80_bytes() {
        let header = Header {
            version: 1,
            prev_blockhash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 1_231_006_505,
            bits: 0x1d00ffff,
            nonce: 2_083_236_893,
        };
        let encoded = header.encode();
        assert_eq!(encoded.len(), Header::SIZE);
        assert_eq!(crate::codec::deserialize::<Header>(&encoded).unwrap(), header);
    }

    #[test]
    fn difficulty_one_work() {
        let header = Header {
            version: 1,
            prev_blockhash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 0,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        // The well-known difficulty-1 chainwork increment.
        assert_eq!(header.work(), U256::from(0x1_0001_0001u64));

        let zero = Header { bits: 0, ..header };
        assert_eq!(zero.work(), U256::zero());
    }
}
