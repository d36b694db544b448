//! Block index entries.

use lodecoin_primitives::block::Header;
use lodecoin_primitives::codec::{self, Decodable, Encodable, Reader};
use lodecoin_primitives::hash::Hash256;
use primitive_types::U256;

/// Stable handle to an entry in the chain database's in-memory arena.
///
/// The arena owns every [`ChainEntry`]; `prev`/`next` links are ids
/// resolved through it, so the index tree has no ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

/// A block-index node: the header plus the block's position in the chain
/// and in the flat files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub hash: Hash256,
    pub header: Header,
    pub height: u32,
    /// Accumulated proof of work up to and including this block.
    pub chainwork: U256,
    /// Flat-file locations; `-1` means not yet written.
    pub block_file: i32,
    pub block_pos: i32,
    pub undo_file: i32,
    pub undo_pos: i32,
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
}

impl ChainEntry {
    /// hash + header + height + chainwork + four file fields.
    pub const SERIALIZED_SIZE: usize = 32 + Header::SIZE + 4 + 32 + 16;

    /// Builds the entry for `header` extending `prev` (`None` for the
    /// genesis block).
    pub fn from_block(header: Header, prev: Option<&ChainEntry>) -> Self {
        let chainwork = prev.map_or_else(U256::zero, |p| p.chainwork) + header.work();
        Self {
            hash: header.block_hash(),
            header,
            height: prev.map_or(0, |p| p.height + 1),
            chainwork,
            block_file: -1,
            block_pos: -1,
            undo_file: -1,
            undo_pos: -1,
            prev: None,
            next: None,
        }
    }

    /// Parent entry; `None` for genesis (or before the entry is linked).
    pub fn prev(&self) -> Option<EntryId> {
        self.prev
    }

    /// Main-chain successor; `None` on side chains and at the tip.
    pub fn next(&self) -> Option<EntryId> {
        self.next
    }
}

fn write_u256_le(buf: &mut Vec<u8>, value: &U256) {
    for limb in value.0 {
        buf.extend_from_slice(&limb.to_le_bytes());
    }
}

impl Encodable for ChainEntry {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.hash.as_bytes());
        self.header.encode_into(buf);
        buf.extend_from_slice(&self.height.to_le_bytes());
        write_u256_le(buf, &self.chainwork);
        buf.extend_from_slice(&self.block_file.to_le_bytes());
        buf.extend_from_slice(&self.block_pos.to_le_bytes());
        buf.extend_from_slice(&self.undo_file.to_le_bytes());
        buf.extend_from_slice(&self.undo_pos.to_le_bytes());
    }
}

impl Decodable for ChainEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let hash = Hash256::from_byte_array(r.read_array()?);
        let header = Header::decode(r)?;
        let height = r.read_u32()?;
        let chainwork = U256::from_little_endian(&r.read_array::<32>()?);
        let block_file = r.read_i32()?;
        let block_pos = r.read_i32()?;
        let undo_file = r.read_i32()?;
        let undo_pos = r.read_i32()?;

        if hash != header.block_hash() {
            return Err(codec::Error::ParseFailed("entry hash does not match header"));
        }

        Ok(Self {
            hash,
            header,
            height,
            chainwork,
            block_file,
            block_pos,
            undo_file,
            undo_pos,
            prev: None,
            next: None,
        })
    }
}
