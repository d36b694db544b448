//! Hash identifiers and digest helpers.

use bitcoin_hashes::{hash160, sha256, sha256d, Hash as _};
use std::fmt;
use std::str::FromStr;

/// A 32-byte identifier (block hash, txid, wtxid).
///
/// Stored in wire order (little-endian); displayed in the conventional
/// reversed hex order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256([u8; 32]);

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Hash256 {
    /// The all-zero hash.
    pub const ZERO: Self = Self([0u8; 32]);

    pub const fn from_byte_array(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_byte_array(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Double SHA-256 of `data`.
    pub fn hash(data: &[u8]) -> Self {
        Self(sha256d::Hash::hash(data).to_byte_array())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Parses the display (reversed hex) order.
impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

/// Single SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// RIPEMD-160 of SHA-256 of `data`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}
