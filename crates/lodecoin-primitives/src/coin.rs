//! Coins: unspent transaction outputs together with their creation context.

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::compress;
use crate::transaction::TxOut;

/// An unspent output, the height that created it and whether it came from a
/// coinbase.
///
/// `spent` is in-memory bookkeeping only: a view marks a coin spent when it
/// consumes it, and the flush deletes spent coins instead of writing them.
/// The on-disk encoding never carries the flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub version: i32,
    pub height: u32,
    pub coinbase: bool,
    pub spent: bool,
    pub output: TxOut,
}

impl Encodable for Coin {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        codec::write_varint(buf, self.version as u32 as u64);
        codec::write_varint(buf, (u64::from(self.height) << 1) | u64::from(self.coinbase));
        compress::write_txout(buf, &self.output);
    }
}

impl Decodable for Coin {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let version = r.read_varint()? as u32 as i32;
        let code = r.read_varint()?;
        let height = u32::try_from(code >> 1)
            .map_err(|_| codec::Error::ParseFailed("coin height out of range"))?;
        let coinbase = code & 1 != 0;
        let output = compress::read_txout(r)?;

        Ok(Self {
            version,
            height,
            coinbase,
            spent: false,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deserialize;
    use crate::consensus::COIN;
    use crate::script::Script;

    #[test]
    fn coin_roundtrip() {
        let coin = Coin {
            version: 2,
            height: 170,
            coinbase: true,
            spent: false,
            output: TxOut {
                value: 50 * COIN,
                script_pubkey: Script::p2pkh(&[0x77; 20]),
            },
        };

        let decoded: Coin = deserialize(&coin.encode()).unwrap();
        assert_eq!(decoded, coin);
    }

    #[test]
    fn spent_flag_not_serialized() {
        let mut coin = Coin {
            version: 1,
            height: 5,
            coinbase: false,
            spent: false,
            output: TxOut {
                value: 1,
                script_pubkey: Script::new(),
            },
        };
        let unspent = coin.encode();
        coin.spent = true;
        assert_eq!(coin.encode(), unspent);
    }
}
