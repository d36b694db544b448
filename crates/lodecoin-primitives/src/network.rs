//! Network parameters and genesis block construction.

use crate::block::{Block, Header};
use crate::consensus::COIN;
use crate::hash::Hash256;
use crate::script::{Script, Witness};
use crate::transaction::{OutPoint, Transaction, TxIn, TxOut};
use std::fmt;

/// The networks the chain database can be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }

    /// Builds the network's genesis block.
    pub fn genesis_block(self) -> Block {
        let coinbase = genesis_coinbase();
        let merkle_root = coinbase.txid();

        let (time, bits, nonce) = match self {
            Self::Mainnet => (1_231_006_505, 0x1d00ffff, 2_083_236_893),
            Self::Testnet => (1_296_688_602, 0x1d00ffff, 414_098_458),
            Self::Regtest => (1_296_688_602, 0x207fffff, 2),
        };

        Block {
            header: Header {
                version: 1,
                prev_blockhash: Hash256::ZERO,
                merkle_root,
                time,
                bits,
                nonce,
            },
            txdata: vec![coinbase],
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The headline embedded in the genesis coinbase.
const GENESIS_MESSAGE: &[u8] =
    b"The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// The uncompressed key the genesis output pays to.
const GENESIS_PUBKEY: &str = "04678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61de\
                              b649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5f";

fn genesis_coinbase() -> Transaction {
    let pubkey = hex::decode(GENESIS_PUBKEY).expect("genesis pubkey is valid hex; qed");

    Transaction {
        version: 1,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Script::from_pushes([
                &[0xff, 0xff, 0x00, 0x1d][..],
                &[0x04],
                GENESIS_MESSAGE,
            ]),
            sequence: 0xffff_ffff,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: 50 * COIN,
            script_pubkey: Script::p2pk(&pubkey),
        }],
        lock_time: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encodable;

    #[test]
    fn mainnet_genesis() {
        let genesis = Network::Mainnet.genesis_block();
        assert_eq!(
            genesis.block_hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(
            genesis.header.merkle_root.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(genesis.encode().len(), 285);
    }

    #[test]
    fn regtest_genesis() {
        let genesis = Network::Regtest.genesis_block();
        assert_eq!(
            genesis.block_hash().to_string(),
            "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"
        );
        // Same coinbase on every network.
        assert_eq!(
            genesis.header.merkle_root,
            Network::Mainnet.genesis_block().header.merkle_root
        );
    }
}
