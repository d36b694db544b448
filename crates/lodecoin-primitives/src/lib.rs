//! # Lodecoin primitives
//!
//! Bitcoin consensus primitives: the transaction model with its wire
//! codec, signature hashing and standard-form verification/signing; coins
//! and the transactional UTXO view; and compact block relay (BIP 152).
//!
//! Everything here is pure data and computation. Persistence lives in
//! `lodecoin-chaindb`; networking and mempool policy belong to the host.

pub mod block;
pub mod codec;
pub mod coin;
pub mod compact;
pub mod compress;
pub mod consensus;
pub mod hash;
pub mod network;
pub mod script;
pub mod transaction;
pub mod view;

pub use block::{Block, Header};
pub use codec::{deserialize, Decodable, Encodable};
pub use coin::Coin;
pub use compact::{BlockTxn, CompactBlock, CompactBlockError, GetBlockTxn, PrefilledTransaction};
pub use hash::Hash256;
pub use network::Network;
pub use script::{Script, ScriptError, VerifyFlags, Witness};
pub use transaction::{
    OutPoint, SigVersion, SighashCache, SignError, Transaction, TxError, TxIn, TxOut, VerifyError,
};
pub use view::{UndoCoins, View};
