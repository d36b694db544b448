//! In-memory overlay of pending UTXO changes.
//!
//! A [`View`] stages the coin deltas of one block connect or disconnect and
//! records the spent coins, in spend order, for the undo record. The chain
//! database applies a view atomically: spent coins are deleted, everything
//! else is written.

use crate::codec::{self, Decodable, Encodable, Reader};
use crate::coin::Coin;
use crate::transaction::{OutPoint, Transaction};
use std::collections::hash_map::{self, HashMap};

/// The ordered stack of coins consumed by a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoCoins {
    coins: Vec<Coin>,
}

impl UndoCoins {
    pub fn push(&mut self, coin: Coin) {
        self.coins.push(coin);
    }

    pub fn pop(&mut self) -> Option<Coin> {
        self.coins.pop()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn clear(&mut self) {
        self.coins.clear();
    }
}

impl Encodable for UndoCoins {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        codec::write_compact_size(buf, self.coins.len() as u64);
        for coin in &self.coins {
            coin.encode_into(buf);
        }
    }
}

impl Decodable for UndoCoins {
    fn decode(r: &mut Reader<'_>) -> Result<Self, codec::Error> {
        let count = r.read_compact_size()?;
        let count = r.check_count(count, 4)?;
        let mut coins = Vec::with_capacity(count);
        for _ in 0..count {
            coins.push(Coin::decode(r)?);
        }
        Ok(Self { coins })
    }
}

/// A transactional overlay on the UTXO set.
#[derive(Debug, Default)]
pub struct View {
    map: HashMap<OutPoint, Coin>,
    undo: UndoCoins,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a spendable coin. Coins already consumed by this view are
    /// reported as absent.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.map.get(outpoint).filter(|coin| !coin.spent)
    }

    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) {
        self.map.insert(outpoint, coin);
    }

    /// Stages the coins created by every output of `tx`.
    ///
    /// With `spent` set the coins are staged as consumed, which makes the
    /// flush delete them; disconnect uses this to remove the outputs a
    /// block created.
    pub fn add(&mut self, tx: &Transaction, height: u32, spent: bool) {
        let txid = tx.txid();
        for vout in 0..tx.output.len() as u32 {
            let mut coin = tx.coin(vout, height);
            coin.spent = spent;
            self.map.insert(OutPoint::new(txid, vout), coin);
        }
    }

    /// Consumes the coins spent by `tx`, resolving misses through `lookup`
    /// (a read cursor into the backing store). Every consumed coin is
    /// pushed onto the undo stack in input order.
    ///
    /// Returns `Ok(false)` when a coin is missing or already spent; lookup
    /// failures propagate.
    pub fn spend<F, E>(&mut self, tx: &Transaction, mut lookup: F) -> Result<bool, E>
    where
        F: FnMut(&OutPoint) -> Result<Option<Coin>, E>,
    {
        for input in &tx.input {
            let coin = match self.map.entry(input.previous_output) {
                hash_map::Entry::Occupied(entry) => {
                    let coin = entry.into_mut();
                    if coin.spent {
                        return Ok(false);
                    }
                    coin
                }
                hash_map::Entry::Vacant(entry) => match lookup(&input.previous_output)? {
                    Some(coin) => entry.insert(coin),
                    None => return Ok(false),
                },
            };

            self.undo.push(coin.clone());
            coin.spent = true;
        }

        Ok(true)
    }

    /// Iterates every staged `(outpoint, coin)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Coin)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn undo(&self) -> &UndoCoins {
        &self.undo
    }

    pub fn undo_mut(&mut self) -> &mut UndoCoins {
        &mut self.undo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::deserialize;
    use crate::consensus::COIN;
    use crate::hash::Hash256;
    use crate::script::Script;
    use crate::script::Witness;
    use crate::transaction::{TxIn, TxOut};
    use std::convert::Infallible;

    fn coinbase(height: u32) -> Transaction {
        Transaction {
            version: 1,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::from_bytes(vec![0x01, height as u8]),
                sequence: 0xffff_ffff,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 50 * COIN,
                script_pubkey: Script::p2pkh(&[height as u8; 20]),
            }],
            lock_time: 0,
        }
    }

    fn spend_of(prevout: OutPoint) -> Transaction {
        Transaction {
            version: 1,
            input: vec![TxIn {
                previous_output: prevout,
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: 40 * COIN,
                script_pubkey: Script::p2pkh(&[0x09; 20]),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn spend_records_undo_in_order() {
        let mut view = View::new();
        let tx = coinbase(1);
        view.add(&tx, 1, false);

        let prevout = OutPoint::new(tx.txid(), 0);
        let spender = spend_of(prevout);

        let ok = view
            .spend::<_, Infallible>(&spender, |_| Ok(None))
            .unwrap();
        assert!(ok);
        assert_eq!(view.undo().len(), 1);
        // The staged coin is now unavailable.
        assert!(view.get(&prevout).is_none());

        // Double spend within the same view fails.
        let ok = view
            .spend::<_, Infallible>(&spend_of(prevout), |_| Ok(None))
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn spend_falls_back_to_lookup() {
        let mut view = View::new();
        let tx = coinbase(2);
        let prevout = OutPoint::new(tx.txid(), 0);
        let coin = tx.coin(0, 2);

        let ok = view
            .spend::<_, Infallible>(&spend_of(prevout), |outpoint| {
                assert_eq!(*outpoint, prevout);
                Ok(Some(coin.clone()))
            })
            .unwrap();
        assert!(ok);

        let staged = view.iter().next().unwrap();
        assert!(staged.1.spent);
    }

    #[test]
    fn missing_coin_is_not_an_error() {
        let mut view = View::new();
        let prevout = OutPoint::new(Hash256::ZERO, 7);
        let ok = view
            .spend::<_, Infallible>(&spend_of(prevout), |_| Ok(None))
            .unwrap();
        assert!(!ok);
        assert!(view.undo().is_empty());
    }

    #[test]
    fn undo_roundtrip() {
        let mut undo = UndoCoins::default();
        undo.push(coinbase(1).coin(0, 1));
        undo.push(coinbase(2).coin(0, 2));

        let decoded: UndoCoins = deserialize(&undo.encode()).unwrap();
        assert_eq!(decoded, undo);
    }
}
