//! Compressed output encoding used by the UTXO set.
//!
//! Amounts are compressed with Bitcoin Core's decimal-exponent scheme.
//! Scripts use the special-form table: sizes 0x00–0x05 denote p2pkh, p2sh
//! and p2pk templates; anything else is stored raw behind a `len + 6` size.

use crate::codec::{self, Error, Reader};
use crate::script::Script;
use crate::transaction::TxOut;

/// Number of reserved special script sizes.
const SPECIAL_SCRIPTS: u64 = 6;

/// Compresses a satoshi amount. Defined for `0 <= n <= MAX_MONEY`.
pub fn compress_amount(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut n = n;
    let mut e = 0u64;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

pub fn decompress_amount(x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    let mut x = x - 1;
    let e = x % 10;
    x /= 10;
    let mut n = if e < 9 {
        let d = (x % 9) + 1;
        x /= 9;
        x * 10 + d
    } else {
        x + 1
    };
    for _ in 0..e {
        n *= 10;
    }
    n
}

/// Compresses a script into one of the special forms, if it has one.
fn compress_script(script: &Script) -> Option<Vec<u8>> {
    if let Some(hash) = script.as_p2pkh() {
        let mut out = Vec::with_capacity(21);
        out.push(0x00);
        out.extend_from_slice(&hash);
        return Some(out);
    }

    if let Some(hash) = script.as_p2sh() {
        let mut out = Vec::with_capacity(21);
        out.push(0x01);
        out.extend_from_slice(&hash);
        return Some(out);
    }

    if let Some(pubkey) = script.as_p2pk() {
        match pubkey.len() {
            // The compressed key's parity byte doubles as the size marker.
            33 => return Some(pubkey.to_vec()),
            65 => {
                // Only a valid point can be recovered from its x coordinate.
                if secp256k1::PublicKey::from_slice(pubkey).is_ok() {
                    let mut out = Vec::with_capacity(33);
                    out.push(0x04 | (pubkey[64] & 0x01));
                    out.extend_from_slice(&pubkey[1..33]);
                    return Some(out);
                }
            }
            _ => {}
        }
    }

    None
}

/// Writes the compressed form of `output`.
pub fn write_txout(buf: &mut Vec<u8>, output: &TxOut) {
    codec::write_varint(buf, compress_amount(output.value as u64));

    if let Some(compressed) = compress_script(&output.script_pubkey) {
        buf.extend_from_slice(&compressed);
        return;
    }

    codec::write_varint(
        buf,
        output.script_pubkey.len() as u64 + SPECIAL_SCRIPTS,
    );
    buf.extend_from_slice(output.script_pubkey.as_bytes());
}

/// Reads a compressed output.
pub fn read_txout(r: &mut Reader<'_>) -> Result<TxOut, Error> {
    let value = decompress_amount(r.read_varint()?) as i64;

    let size = r.read_varint()?;
    let script_pubkey = match size {
        0x00 => Script::p2pkh(&r.read_array()?),
        0x01 => Script::p2sh(&r.read_array()?),
        0x02 | 0x03 => {
            let mut pubkey = [0u8; 33];
            pubkey[0] = size as u8;
            pubkey[1..].copy_from_slice(&r.read_array::<32>()?);
            Script::p2pk(&pubkey)
        }
        0x04 | 0x05 => {
            let mut compressed = [0u8; 33];
            compressed[0] = size as u8 - 2;
            compressed[1..].copy_from_slice(&r.read_array::<32>()?);
            let pubkey = secp256k1::PublicKey::from_slice(&compressed)
                .map_err(|_| Error::ParseFailed("invalid compressed public key"))?;
            Script::p2pk(&pubkey.serialize_uncompressed())
        }
        _ => {
            let len = r.check_count(size - SPECIAL_SCRIPTS, 1)?;
            Script::from_bytes(r.read_bytes(len)?.to_vec())
        }
    };

    Ok(TxOut {
        value,
        script_pubkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reader;
    use crate::consensus::{COIN, MAX_MONEY};
    use crate::hash::hash160;
    use crate::script::SECP;
    use secp256k1::SecretKey;

    #[test]
    fn amount_roundtrip() {
        for n in [
            0,
            1,
            9,
            10,
            COIN as u64,
            (50 * COIN) as u64,
            MAX_MONEY as u64,
            123_456_789,
        ] {
            assert_eq!(decompress_amount(compress_amount(n)), n);
        }
    }

    fn roundtrip(output: &TxOut) -> TxOut {
        let mut buf = Vec::new();
        write_txout(&mut buf, output);
        read_txout(&mut Reader::new(&buf)).unwrap()
    }

    #[test]
    fn special_scripts_roundtrip() {
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pubkey = secret.public_key(&SECP);

        for script in [
            Script::p2pkh(&[0x11; 20]),
            Script::p2sh(&[0x22; 20]),
            Script::p2pk(&pubkey.serialize()),
            Script::p2pk(&pubkey.serialize_uncompressed()),
            // Non-special form falls back to the raw encoding.
            Script::p2wpkh(&hash160(&pubkey.serialize())),
            Script::new(),
        ] {
            let output = TxOut {
                value: 50 * COIN,
                script_pubkey: script,
            };
            assert_eq!(roundtrip(&output), output);
        }
    }

    #[test]
    fn special_forms_are_compact() {
        let output = TxOut {
            value: 0,
            script_pubkey: Script::p2pkh(&[0x33; 20]),
        };
        let mut buf = Vec::new();
        write_txout(&mut buf, &output);
        // 1 amount byte + size marker + 20-byte hash.
        assert_eq!(buf.len(), 22);
    }
}
