// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction prefix structures, source entries and `tx.extra` helpers

use alloc::vec::Vec;

use super::{
    codec::{decode_via_reader, encode_via_writer, Reader, Writer},
    varint,
};
use crate::{
    crypto::{encode_point, encode_scalar, hash_to_scalar, keccak_parts, EdwardsPoint, Key, Scalar},
    engine::{Error, MAX_RING_SIZE},
};

/// Variant tag for `txin_to_key` inputs
pub const TXIN_TO_KEY_TAG: u8 = 0x02;

/// Variant tag for `txout_to_key` targets
pub const TXOUT_TO_KEY_TAG: u8 = 0x02;

/// `tx.extra` field tags
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_NONCE: u8 = 0x02;
pub const TX_EXTRA_TAG_ADDITIONAL_PUBKEYS: u8 = 0x04;

/// Nonce sub-tags for payment ids
pub const TX_EXTRA_NONCE_PAYMENT_ID: u8 = 0x00;
pub const TX_EXTRA_NONCE_ENCRYPTED_PAYMENT_ID: u8 = 0x01;

/// Domain separator for payment id encryption
const ENCRYPTED_PAYMENT_ID_TAIL: u8 = 0x8b;

/// Maximum additional transaction public keys accepted
const MAX_ADDITIONAL_KEYS: usize = 256;

/// Output public key and amount commitment pair
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CtKey {
    pub dest: Key,
    pub mask: Key,
}

impl CtKey {
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.put(&self.dest)?;
        w.put(&self.mask)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            dest: r.key()?,
            mask: r.key()?,
        })
    }
}

encode_via_writer!(CtKey);

/// Ring member, global output index and keys
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputEntry {
    pub index: u64,
    pub key: CtKey,
}

/// Multisig partial key image data
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MultisigKlrki {
    pub k: Key,
    pub l: Key,
    pub r: Key,
    pub ki: Key,
}

/// Transaction source entry, an owned output and its decoy ring
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceEntry {
    /// Ring members in ascending global index order
    pub outputs: Vec<OutputEntry>,
    /// Position of the real output in `outputs`
    pub real_output: u64,
    /// Transaction public key of the real output
    pub real_out_tx_key: Key,
    /// Additional transaction public keys of the real output
    pub real_out_additional_tx_keys: Vec<Key>,
    /// Index of the real output within its transaction
    pub real_output_in_tx_index: u64,
    pub amount: u64,
    pub rct: bool,
    /// Commitment mask of the real output
    pub mask: Key,
    pub multisig_klrki: Option<MultisigKlrki>,
}

impl SourceEntry {
    /// Fetch the real ring member
    pub fn real(&self) -> Result<&OutputEntry, Error> {
        usize::try_from(self.real_output)
            .ok()
            .and_then(|i| self.outputs.get(i))
            .ok_or(Error::InvalidIndex)
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.varint(self.outputs.len() as u64)?;
        for o in &self.outputs {
            w.varint(o.index)?;
            o.key.write(w)?;
        }

        w.u64(self.real_output)?;
        w.put(&self.real_out_tx_key)?;
        w.keys(&self.real_out_additional_tx_keys)?;
        w.u64(self.real_output_in_tx_index)?;
        w.u64(self.amount)?;
        w.bool(self.rct)?;
        w.put(&self.mask)?;

        let m = self.multisig_klrki.unwrap_or_default();
        w.put(&m.k)?;
        w.put(&m.l)?;
        w.put(&m.r)?;
        w.put(&m.ki)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        let n = r.count(MAX_RING_SIZE)?;
        let mut outputs = Vec::with_capacity(n);
        for _ in 0..n {
            let index = r.varint()?;
            let key = CtKey::read(r)?;
            outputs.push(OutputEntry { index, key });
        }

        let real_output = u64_le(r)?;
        let real_out_tx_key = r.key()?;

        let n = r.count(MAX_ADDITIONAL_KEYS)?;
        let mut real_out_additional_tx_keys = Vec::with_capacity(n);
        for _ in 0..n {
            real_out_additional_tx_keys.push(r.key()?);
        }

        let real_output_in_tx_index = u64_le(r)?;
        let amount = u64_le(r)?;
        let rct = r.byte()? != 0;
        let mask = r.key()?;

        let m = MultisigKlrki {
            k: r.key()?,
            l: r.key()?,
            r: r.key()?,
            ki: r.key()?,
        };

        Ok(Self {
            outputs,
            real_output,
            real_out_tx_key,
            real_out_additional_tx_keys,
            real_output_in_tx_index,
            amount,
            rct,
            mask,
            multisig_klrki: (m != MultisigKlrki::default()).then_some(m),
        })
    }
}

fn u64_le(r: &mut Reader) -> Result<u64, Error> {
    let mut b = [0u8; 8];
    b.copy_from_slice(r.take(8)?);
    Ok(u64::from_le_bytes(b))
}

encode_via_writer!(SourceEntry);
decode_via_reader!(SourceEntry);

/// Transaction input spending a ring of outputs (`txin_to_key`)
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxinToKey {
    pub amount: u64,
    /// Relative (delta encoded) global output offsets
    pub key_offsets: Vec<u64>,
    pub k_image: Key,
}

impl TxinToKey {
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.byte(TXIN_TO_KEY_TAG)?;
        w.varint(self.amount)?;
        w.varint(self.key_offsets.len() as u64)?;
        for o in &self.key_offsets {
            w.varint(*o)?;
        }
        w.put(&self.k_image)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        if r.byte()? != TXIN_TO_KEY_TAG {
            return Err(Error::EncodingFailed);
        }

        let amount = r.varint()?;
        let n = r.count(MAX_RING_SIZE)?;
        let mut key_offsets = Vec::with_capacity(n);
        for _ in 0..n {
            key_offsets.push(r.varint()?);
        }

        Ok(Self {
            amount,
            key_offsets,
            k_image: r.key()?,
        })
    }
}

encode_via_writer!(TxinToKey);
decode_via_reader!(TxinToKey);

/// Transaction output to a one-time key (`tx_out` with `txout_to_key` target)
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxOut {
    pub amount: u64,
    pub key: Key,
}

impl TxOut {
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.varint(self.amount)?;
        w.byte(TXOUT_TO_KEY_TAG)?;
        w.put(&self.key)
    }
}

encode_via_writer!(TxOut);

/// Masked amount and commitment mask for the recipient
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EcdhTuple {
    pub mask: Key,
    pub amount: Key,
}

impl EcdhTuple {
    /// Mask `(mask, amount)` under `amount_key`,
    /// `mask + H_s(k)` and `amount + H_s(H_s(k))`
    pub fn encode(mask: &Scalar, amount: u64, amount_key: &Scalar) -> Self {
        let (h1, h2) = ecdh_hashes(amount_key);

        Self {
            mask: encode_scalar(&(mask + h1)),
            amount: encode_scalar(&(Scalar::from(amount) + h2)),
        }
    }

    /// Recover `(mask, amount)` scalars using `amount_key`
    pub fn decode(&self, amount_key: &Scalar) -> (Scalar, Scalar) {
        let (h1, h2) = ecdh_hashes(amount_key);

        (
            Scalar::from_bytes_mod_order(self.mask) - h1,
            Scalar::from_bytes_mod_order(self.amount) - h2,
        )
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut b = [0u8; 64];
        b[..32].copy_from_slice(&self.mask);
        b[32..].copy_from_slice(&self.amount);
        b
    }
}

fn ecdh_hashes(amount_key: &Scalar) -> (Scalar, Scalar) {
    let h1 = hash_to_scalar(amount_key.as_bytes());
    let h2 = hash_to_scalar(h1.as_bytes());
    (h1, h2)
}

/// Convert absolute global output offsets to the relative form used on chain
pub fn absolute_output_offsets_to_relative(offsets: &[u64]) -> Vec<u64> {
    let mut r = offsets.to_vec();
    r.sort_unstable();

    for i in (1..r.len()).rev() {
        r[i] -= r[i - 1];
    }

    r
}

/// Encrypt an 8-byte payment id for the destination with view key `view_public`,
/// `id ^ keccak(8 * r * A || 0x8b)[..8]`
pub fn encrypt_payment_id(payment_id: &[u8; 8], view_public: &EdwardsPoint, r: &Scalar) -> [u8; 8] {
    let derivation = super::keys::generate_key_derivation(view_public, r);
    let h = keccak_parts(&[&encode_point(&derivation), &[ENCRYPTED_PAYMENT_ID_TAIL]]);

    let mut out = *payment_id;
    for (o, k) in out.iter_mut().zip(h.iter()) {
        *o ^= *k;
    }
    out
}

/// Incremental `tx.extra` builder
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxExtra(Vec<u8>);

impl TxExtra {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an extra nonce field, `0x02 len nonce`
    pub fn add_nonce(&mut self, nonce: &[u8]) -> Result<(), Error> {
        if nonce.len() > 255 {
            return Err(Error::InvalidLength);
        }
        self.0.push(TX_EXTRA_NONCE);
        self.0.push(nonce.len() as u8);
        self.0.extend_from_slice(nonce);
        Ok(())
    }

    /// Append a plain 32-byte payment id nonce
    pub fn add_payment_id(&mut self, payment_id: &[u8; 32]) -> Result<(), Error> {
        let mut n = [0u8; 33];
        n[0] = TX_EXTRA_NONCE_PAYMENT_ID;
        n[1..].copy_from_slice(payment_id);
        self.add_nonce(&n)
    }

    /// Append an (already encrypted) 8-byte payment id nonce
    pub fn add_encrypted_payment_id(&mut self, payment_id: &[u8; 8]) -> Result<(), Error> {
        let mut n = [0u8; 9];
        n[0] = TX_EXTRA_NONCE_ENCRYPTED_PAYMENT_ID;
        n[1..].copy_from_slice(payment_id);
        self.add_nonce(&n)
    }

    /// Append the transaction public key, `0x01 R`
    pub fn add_tx_pub_key(&mut self, key: &Key) {
        self.0.push(TX_EXTRA_TAG_PUBKEY);
        self.0.extend_from_slice(key);
    }

    /// Append additional transaction public keys, `0x04 varint(n) keys..`
    pub fn add_additional_tx_pub_keys(&mut self, keys: &[Key]) {
        self.0.push(TX_EXTRA_TAG_ADDITIONAL_PUBKEYS);

        let (b, n) = varint::to_bytes(keys.len() as u64);
        self.0.extend_from_slice(&b[..n]);

        for k in keys {
            self.0.extend_from_slice(k);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[cfg(test)]
mod test {
    use rand_core::OsRng;

    use super::*;
    use crate::{
        crypto::{random_scalar, scalarmult_base},
        xmr::codec::to_vec,
    };

    #[test]
    fn relative_offsets() {
        assert_eq!(
            absolute_output_offsets_to_relative(&[10, 3, 25, 4]),
            &[3, 1, 6, 15]
        );
        assert!(absolute_output_offsets_to_relative(&[]).is_empty());
    }

    #[test]
    fn txin_encoding() {
        let vin = TxinToKey {
            amount: 0,
            key_offsets: alloc::vec![300, 1, 2],
            k_image: [0x33; 32],
        };

        let b = to_vec(&vin).unwrap();
        assert_eq!(&b[..7], &[0x02, 0x00, 0x03, 0xac, 0x02, 0x01, 0x02]);
        assert_eq!(&b[7..], &[0x33; 32]);

        let (v1, n) = <TxinToKey as encdec::DecodeOwned>::decode_owned(&b).unwrap();
        assert_eq!(n, b.len());
        assert_eq!(v1, vin);

        // Unknown variant tags are rejected
        let mut c = b.clone();
        c[0] = 0xff;
        assert!(<TxinToKey as encdec::DecodeOwned>::decode_owned(&c).is_err());
    }

    #[test]
    fn txout_encoding() {
        let o = TxOut {
            amount: 0,
            key: [0x44; 32],
        };
        let b = to_vec(&o).unwrap();
        assert_eq!(b.len(), 34);
        assert_eq!(&b[..2], &[0x00, 0x02]);
    }

    #[test]
    fn ecdh_masking() {
        let k = random_scalar(&mut OsRng {});
        let mask = random_scalar(&mut OsRng {});

        let e = EcdhTuple::encode(&mask, 123_456_789, &k);
        let (m, a) = e.decode(&k);

        assert_eq!(m, mask);
        assert_eq!(a, Scalar::from(123_456_789u64));
    }

    #[test]
    fn payment_id_encryption() {
        let r = random_scalar(&mut OsRng {});
        let a = random_scalar(&mut OsRng {});
        let id = [1, 2, 3, 4, 5, 6, 7, 8];

        // Sender encrypts with r * A, receiver decrypts with a * R
        let enc = encrypt_payment_id(&id, &scalarmult_base(&a), &r);
        assert_ne!(enc, id);
        assert_eq!(encrypt_payment_id(&enc, &scalarmult_base(&r), &a), id);
    }

    #[test]
    fn extra_layout() {
        let mut e = TxExtra::new();
        e.add_encrypted_payment_id(&[0xaa; 8]).unwrap();
        e.add_tx_pub_key(&[0x11; 32]);
        e.add_additional_tx_pub_keys(&[[0x22; 32], [0x33; 32]]);

        let b = e.as_bytes();
        assert_eq!(&b[..3], &[0x02, 0x09, 0x01]);
        assert_eq!(b[11], 0x01);
        assert_eq!(&b[44..46], &[0x04, 0x02]);
        assert_eq!(b.len(), 11 + 33 + 2 + 64);
    }

    #[test]
    fn source_entry_round_trip() {
        let s = SourceEntry {
            outputs: alloc::vec![
                OutputEntry {
                    index: 7,
                    key: CtKey {
                        dest: [1; 32],
                        mask: [2; 32]
                    }
                };
                3
            ],
            real_output: 1,
            real_out_tx_key: [3; 32],
            real_out_additional_tx_keys: alloc::vec![[4; 32]],
            real_output_in_tx_index: 2,
            amount: 1000,
            rct: true,
            mask: [5; 32],
            multisig_klrki: None,
        };

        let b = to_vec(&s).unwrap();
        let (s1, n) = <SourceEntry as encdec::DecodeOwned>::decode_owned(&b).unwrap();
        assert_eq!(n, b.len());
        assert_eq!(s1, s);
    }

    #[test]
    fn real_output_bounds() {
        let mut s = SourceEntry {
            outputs: alloc::vec![OutputEntry::default(); 2],
            real_output: 1,
            ..Default::default()
        };
        assert!(s.real().is_ok());

        for i in [2, (1u64 << 32) + 1, u64::MAX] {
            s.real_output = i;
            assert_eq!(s.real().err(), Some(Error::InvalidIndex), "{i}");
        }
    }
}
