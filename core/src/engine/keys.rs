// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-transaction HMAC and encryption key schedule
//!
//! All subkeys are derived from a transaction master key as
//! `keccak2(root || tag || varint(index))`, with the HMAC and encryption
//! roots themselves derived from the master key.

use rand_core::CryptoRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::Error;
use crate::{
    crypto::{compute_hmac, encode_scalar, keccak, keccak2, random_scalar, KeccakSponge, Key, Scalar},
    xmr::{
        addr::Destination,
        to_vec,
        tsx_data::TsxData,
        tx::SourceEntry,
        varint,
    },
};

const TAG_HMAC: &[u8] = b"hmac";
const TAG_ENC: &[u8] = b"enc";

const TAG_TXIN: &[u8] = b"txin";
const TAG_TXIN_COMM: &[u8] = b"txin-comm";
const TAG_TXDEST: &[u8] = b"txdest";
const TAG_TXOUT: &[u8] = b"txout";

const TAG_TXIN_ALPHA: &[u8] = b"txin-alpha";
const TAG_TXIN_SPEND: &[u8] = b"txin-spend";
const TAG_COUT: &[u8] = b"cout";

/// Transaction key schedule
#[derive(Clone, Default, PartialEq, Zeroize, ZeroizeOnDrop)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxKeys {
    key_master: Key,
    key_hmac: Key,
    key_enc: Key,
}

impl core::fmt::Debug for TxKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("TxKeys(..)")
    }
}

/// `keccak2(root || tag || [varint(index)])`
fn subkey(root: &Key, tag: &[u8], index: Option<u64>) -> Key {
    let mut b = [0u8; 32 + 16 + varint::MAX_LEN];
    let mut n = 0;

    b[..32].copy_from_slice(root);
    n += 32;
    b[n..][..tag.len()].copy_from_slice(tag);
    n += tag.len();

    if let Some(i) = index {
        n += varint::encode(i, &mut b[n..]);
    }

    let k = keccak2(&b[..n]);
    b.zeroize();
    k
}

impl TxKeys {
    /// Derive the key schedule for a transaction,
    /// `master = keccak2(keccak(tsx_data || r || varint(ctr)) || random)`
    pub fn derive<R: CryptoRngCore + ?Sized>(
        tsx_data: &TsxData,
        tx_priv: &Scalar,
        tsx_ctr: u64,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let mut h = KeccakSponge::new();
        h.update(&to_vec(tsx_data)?)
            .update(tx_priv.as_bytes())
            .uvarint(tsx_ctr);
        let d = h.finalize();

        let mut salt = random_scalar(rng);
        let mut b = [0u8; 64];
        b[..32].copy_from_slice(&d);
        b[32..].copy_from_slice(&encode_scalar(&salt));
        let key_master = keccak2(&b);
        b.zeroize();
        salt.zeroize();

        Ok(Self::from_master(key_master))
    }

    /// Rebuild the HMAC and encryption roots from a master key
    pub fn from_master(key_master: Key) -> Self {
        let root = |tag: &[u8]| {
            let mut b = [0u8; 36];
            b[..tag.len()].copy_from_slice(tag);
            b[tag.len()..][..32].copy_from_slice(&key_master);
            let k = keccak2(&b[..tag.len() + 32]);
            b.zeroize();
            k
        };

        Self {
            key_hmac: root(TAG_HMAC),
            key_enc: root(TAG_ENC),
            key_master,
        }
    }

    pub fn hmac_key_txin(&self, idx: u64) -> Key {
        subkey(&self.key_hmac, TAG_TXIN, Some(idx))
    }

    /// Key for pseudo output HMACs
    pub fn hmac_key_txin_comm(&self, idx: u64) -> Key {
        subkey(&self.key_hmac, TAG_TXIN_COMM, Some(idx))
    }

    pub fn hmac_key_txdest(&self, idx: u64) -> Key {
        subkey(&self.key_hmac, TAG_TXDEST, Some(idx))
    }

    pub fn hmac_key_txout(&self, idx: u64) -> Key {
        subkey(&self.key_hmac, TAG_TXOUT, Some(idx))
    }

    /// Key for offloaded pseudo output masks
    pub fn enc_key_txin_alpha(&self, idx: u64) -> Key {
        subkey(&self.key_enc, TAG_TXIN_ALPHA, Some(idx))
    }

    /// Key for offloaded input spend secrets
    pub fn enc_key_spend(&self, idx: u64) -> Key {
        subkey(&self.key_enc, TAG_TXIN_SPEND, Some(idx))
    }

    /// Key for multisig MLSAG commitments, un-indexed for the whole transaction
    pub fn enc_key_cout(&self, idx: Option<u64>) -> Key {
        subkey(&self.key_enc, TAG_COUT, idx)
    }

    /// `HMAC(txin[idx], keccak(src_entr || vini))`
    pub fn gen_hmac_vini(&self, src_entr: &SourceEntry, vini: &[u8], idx: u64) -> Result<Key, Error> {
        let mut h = KeccakSponge::new();
        h.update(&to_vec(src_entr)?).update(vini);
        compute_hmac(&self.hmac_key_txin(idx), &h.finalize())
    }

    /// `HMAC(txout[idx], keccak(dst_entr || tx_out))`
    pub fn gen_hmac_vouti(&self, dst_entr: &Destination, tx_out: &[u8], idx: u64) -> Result<Key, Error> {
        let mut h = KeccakSponge::new();
        h.update(&to_vec(dst_entr)?).update(tx_out);
        compute_hmac(&self.hmac_key_txout(idx), &h.finalize())
    }

    /// `HMAC(txdest[idx], keccak(dst_entr))`
    pub fn gen_hmac_tsxdest(&self, dst_entr: &Destination, idx: u64) -> Result<Key, Error> {
        let d = keccak(&to_vec(dst_entr)?);
        compute_hmac(&self.hmac_key_txdest(idx), &d)
    }

    /// `HMAC(txin-comm[idx], pseudo_out)`
    pub fn gen_hmac_pseudo_out(&self, pseudo_out: &Key, idx: u64) -> Result<Key, Error> {
        compute_hmac(&self.hmac_key_txin_comm(idx), pseudo_out)
    }
}

/// Derive the key protecting transaction private keys for backup,
/// `HMAC(salt, keccak2((spend + rand_mult) || prefix_hash))`
pub fn compute_tx_key(spend_private: &Scalar, prefix_hash: &Key, salt: &Key, rand_mult: &Scalar) -> Result<Key, Error> {
    let mut rand_inp = spend_private + rand_mult;

    let mut b = [0u8; 64];
    b[..32].copy_from_slice(&encode_scalar(&rand_inp));
    b[32..].copy_from_slice(prefix_hash);
    let passwd = keccak2(&b);

    b.zeroize();
    rand_inp.zeroize();

    compute_hmac(salt, &passwd)
}
