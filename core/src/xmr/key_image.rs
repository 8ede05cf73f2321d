// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Key image export helpers for watch-only wallet synchronisation

use alloc::vec::Vec;

use rand_core::CryptoRngCore;

use super::{
    keys::{generate_key_image_helper, AccountKeys, SubaddressMap},
    ring_sig::{generate_ring_signature, Signature},
};
use crate::{
    crypto::{decode_point, encode_point, KeccakSponge, Key},
    engine::Error,
};

/// Owned output description supplied by the host for key image export
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferDetails {
    pub out_key: Key,
    pub tx_pub_key: Key,
    pub additional_tx_pub_keys: Vec<Key>,
    pub internal_output_index: u64,
}

impl TransferDetails {
    /// Per-item sync hash,
    /// `H(out_key || tx_pub || additional.. || varint(index))`
    pub fn compute_hash(&self) -> Key {
        let mut h = KeccakSponge::new();
        h.update(&self.out_key).update(&self.tx_pub_key);
        for k in &self.additional_tx_pub_keys {
            h.update(k);
        }
        h.uvarint(self.internal_output_index);
        h.finalize()
    }
}

/// Exported key image with its ownership proof
#[derive(Clone, PartialEq, Debug)]
pub struct ExportedKeyImage {
    pub key_image: Key,
    pub signature: Signature,
}

impl ExportedKeyImage {
    /// `ki || c || r`
    pub fn to_bytes(&self) -> [u8; 96] {
        let mut b = [0u8; 96];
        b[..32].copy_from_slice(&self.key_image);
        b[32..].copy_from_slice(&self.signature.to_bytes());
        b
    }
}

/// Compute the key image for an owned output and sign it with a ring of one
pub fn export_key_image<R: CryptoRngCore + ?Sized>(
    keys: &AccountKeys,
    subaddresses: &SubaddressMap,
    td: &TransferDetails,
    rng: &mut R,
) -> Result<ExportedKeyImage, Error> {
    let out_key = decode_point(&td.out_key)?;
    let tx_pub = decode_point(&td.tx_pub_key)?;
    let additional = td
        .additional_tx_pub_keys
        .iter()
        .map(decode_point)
        .collect::<Result<Vec<_>, _>>()?;

    let secrets = generate_key_image_helper(
        keys,
        subaddresses,
        &out_key,
        &tx_pub,
        &additional,
        td.internal_output_index,
    )?;

    let key_image = encode_point(&secrets.key_image);
    let sigs = generate_ring_signature(
        &key_image,
        &secrets.key_image,
        &[out_key],
        &secrets.secret,
        0,
        rng,
    )?;

    let signature = sigs.first().copied().ok_or(Error::Unknown)?;

    Ok(ExportedKeyImage {
        key_image,
        signature,
    })
}
