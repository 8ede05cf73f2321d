// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Account credentials, key derivations, subaddresses and key images

use alloc::{collections::BTreeMap, vec::Vec};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::{Display, EnumString};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::varint;
use crate::{
    crypto::{
        encode_point, hash_to_point, hash_to_scalar_parts, keccak, mul8, scalarmult_base,
        EdwardsPoint, Key, Scalar,
    },
    engine::Error,
};

/// Subaddress secret derivation prefix (`"SubAddr\0"`)
const SUBADDR_PREFIX: &[u8] = b"SubAddr\0";

/// Network an account is bound to
#[derive(
    Copy, Clone, PartialEq, Debug, Display, EnumString, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Network {
    Mainnet = 0,
    Testnet = 1,
    Stagenet = 2,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

/// Subaddress index (`major`, `minor`)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubaddressIndex {
    pub major: u32,
    pub minor: u32,
}

impl SubaddressIndex {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Check whether this is the primary address index `(0, 0)`
    pub const fn is_primary(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

/// Lookup table from encoded subaddress spend public key to index
pub type SubaddressMap = BTreeMap<Key, SubaddressIndex>;

/// Account view / spend key pairs
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccountKeys {
    pub view_private: Scalar,
    pub spend_private: Scalar,
    pub view_public: EdwardsPoint,
    pub spend_public: EdwardsPoint,
    #[zeroize(skip)]
    pub network: Network,
}

impl AccountKeys {
    /// Derive account keys from a 32-byte seed, the spend key is the reduced
    /// seed and the view key is the reduced hash of the spend key
    pub fn from_seed(seed: &[u8; 32], network: Network) -> Self {
        let spend_private = Scalar::from_bytes_mod_order(*seed);
        let view_private = Scalar::from_bytes_mod_order(keccak(spend_private.as_bytes()));

        Self {
            view_public: scalarmult_base(&view_private),
            spend_public: scalarmult_base(&spend_private),
            view_private,
            spend_private,
            network,
        }
    }

    /// Compute the spend public key for a given subaddress index
    pub fn subaddress_spend_public(&self, index: SubaddressIndex) -> EdwardsPoint {
        if index.is_primary() {
            return self.spend_public;
        }
        subaddress_spend_public(&self.view_private, &self.spend_public, index)
    }

    /// Compute the subaddress spend keys for an account and a set of minor indices
    pub fn compute_subaddresses(&self, major: u32, minors: &[u32], map: &mut SubaddressMap) {
        for minor in minors {
            let index = SubaddressIndex::new(major, *minor);
            let d = self.subaddress_spend_public(index);
            map.insert(encode_point(&d), index);
        }
    }
}

impl core::fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccountKeys")
            .field("view_public", &self.view_public.compress())
            .field("spend_public", &self.spend_public.compress())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// `8 * (sec * pub)`
pub fn generate_key_derivation(public: &EdwardsPoint, secret: &Scalar) -> EdwardsPoint {
    mul8(&(public * secret))
}

/// `H_s(derivation || varint(index))`
pub fn derivation_to_scalar(derivation: &EdwardsPoint, index: u64) -> Scalar {
    let (b, n) = varint::to_bytes(index);
    hash_to_scalar_parts(&[&encode_point(derivation), &b[..n]])
}

/// One-time public key, `H_s(derivation || index) * G + base`
pub fn derive_public_key(derivation: &EdwardsPoint, index: u64, base: &EdwardsPoint) -> EdwardsPoint {
    scalarmult_base(&derivation_to_scalar(derivation, index)) + base
}

/// One-time secret key, `base + H_s(derivation || index)`
pub fn derive_secret_key(derivation: &EdwardsPoint, index: u64, base: &Scalar) -> Scalar {
    base + derivation_to_scalar(derivation, index)
}

/// Recover the subaddress spend key an output was sent to,
/// `out_key - H_s(derivation || index) * G`
pub fn derive_subaddress_public_key(
    out_key: &EdwardsPoint,
    derivation: &EdwardsPoint,
    index: u64,
) -> EdwardsPoint {
    out_key - scalarmult_base(&derivation_to_scalar(derivation, index))
}

/// Subaddress secret, `H_s("SubAddr\0" || view_sec || major || minor)`
pub fn subaddress_secret_key(view_private: &Scalar, index: SubaddressIndex) -> Scalar {
    hash_to_scalar_parts(&[
        SUBADDR_PREFIX,
        view_private.as_bytes(),
        &index.major.to_le_bytes(),
        &index.minor.to_le_bytes(),
    ])
}

/// Subaddress spend public key, `D = B + m * G`
pub fn subaddress_spend_public(
    view_private: &Scalar,
    spend_public: &EdwardsPoint,
    index: SubaddressIndex,
) -> EdwardsPoint {
    spend_public + scalarmult_base(&subaddress_secret_key(view_private, index))
}

/// Key image, `x * H_p(P)`
pub fn generate_key_image(public: &EdwardsPoint, secret: &Scalar) -> EdwardsPoint {
    hash_to_point(&encode_point(public)) * secret
}

/// Locate the subaddress receiving an output, checking the primary then
/// the matching additional derivation
pub fn is_out_to_account(
    subaddresses: &SubaddressMap,
    out_key: &EdwardsPoint,
    derivation: &EdwardsPoint,
    additional_derivations: &[EdwardsPoint],
    index: u64,
) -> Result<Option<(SubaddressIndex, EdwardsPoint)>, Error> {
    let d = derive_subaddress_public_key(out_key, derivation, index);
    if let Some(i) = subaddresses.get(&encode_point(&d)) {
        return Ok(Some((*i, *derivation)));
    }

    if additional_derivations.is_empty() {
        return Ok(None);
    }

    let additional = usize::try_from(index)
        .ok()
        .and_then(|i| additional_derivations.get(i))
        .ok_or(Error::InvalidIndex)?;

    let d = derive_subaddress_public_key(out_key, additional, index);
    Ok(subaddresses
        .get(&encode_point(&d))
        .map(|i| (*i, *additional)))
}

/// Spend secret and key image for an owned output
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OutputSecrets {
    /// One-time spend secret `x`
    pub secret: Scalar,
    /// Key image `x * H_p(P)`
    pub key_image: EdwardsPoint,
    /// Primary receive derivation `a * R`
    pub derivation: EdwardsPoint,
}

/// Compute the one-time spend secret and key image for an owned output,
/// failing with [Error::NoMatchingAddress] when the output is not ours
pub fn generate_key_image_helper(
    keys: &AccountKeys,
    subaddresses: &SubaddressMap,
    out_key: &EdwardsPoint,
    tx_public_key: &EdwardsPoint,
    additional_tx_public_keys: &[EdwardsPoint],
    index: u64,
) -> Result<OutputSecrets, Error> {
    let derivation = generate_key_derivation(tx_public_key, &keys.view_private);
    let additional: Vec<EdwardsPoint> = additional_tx_public_keys
        .iter()
        .map(|p| generate_key_derivation(p, &keys.view_private))
        .collect();

    let (sub_index, recv_derivation) =
        is_out_to_account(subaddresses, out_key, &derivation, &additional, index)?
            .ok_or(Error::NoMatchingAddress)?;

    let mut secret = derive_secret_key(&recv_derivation, index, &keys.spend_private);
    if !sub_index.is_primary() {
        secret += subaddress_secret_key(&keys.view_private, sub_index);
    }

    if &scalarmult_base(&secret) != out_key {
        secret.zeroize();
        return Err(Error::KeyMismatch);
    }

    Ok(OutputSecrets {
        key_image: generate_key_image(out_key, &secret),
        secret,
        derivation,
    })
}
