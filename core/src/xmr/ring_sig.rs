// Copyright (c) 2022-2023 The MobileCoin Foundation

//! CryptoNote (non-linkable layout) ring signatures, used to prove key
//! image ownership on export

use alloc::vec::Vec;

use rand_core::CryptoRngCore;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use crate::{
    crypto::{
        decode_point, encode_point, hash_to_point, random_scalar, sc_mulsub, scalarmult_base,
        EdwardsPoint, Key, Scalar,
    },
    engine::Error,
};

/// Ring signature element `(c, r)`
#[derive(Copy, Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signature {
    pub c: Key,
    pub r: Key,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut b = [0u8; 64];
        b[..32].copy_from_slice(&self.c);
        b[32..].copy_from_slice(&self.r);
        b
    }
}

/// Generate a ring signature over `prefix_hash` for key image `image`,
/// with `sec` the secret for `pubs[sec_index]`
pub fn generate_ring_signature<R: CryptoRngCore + ?Sized>(
    prefix_hash: &Key,
    image: &EdwardsPoint,
    pubs: &[EdwardsPoint],
    sec: &Scalar,
    sec_index: usize,
    rng: &mut R,
) -> Result<Vec<Signature>, Error> {
    if sec_index >= pubs.len() {
        return Err(Error::InvalidIndex);
    }

    let mut h = Keccak256::new();
    h.update(prefix_hash);

    let mut sigs = alloc::vec![(Scalar::ZERO, Scalar::ZERO); pubs.len()];
    let mut sum = Scalar::ZERO;
    let mut k = Scalar::ZERO;

    for (i, p) in pubs.iter().enumerate() {
        let hp = hash_to_point(&encode_point(p));

        let (a, b) = if i == sec_index {
            k = random_scalar(rng);
            (scalarmult_base(&k), hp * k)
        } else {
            let c = random_scalar(rng);
            let r = random_scalar(rng);
            sum += c;
            sigs[i] = (c, r);

            (
                EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, p, &r),
                hp * r + image * c,
            )
        };

        h.update(encode_point(&a));
        h.update(encode_point(&b));
    }

    let hc = Scalar::from_bytes_mod_order(h.finalize().into());
    let c = hc - sum;
    sigs[sec_index] = (c, sc_mulsub(&c, sec, &k));
    k.zeroize();

    Ok(sigs
        .into_iter()
        .map(|(c, r)| Signature {
            c: c.to_bytes(),
            r: r.to_bytes(),
        })
        .collect())
}

/// Check a ring signature, rejecting key images outside the prime order subgroup
pub fn check_ring_signature(
    prefix_hash: &Key,
    image: &Key,
    pubs: &[EdwardsPoint],
    sigs: &[Signature],
) -> bool {
    if pubs.is_empty() || pubs.len() != sigs.len() {
        return false;
    }

    let image = match decode_point(image) {
        Ok(p) if p.is_torsion_free() => p,
        _ => return false,
    };

    let mut h = Keccak256::new();
    h.update(prefix_hash);

    let mut sum = Scalar::ZERO;
    for (p, s) in pubs.iter().zip(sigs.iter()) {
        let (c, r) = match (
            Option::<Scalar>::from(Scalar::from_canonical_bytes(s.c)),
            Option::<Scalar>::from(Scalar::from_canonical_bytes(s.r)),
        ) {
            (Some(c), Some(r)) => (c, r),
            _ => return false,
        };

        let hp = hash_to_point(&encode_point(p));
        let a = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, p, &r);
        let b = hp * r + image * c;

        h.update(encode_point(&a));
        h.update(encode_point(&b));
        sum += c;
    }

    let hc = Scalar::from_bytes_mod_order(h.finalize().into());
    hc == sum
}
