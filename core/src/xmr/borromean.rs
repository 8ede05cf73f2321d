// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Borromean (per-bit ring signature) range proofs over 64 bit amounts

use alloc::vec::Vec;

use rand_core::CryptoRngCore;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use crate::{
    crypto::{
        decode_point, encode_point, hash_to_scalar, random_scalar, sc_mulsub, scalarmult_base,
        xmr_h, EdwardsPoint, Identity, Key, Scalar,
    },
    engine::Error,
};

/// Number of amount bits covered
pub const ATOMS: usize = 64;

/// Serialized proof size, `s0[64] || s1[64] || ee || Ci[64]`
pub const RAW_SIZE: usize = 32 * (3 * ATOMS + 1);

/// Borromean range proof
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeSig {
    pub s0: Vec<Key>,
    pub s1: Vec<Key>,
    pub ee: Key,
    /// Per-bit commitments
    pub ci: Vec<Key>,
}

impl RangeSig {
    /// Serialize in the order hashed into the signed message
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(RAW_SIZE);
        for k in self.s0.iter().chain(self.s1.iter()) {
            b.extend_from_slice(k);
        }
        b.extend_from_slice(&self.ee);
        for k in &self.ci {
            b.extend_from_slice(k);
        }
        b
    }

    /// Parse a serialized proof
    pub fn from_bytes(b: &[u8]) -> Result<Self, Error> {
        if b.len() != RAW_SIZE {
            return Err(Error::InvalidLength);
        }

        let mut keys = b.chunks_exact(32).map(|c| {
            let mut k = [0u8; 32];
            k.copy_from_slice(c);
            k
        });

        let s0 = keys.by_ref().take(ATOMS).collect();
        let s1 = keys.by_ref().take(ATOMS).collect();
        let ee = keys.next().ok_or(Error::InvalidLength)?;
        let ci = keys.collect();

        Ok(Self { s0, s1, ee, ci })
    }
}

/// `2^i * H` for each bit
fn h_powers() -> Vec<EdwardsPoint> {
    let mut p = Vec::with_capacity(ATOMS);
    let mut h = xmr_h();
    for _ in 0..ATOMS {
        p.push(h);
        h = h + h;
    }
    p
}

/// Prove `amount` lies in `[0, 2^64)`, returning the commitment, its mask and the proof
///
/// When `last_mask` is provided the per-bit masks are chosen to sum to it,
/// otherwise the returned mask is random.
pub fn prove_range_chunked<R: CryptoRngCore + ?Sized>(
    amount: u64,
    last_mask: Option<&Scalar>,
    rng: &mut R,
) -> (EdwardsPoint, Scalar, RangeSig) {
    let h2 = h_powers();

    let mut ai = [Scalar::ZERO; ATOMS];
    let mut alpha = [Scalar::ZERO; ATOMS];
    let mut s1 = [Scalar::ZERO; ATOMS];
    let mut ci = [EdwardsPoint::identity(); ATOMS];

    let mut a_sum = Scalar::ZERO;
    let mut c_acc = EdwardsPoint::identity();
    let mut ee_hash = Keccak256::new();

    for ii in 0..ATOMS {
        let bit = (amount >> ii) & 1 == 1;

        ai[ii] = match (ii == ATOMS - 1, last_mask) {
            (true, Some(m)) => m - a_sum,
            _ => random_scalar(rng),
        };
        a_sum += ai[ii];

        alpha[ii] = random_scalar(rng);
        let mut l = scalarmult_base(&alpha[ii]);

        ci[ii] = scalarmult_base(&ai[ii]);
        if bit {
            ci[ii] += h2[ii];
        }
        c_acc += ci[ii];

        if !bit {
            s1[ii] = random_scalar(rng);
            let c = hash_to_scalar(&encode_point(&l));
            l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &(ci[ii] - h2[ii]), &s1[ii]);
        }

        ee_hash.update(encode_point(&l));
    }

    let ee = Scalar::from_bytes_mod_order(ee_hash.finalize().into());

    let mut s0 = [Scalar::ZERO; ATOMS];
    for ii in 0..ATOMS {
        if (amount >> ii) & 1 == 0 {
            s0[ii] = sc_mulsub(&ai[ii], &ee, &alpha[ii]);
        } else {
            s0[ii] = random_scalar(rng);
            let ll = EdwardsPoint::vartime_double_scalar_mul_basepoint(&ee, &ci[ii], &s0[ii]);
            let c = hash_to_scalar(&encode_point(&ll));
            s1[ii] = sc_mulsub(&ai[ii], &c, &alpha[ii]);
        }
    }

    ai.zeroize();
    alpha.zeroize();

    let sig = RangeSig {
        s0: s0.iter().map(Scalar::to_bytes).collect(),
        s1: s1.iter().map(Scalar::to_bytes).collect(),
        ee: ee.to_bytes(),
        ci: ci.iter().map(encode_point).collect(),
    };

    (c_acc, a_sum, sig)
}

/// Verify a Borromean range proof for commitment `c`
pub fn verify_range(c: &EdwardsPoint, sig: &RangeSig) -> bool {
    if sig.s0.len() != ATOMS || sig.s1.len() != ATOMS || sig.ci.len() != ATOMS {
        return false;
    }

    let h2 = h_powers();
    let scalar = |k: &Key| Option::<Scalar>::from(Scalar::from_canonical_bytes(*k));

    let ee = match scalar(&sig.ee) {
        Some(v) => v,
        None => return false,
    };

    let mut c_acc = EdwardsPoint::identity();
    let mut ee_hash = Keccak256::new();

    for ii in 0..ATOMS {
        let (ci, s0, s1) = match (decode_point(&sig.ci[ii]), scalar(&sig.s0[ii]), scalar(&sig.s1[ii])) {
            (Ok(ci), Some(s0), Some(s1)) => (ci, s0, s1),
            _ => return false,
        };
        c_acc += ci;

        let ll = EdwardsPoint::vartime_double_scalar_mul_basepoint(&ee, &ci, &s0);
        let c = hash_to_scalar(&encode_point(&ll));
        let lv = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &(ci - h2[ii]), &s1);

        ee_hash.update(encode_point(&lv));
    }

    c_acc == *c && Scalar::from_bytes_mod_order(ee_hash.finalize().into()) == ee
}
