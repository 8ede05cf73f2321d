// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Multilayered linkable spontaneous anonymous group signatures
//!
//! Matrices are indexed `[column][row]`, columns being ring members.
//! See <https://eprint.iacr.org/2015/1098> section 4.

use alloc::vec::Vec;

use rand_core::CryptoRngCore;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use super::{
    codec::{decode_via_reader, encode_via_writer, Reader, Writer},
    tx::{CtKey, MultisigKlrki},
};
use crate::{
    crypto::{
        decode_point, encode_point, hash_to_point, random_scalar, sc_mulsub, scalarmult_base,
        EdwardsPoint, Identity, Key, Scalar,
    },
    engine::{Error, MAX_RING_SIZE},
};

/// MLSAG signature
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MgSig {
    /// Responses, `[column][row]`
    pub ss: Vec<Vec<Key>>,
    /// Challenge for column zero
    pub cc: Key,
}

impl MgSig {
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.varint(self.ss.len() as u64)?;
        for c in &self.ss {
            w.keys(c)?;
        }
        w.put(&self.cc)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        let cols = r.count(MAX_RING_SIZE)?;
        let mut ss = Vec::with_capacity(cols);

        for _ in 0..cols {
            let rows = r.count(MAX_RING_SIZE)?;
            let mut c = Vec::with_capacity(rows);
            for _ in 0..rows {
                c.push(r.key()?);
            }
            ss.push(c);
        }

        Ok(Self { ss, cc: r.key()? })
    }
}

encode_via_writer!(MgSig);
decode_via_reader!(MgSig);

fn hash_point(h: &mut Keccak256, p: &EdwardsPoint) {
    h.update(encode_point(p));
}

fn challenge(h: Keccak256) -> Scalar {
    Scalar::from_bytes_mod_order(h.finalize().into())
}

fn check_matrix(pk: &[Vec<EdwardsPoint>]) -> Result<usize, Error> {
    let cols = pk.len();
    if cols <= 1 {
        return Err(Error::InvalidLength);
    }

    let rows = pk[0].len();
    if rows == 0 || pk.iter().any(|c| c.len() != rows) {
        return Err(Error::InvalidLength);
    }

    Ok(rows)
}

/// Generate an MLSAG over key matrix `pk` for secrets `xx` at column `index`,
/// linking the first `ds_rows` rows with key images.
///
/// Returns the signature and the final challenge (at the signer column).
pub fn gen_mlsag_ext<R: CryptoRngCore + ?Sized>(
    message: &Key,
    pk: &[Vec<EdwardsPoint>],
    xx: &[Scalar],
    klrki: Option<&MultisigKlrki>,
    index: usize,
    ds_rows: usize,
    rng: &mut R,
) -> Result<(MgSig, Scalar), Error> {
    let rows = check_matrix(pk)?;
    let cols = pk.len();

    if index >= cols {
        return Err(Error::InvalidIndex);
    }
    if xx.len() != rows || ds_rows > rows {
        return Err(Error::InvalidLength);
    }
    if klrki.is_some() {
        return Err(Error::Unsupported);
    }

    let mut ss = alloc::vec![alloc::vec![[0u8; 32]; rows]; cols];
    let mut ii = Vec::with_capacity(ds_rows);
    let mut alpha = Vec::with_capacity(rows);

    // Signer column commitments
    let mut h = Keccak256::new();
    h.update(message);

    for j in 0..ds_rows {
        let p = encode_point(&pk[index][j]);
        let hp = hash_to_point(&p);
        let a = random_scalar(rng);

        h.update(p);
        hash_point(&mut h, &scalarmult_base(&a));
        hash_point(&mut h, &(hp * a));

        ii.push(hp * xx[j]);
        alpha.push(a);
    }

    for j in ds_rows..rows {
        let a = random_scalar(rng);

        hash_point(&mut h, &pk[index][j]);
        hash_point(&mut h, &scalarmult_base(&a));

        alpha.push(a);
    }

    let mut c = challenge(h);
    let mut cc = Scalar::ZERO;

    // Walk the challenge chain from the column after the signer
    let mut i = (index + 1) % cols;
    if i == 0 {
        cc = c;
    }

    while i != index {
        let mut h = Keccak256::new();
        h.update(message);

        for j in 0..rows {
            let s = random_scalar(rng);
            let p = &pk[i][j];
            let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, p, &s);

            hash_point(&mut h, p);
            hash_point(&mut h, &l);

            if j < ds_rows {
                let hp = hash_to_point(&encode_point(p));
                hash_point(&mut h, &(hp * s + ii[j] * c));
            }

            ss[i][j] = s.to_bytes();
        }

        c = challenge(h);
        i = (i + 1) % cols;

        if i == 0 {
            cc = c;
        }
    }

    // Close the ring at the signer
    for j in 0..rows {
        ss[index][j] = sc_mulsub(&c, &xx[j], &alpha[j]).to_bytes();
    }
    alpha.zeroize();

    Ok((
        MgSig {
            ss,
            cc: cc.to_bytes(),
        },
        c,
    ))
}

/// Verify an MLSAG against key matrix `pk` and key images `ii` (one per linked row)
pub fn verify_mlsag(message: &Key, pk: &[Vec<EdwardsPoint>], sig: &MgSig, ii: &[Key]) -> bool {
    let rows = match check_matrix(pk) {
        Ok(r) => r,
        Err(_) => return false,
    };

    if sig.ss.len() != pk.len() || sig.ss.iter().any(|c| c.len() != rows) || ii.len() > rows {
        return false;
    }

    // Key images must be valid prime order points
    let mut images = Vec::with_capacity(ii.len());
    for k in ii {
        match decode_point(k) {
            Ok(p) if p.is_torsion_free() => images.push(p),
            _ => return false,
        }
    }

    let cc = match Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.cc)) {
        Some(v) => v,
        None => return false,
    };

    let mut c = cc;
    for (i, col) in pk.iter().enumerate() {
        let mut h = Keccak256::new();
        h.update(message);

        for (j, p) in col.iter().enumerate() {
            let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(sig.ss[i][j])) {
                Some(v) => v,
                None => return false,
            };
            let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, p, &s);

            hash_point(&mut h, p);
            hash_point(&mut h, &l);

            if let Some(img) = images.get(j) {
                let hp = hash_to_point(&encode_point(p));
                hash_point(&mut h, &(hp * s + img * c));
            }
        }

        c = challenge(h);
    }

    c == cc
}

/// Inputs for a full (aggregate) RingCT MLSAG
pub struct FullMgInputs<'a> {
    /// Ring members, `[column][input]`
    pub pubs: &'a [Vec<CtKey>],
    /// Input secrets, `(x, mask)` per input
    pub in_sk: &'a [(Scalar, Scalar)],
    pub out_sk_masks: &'a [Scalar],
    pub out_pk_masks: &'a [Key],
    /// `fee * H`
    pub fee_key: &'a EdwardsPoint,
}

/// Build the full RingCT key matrix with the commitment balance row appended
pub fn full_mg_matrix(
    pubs: &[Vec<CtKey>],
    out_pk_masks: &[Key],
    fee_key: &EdwardsPoint,
) -> Result<Vec<Vec<EdwardsPoint>>, Error> {
    if pubs.is_empty() || pubs[0].is_empty() {
        return Err(Error::InvalidLength);
    }
    let rows = pubs[0].len();

    let mut out_sum = *fee_key;
    for m in out_pk_masks {
        out_sum += decode_point(m)?;
    }

    let mut m = Vec::with_capacity(pubs.len());
    for col in pubs {
        if col.len() != rows {
            return Err(Error::InvalidLength);
        }

        let mut c = Vec::with_capacity(rows + 1);
        let mut balance = EdwardsPoint::identity();
        for k in col {
            c.push(decode_point(&k.dest)?);
            balance += decode_point(&k.mask)?;
        }
        c.push(balance - out_sum);
        m.push(c);
    }

    Ok(m)
}

/// Full RingCT MLSAG, proving ownership and balance for all inputs at once
pub fn prove_rct_mg<R: CryptoRngCore + ?Sized>(
    message: &Key,
    inputs: &FullMgInputs,
    index: usize,
    rng: &mut R,
) -> Result<(MgSig, Scalar), Error> {
    let m = full_mg_matrix(inputs.pubs, inputs.out_pk_masks, inputs.fee_key)?;
    let rows = m[0].len() - 1;

    if inputs.in_sk.len() != rows || inputs.out_sk_masks.len() != inputs.out_pk_masks.len() {
        return Err(Error::InvalidLength);
    }

    let mut sk = Vec::with_capacity(rows + 1);
    let mut balance = Scalar::ZERO;
    for (x, mask) in inputs.in_sk {
        sk.push(*x);
        balance += mask;
    }
    for mask in inputs.out_sk_masks {
        balance -= mask;
    }
    sk.push(balance);

    let r = gen_mlsag_ext(message, &m, &sk, None, index, rows, rng);
    sk.zeroize();
    r
}

/// Verify a full RingCT MLSAG
pub fn verify_rct_mg(
    message: &Key,
    pubs: &[Vec<CtKey>],
    out_pk_masks: &[Key],
    fee_key: &EdwardsPoint,
    sig: &MgSig,
    key_images: &[Key],
) -> bool {
    match full_mg_matrix(pubs, out_pk_masks, fee_key) {
        Ok(m) => verify_mlsag(message, &m, sig, key_images),
        Err(_) => false,
    }
}

/// Build the simple RingCT key matrix, `[P, C - pseudo_out]` per member
pub fn simple_mg_matrix(
    pubs: &[CtKey],
    pseudo_out: &EdwardsPoint,
) -> Result<Vec<Vec<EdwardsPoint>>, Error> {
    pubs.iter()
        .map(|k| Ok(alloc::vec![decode_point(&k.dest)?, decode_point(&k.mask)? - pseudo_out]))
        .collect()
}

/// Simple RingCT MLSAG for a single input against its pseudo output
///
/// `in_sk` is the `(x, mask)` pair for the real output, `alpha` the pseudo
/// output mask.
#[allow(clippy::too_many_arguments)]
pub fn prove_rct_mg_simple<R: CryptoRngCore + ?Sized>(
    message: &Key,
    pubs: &[CtKey],
    in_sk: &(Scalar, Scalar),
    alpha: &Scalar,
    pseudo_out: &EdwardsPoint,
    klrki: Option<&MultisigKlrki>,
    index: usize,
    rng: &mut R,
) -> Result<(MgSig, Scalar), Error> {
    let m = simple_mg_matrix(pubs, pseudo_out)?;

    let mut sk = [in_sk.0, in_sk.1 - alpha];
    let r = gen_mlsag_ext(message, &m, &sk, klrki, index, 1, rng);
    sk.zeroize();
    r
}

/// Verify a simple RingCT MLSAG
pub fn verify_rct_mg_simple(
    message: &Key,
    pubs: &[CtKey],
    pseudo_out: &EdwardsPoint,
    sig: &MgSig,
    key_image: &Key,
) -> bool {
    match simple_mg_matrix(pubs, pseudo_out) {
        Ok(m) => verify_mlsag(message, &m, sig, &[*key_image]),
        Err(_) => false,
    }
}
