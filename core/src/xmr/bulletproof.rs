// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Aggregate bulletproof range proofs (original 2018 construction)
//!
//! Commitments and proof points are stored multiplied by `1/8` and
//! cofactor-cleared again on verification.

#![allow(non_snake_case)]

use alloc::vec::Vec;

use curve25519_dalek::traits::{IsIdentity, MultiscalarMul, VartimeMultiscalarMul};
use rand_core::CryptoRngCore;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use super::{
    codec::{decode_via_reader, encode_via_writer, Reader, Writer},
    varint,
};
use crate::{
    crypto::{
        decode_point, encode_point, hash_to_point, hash_to_scalar, inv_eight, keccak, mul8,
        random_scalar, scalarmult_base, xmr_h, EdwardsPoint, KeccakSponge, Key, Scalar, H_ENC,
    },
    engine::{Error, MAX_BULLETPROOF_BATCH},
};

/// Bits per amount
pub const N: usize = 64;

/// Maximum inner product rounds, `log2(N * MAX_BULLETPROOF_BATCH)`
const MAX_ROUNDS: usize = 10;

/// Generator domain separator
const EXPONENT_DST: &[u8] = b"bulletproof";

/// Aggregate range proof over one or more commitments
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bulletproof {
    /// Commitments (times `1/8`), not part of the serialized proof
    pub V: Vec<Key>,
    pub A: Key,
    pub S: Key,
    pub T1: Key,
    pub T2: Key,
    pub taux: Key,
    pub mu: Key,
    pub L: Vec<Key>,
    pub R: Vec<Key>,
    pub a: Key,
    pub b: Key,
    pub t: Key,
}

impl Bulletproof {
    /// Absorb proof fields in signed message order
    pub fn digest_into(&self, h: &mut KeccakSponge) {
        for k in [&self.A, &self.S, &self.T1, &self.T2, &self.taux, &self.mu] {
            h.update(k);
        }
        for k in self.L.iter().chain(self.R.iter()) {
            h.update(k);
        }
        for k in [&self.a, &self.b, &self.t] {
            h.update(k);
        }
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        for k in [&self.A, &self.S, &self.T1, &self.T2, &self.taux, &self.mu] {
            w.put(k)?;
        }
        w.keys(&self.L)?;
        w.keys(&self.R)?;
        for k in [&self.a, &self.b, &self.t] {
            w.put(k)?;
        }
        Ok(())
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        let mut p = Bulletproof {
            A: r.key()?,
            S: r.key()?,
            T1: r.key()?,
            T2: r.key()?,
            taux: r.key()?,
            mu: r.key()?,
            ..Default::default()
        };

        for v in [&mut p.L, &mut p.R] {
            let n = r.count(MAX_ROUNDS)?;
            for _ in 0..n {
                v.push(r.key()?);
            }
        }

        p.a = r.key()?;
        p.b = r.key()?;
        p.t = r.key()?;

        Ok(p)
    }
}

encode_via_writer!(Bulletproof);
decode_via_reader!(Bulletproof);

/// Vector generators `G_i`, `H_i`
struct Generators {
    g: Vec<EdwardsPoint>,
    h: Vec<EdwardsPoint>,
}

impl Generators {
    fn new(n: usize) -> Self {
        let exponent = |i: u64| {
            let (v, l) = varint::to_bytes(i);
            let mut b = Vec::with_capacity(32 + EXPONENT_DST.len() + l);
            b.extend_from_slice(&H_ENC);
            b.extend_from_slice(EXPONENT_DST);
            b.extend_from_slice(&v[..l]);
            hash_to_point(&keccak(&b))
        };

        Self {
            h: (0..n as u64).map(|i| exponent(2 * i)).collect(),
            g: (0..n as u64).map(|i| exponent(2 * i + 1)).collect(),
        }
    }
}

/// Fiat-Shamir transcript, `H_s(cache || keys..)`
fn mash(cache: &Scalar, keys: &[&Key]) -> Scalar {
    let mut h = Keccak256::new();
    h.update(cache.as_bytes());
    for k in keys {
        h.update(k);
    }
    Scalar::from_bytes_mod_order(h.finalize().into())
}

fn powers(x: &Scalar, n: usize) -> Vec<Scalar> {
    let mut p = Vec::with_capacity(n);
    let mut v = Scalar::ONE;
    for _ in 0..n {
        p.push(v);
        v *= x;
    }
    p
}

fn inner_product(a: &[Scalar], b: &[Scalar]) -> Scalar {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Aggregated size and inner product rounds for `m` commitments
fn dimensions(m: usize) -> Result<(usize, usize), Error> {
    if m == 0 || m > MAX_BULLETPROOF_BATCH {
        return Err(Error::InvalidLength);
    }
    let mn = m.next_power_of_two() * N;
    Ok((mn, mn.trailing_zeros() as usize))
}

/// `z^(2+j) * 2^k` terms for bit `i = j * N + k`
fn zero_twos(z: &Scalar, mn: usize) -> Vec<Scalar> {
    let zpow = powers(z, mn / N + 2);
    let two_n = powers(&Scalar::from(2u64), N);

    (0..mn).map(|i| zpow[2 + i / N] * two_n[i % N]).collect()
}

fn nonzero(s: Scalar) -> Result<Scalar, Error> {
    match s == Scalar::ZERO {
        true => Err(Error::RangeProofFailed),
        false => Ok(s),
    }
}

/// Compute `V_j = (gamma_j * G + v_j * H) / 8`
pub fn commitments_inv8(amounts: &[u64], masks: &[Scalar]) -> Vec<Key> {
    let inv8 = inv_eight();
    let h = xmr_h();

    amounts
        .iter()
        .zip(masks.iter())
        .map(|(v, gamma)| encode_point(&((scalarmult_base(gamma) + h * Scalar::from(*v)) * inv8)))
        .collect()
}

/// Prove `amounts` with blinding `masks` in a single aggregate proof
pub fn prove_batch<R: CryptoRngCore + ?Sized>(
    amounts: &[u64],
    masks: &[Scalar],
    rng: &mut R,
) -> Result<Bulletproof, Error> {
    if amounts.len() != masks.len() {
        return Err(Error::InvalidLength);
    }
    let (mn, rounds) = dimensions(amounts.len())?;

    let gens = Generators::new(mn);
    let inv8 = inv_eight();
    let h = xmr_h();
    let g = scalarmult_base(&Scalar::ONE);

    let V = commitments_inv8(amounts, masks);

    // Bit decomposition, padded outputs are zero
    let mut aL = alloc::vec![Scalar::ZERO; mn];
    let mut aR = alloc::vec![Scalar::ZERO; mn];
    for i in 0..mn {
        let v = amounts.get(i / N).copied().unwrap_or(0);
        let bit = (v >> (i % N)) & 1;
        aL[i] = Scalar::from(bit);
        aR[i] = aL[i] - Scalar::ONE;
    }

    let mut cache = {
        let mut h = Keccak256::new();
        for v in &V {
            h.update(v);
        }
        Scalar::from_bytes_mod_order(h.finalize().into())
    };

    let mut alpha = random_scalar(rng);
    let A = EdwardsPoint::multiscalar_mul(
        aL.iter().chain(aR.iter()).chain(core::iter::once(&alpha)),
        gens.g.iter().chain(gens.h.iter()).chain(core::iter::once(&g)),
    ) * inv8;

    let mut sL: Vec<Scalar> = (0..mn).map(|_| random_scalar(rng)).collect();
    let mut sR: Vec<Scalar> = (0..mn).map(|_| random_scalar(rng)).collect();
    let mut rho = random_scalar(rng);
    let S = EdwardsPoint::multiscalar_mul(
        sL.iter().chain(sR.iter()).chain(core::iter::once(&rho)),
        gens.g.iter().chain(gens.h.iter()).chain(core::iter::once(&g)),
    ) * inv8;

    let A = encode_point(&A);
    let S = encode_point(&S);

    let y = nonzero(mash(&cache, &[&A, &S]))?;
    let z = nonzero(hash_to_scalar(y.as_bytes()))?;
    cache = z;

    let y_mn = powers(&y, mn);
    let zt = zero_twos(&z, mn);

    let l0: Vec<Scalar> = aL.iter().map(|v| v - z).collect();
    let r0: Vec<Scalar> = (0..mn).map(|i| (aR[i] + z) * y_mn[i] + zt[i]).collect();
    let r1: Vec<Scalar> = (0..mn).map(|i| sR[i] * y_mn[i]).collect();

    let t1 = inner_product(&l0, &r1) + inner_product(&sL, &r0);
    let t2 = inner_product(&sL, &r1);

    let mut tau1 = random_scalar(rng);
    let mut tau2 = random_scalar(rng);
    let T1 = encode_point(&((h * t1 + scalarmult_base(&tau1)) * inv8));
    let T2 = encode_point(&((h * t2 + scalarmult_base(&tau2)) * inv8));

    let x = nonzero(mash(&cache, &[&T1, &T2]))?;
    cache = x;

    let zpow = powers(&z, masks.len() + 2);
    let mut taux = tau1 * x + tau2 * x * x;
    for (j, gamma) in masks.iter().enumerate() {
        taux += zpow[j + 2] * gamma;
    }
    let mu = x * rho + alpha;

    let mut l: Vec<Scalar> = (0..mn).map(|i| l0[i] + sL[i] * x).collect();
    let mut r: Vec<Scalar> = (0..mn).map(|i| r0[i] + r1[i] * x).collect();
    let t = inner_product(&l, &r);

    let taux_k = taux.to_bytes();
    let mu_k = mu.to_bytes();
    let t_k = t.to_bytes();

    let x_ip = nonzero(mash(&cache, &[&taux_k, &mu_k, &t_k]))?;
    cache = x_ip;

    // Inner product argument
    let y_inv = y.invert();
    let mut Gp = gens.g;
    let mut Hp: Vec<EdwardsPoint> = gens
        .h
        .iter()
        .zip(powers(&y_inv, mn).iter())
        .map(|(p, s)| p * s)
        .collect();

    let mut L = Vec::with_capacity(rounds);
    let mut R = Vec::with_capacity(rounds);
    let mut n = mn;

    while n > 1 {
        n /= 2;

        let cL = inner_product(&l[..n], &r[n..]);
        let cR = inner_product(&l[n..], &r[..n]);

        let Li = EdwardsPoint::multiscalar_mul(
            l[..n].iter().chain(r[n..].iter()).chain(core::iter::once(&(cL * x_ip))),
            Gp[n..].iter().chain(Hp[..n].iter()).chain(core::iter::once(&h)),
        ) * inv8;
        let Ri = EdwardsPoint::multiscalar_mul(
            l[n..].iter().chain(r[..n].iter()).chain(core::iter::once(&(cR * x_ip))),
            Gp[..n].iter().chain(Hp[n..].iter()).chain(core::iter::once(&h)),
        ) * inv8;

        let Li = encode_point(&Li);
        let Ri = encode_point(&Ri);

        let w = nonzero(mash(&cache, &[&Li, &Ri]))?;
        cache = w;
        let w_inv = w.invert();

        for i in 0..n {
            Gp[i] = EdwardsPoint::vartime_multiscalar_mul([w_inv, w], [Gp[i], Gp[n + i]]);
            Hp[i] = EdwardsPoint::vartime_multiscalar_mul([w, w_inv], [Hp[i], Hp[n + i]]);
            l[i] = w * l[i] + w_inv * l[n + i];
            r[i] = w_inv * r[i] + w * r[n + i];
        }
        Gp.truncate(n);
        Hp.truncate(n);
        l.truncate(n);
        r.truncate(n);

        L.push(Li);
        R.push(Ri);
    }

    let proof = Bulletproof {
        V,
        A,
        S,
        T1,
        T2,
        taux: taux_k,
        mu: mu_k,
        L,
        R,
        a: l[0].to_bytes(),
        b: r[0].to_bytes(),
        t: t_k,
    };

    alpha.zeroize();
    rho.zeroize();
    tau1.zeroize();
    tau2.zeroize();
    sL.zeroize();
    sR.zeroize();
    aL.zeroize();
    taux.zeroize();

    Ok(proof)
}

fn canonical(k: &Key) -> Result<Scalar, Error> {
    Option::from(Scalar::from_canonical_bytes(*k)).ok_or(Error::RangeProofFailed)
}

fn point8(k: &Key) -> Result<EdwardsPoint, Error> {
    decode_point(k)
        .map(|p| mul8(&p))
        .map_err(|_| Error::RangeProofFailed)
}

/// Verify an aggregate range proof against its commitments `V`
pub fn verify(p: &Bulletproof) -> Result<(), Error> {
    let (mn, rounds) = dimensions(p.V.len()).map_err(|_| Error::RangeProofFailed)?;
    if p.L.len() != rounds || p.R.len() != rounds {
        return Err(Error::RangeProofFailed);
    }

    let taux = canonical(&p.taux)?;
    let mu = canonical(&p.mu)?;
    let a = canonical(&p.a)?;
    let b = canonical(&p.b)?;
    let t = canonical(&p.t)?;

    let V = p.V.iter().map(point8).collect::<Result<Vec<_>, _>>()?;
    let A = point8(&p.A)?;
    let S = point8(&p.S)?;
    let T1 = point8(&p.T1)?;
    let T2 = point8(&p.T2)?;
    let L = p.L.iter().map(point8).collect::<Result<Vec<_>, _>>()?;
    let R = p.R.iter().map(point8).collect::<Result<Vec<_>, _>>()?;

    // Rebuild the transcript
    let cache = {
        let mut h = Keccak256::new();
        for v in &p.V {
            h.update(v);
        }
        Scalar::from_bytes_mod_order(h.finalize().into())
    };
    let y = nonzero(mash(&cache, &[&p.A, &p.S]))?;
    let z = nonzero(hash_to_scalar(y.as_bytes()))?;
    let x = nonzero(mash(&z, &[&p.T1, &p.T2]))?;
    let x_ip = nonzero(mash(&x, &[&p.taux, &p.mu, &p.t]))?;

    let mut w = Vec::with_capacity(rounds);
    let mut cache = x_ip;
    for (l, r) in p.L.iter().zip(p.R.iter()) {
        cache = nonzero(mash(&cache, &[l, r]))?;
        w.push(cache);
    }
    let w_inv: Vec<Scalar> = w.iter().map(Scalar::invert).collect();

    let h = xmr_h();
    let g = scalarmult_base(&Scalar::ONE);
    let m = mn / N;

    // Polynomial check,
    // t*H + taux*G == sum(z^(2+j) V_j) + delta(y, z)*H + x*T1 + x^2*T2
    let y_mn = powers(&y, mn);
    let zpow = powers(&z, m + 3);
    let sum_y: Scalar = y_mn.iter().sum();
    let sum_z3: Scalar = (0..m).map(|j| zpow[j + 3]).sum();
    let delta = (z - zpow[2]) * sum_y - sum_z3 * Scalar::from(u64::MAX);

    let check1 = EdwardsPoint::vartime_multiscalar_mul(
        V.iter()
            .enumerate()
            .map(|(j, _)| zpow[j + 2])
            .chain([delta - t, x, x * x, -taux]),
        V.iter().chain([&h, &T1, &T2, &g]),
    );
    if !check1.is_identity() {
        return Err(Error::RangeProofFailed);
    }

    // Inner product check
    let y_inv_mn = powers(&y.invert(), mn);
    let zt = zero_twos(&z, mn);

    let s: Vec<Scalar> = (0..mn)
        .map(|i| {
            (0..rounds)
                .map(|j| match (i >> (rounds - 1 - j)) & 1 {
                    1 => w[j],
                    _ => w_inv[j],
                })
                .product()
        })
        .collect();

    let g_scalars = s.iter().map(|s_i| -z - a * s_i);
    let h_scalars =
        (0..mn).map(|i| z + (zt[i] - b * s[mn - 1 - i]) * y_inv_mn[i]);

    let gens = Generators::new(mn);

    let check2 = EdwardsPoint::vartime_multiscalar_mul(
        [Scalar::ONE, x, -mu, (t - a * b) * x_ip]
            .into_iter()
            .chain(w.iter().map(|v| v * v))
            .chain(w_inv.iter().map(|v| v * v))
            .chain(g_scalars)
            .chain(h_scalars),
        [&A, &S, &g, &h]
            .into_iter()
            .chain(L.iter())
            .chain(R.iter())
            .chain(gens.g.iter())
            .chain(gens.h.iter()),
    );
    if !check2.is_identity() {
        return Err(Error::RangeProofFailed);
    }

    Ok(())
}
