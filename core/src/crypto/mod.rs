// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Scalar / point arithmetic over ed25519 with the Monero conventions
//! (Keccak-256 hashing, the `H` generator for amounts, cofactor clearing).
//!
//! Every decode from host-supplied bytes is checked, points must be
//! canonical encodings of valid curve points and scalars must be fully
//! reduced.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use hmac::{Hmac, Mac};
use rand_core::CryptoRngCore;
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

pub use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::{Identity, IsIdentity, VartimeMultiscalarMul},
};

use crate::engine::Error;

pub mod chacha;

mod keccak;
pub use keccak::KeccakSponge;

/// Encoded 32-byte key (point or scalar)
pub type Key = [u8; 32];

/// Encoded identity point
pub const IDENTITY_ENC: Key = {
    let mut k = [0u8; 32];
    k[0] = 1;
    k
};

/// Second generator `H` for amount commitments
pub const H_ENC: Key = [
    0x8b, 0x65, 0x59, 0x70, 0x15, 0x37, 0x99, 0xaf, 0x2a, 0xea, 0xdc, 0x9f, 0xf1, 0xad, 0xd0, 0xea,
    0x6c, 0x72, 0x51, 0xd5, 0x41, 0x54, 0xcf, 0xa9, 0x2c, 0x17, 0x3a, 0x0d, 0xd3, 0x9c, 0x1f, 0x94,
];

/// HMAC over Keccak-256
pub type HmacKeccak = Hmac<Keccak256>;

/// Keccak-256 (pre-standard padding, as used by CryptoNote)
pub fn keccak(data: &[u8]) -> Key {
    Keccak256::digest(data).into()
}

/// Keccak-256 over a set of data chunks
pub fn keccak_parts(parts: &[&[u8]]) -> Key {
    let mut h = Keccak256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

/// Double Keccak-256, `keccak(keccak(data))`
pub fn keccak2(data: &[u8]) -> Key {
    keccak(&keccak(data))
}

/// `H_s(data)`, Keccak-256 reduced modulo the group order
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak(data))
}

/// `H_s` over a set of data chunks
pub fn hash_to_scalar_parts(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak_parts(parts))
}

/// `H_p(key)`, deterministic hash to a prime order point
/// (`ge_fromfe_frombytes_vartime(keccak(key))`, cofactor cleared)
pub fn hash_to_point(key: &Key) -> EdwardsPoint {
    monero_generators::hash_to_point(*key)
}

/// Fetch the `H` generator
pub fn xmr_h() -> EdwardsPoint {
    // Constant is a valid encoding, identity fallback is unreachable
    CompressedEdwardsY(H_ENC)
        .decompress()
        .unwrap_or_else(EdwardsPoint::identity)
}

/// Multiplicative inverse of eight, applied to points that are later
/// multiplied by the cofactor on verification
pub fn inv_eight() -> Scalar {
    Scalar::from(8u64).invert()
}

/// Clear the cofactor
pub fn mul8(p: &EdwardsPoint) -> EdwardsPoint {
    p.mul_by_cofactor()
}

/// Generate a uniformly random scalar
pub fn random_scalar<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Scalar {
    Scalar::random(rng)
}

/// Decode a scalar, rejecting non-canonical representations (`sc_check`)
pub fn decode_scalar(k: &Key) -> Result<Scalar, Error> {
    Option::from(Scalar::from_canonical_bytes(*k)).ok_or(Error::InvalidScalar)
}

/// Decode a compressed point, rejecting invalid or non-canonical encodings
pub fn decode_point(k: &Key) -> Result<EdwardsPoint, Error> {
    let p = CompressedEdwardsY(*k)
        .decompress()
        .ok_or(Error::InvalidPoint)?;

    // Reject alternate encodings of the same point
    if p.compress().as_bytes() != k {
        return Err(Error::InvalidPoint);
    }

    Ok(p)
}

/// Encode a point to compressed form
pub fn encode_point(p: &EdwardsPoint) -> Key {
    p.compress().to_bytes()
}

/// Encode a scalar
pub fn encode_scalar(s: &Scalar) -> Key {
    s.to_bytes()
}

/// `s * G`
pub fn scalarmult_base(s: &Scalar) -> EdwardsPoint {
    ED25519_BASEPOINT_TABLE * s
}

/// `amount * H`
pub fn scalarmult_h(amount: u64) -> EdwardsPoint {
    xmr_h() * Scalar::from(amount)
}

/// Pedersen commitment `C = mask * G + amount * H`
pub fn gen_commitment(mask: &Scalar, amount: u64) -> EdwardsPoint {
    scalarmult_base(mask) + scalarmult_h(amount)
}

/// `c - a * b`
pub fn sc_mulsub(a: &Scalar, b: &Scalar, c: &Scalar) -> Scalar {
    c - a * b
}

/// `a * b + c`
pub fn sc_muladd(a: &Scalar, b: &Scalar, c: &Scalar) -> Scalar {
    a * b + c
}

/// Compute HMAC-Keccak256 over `data`
pub fn compute_hmac(key: &[u8], data: &[u8]) -> Result<Key, Error> {
    let mut m = <HmacKeccak as Mac>::new_from_slice(key).map_err(|_| Error::InvalidLength)?;
    m.update(data);
    Ok(m.finalize().into_bytes().into())
}

/// Verify HMAC-Keccak256 in constant time
pub fn verify_hmac(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    let mut m = match <HmacKeccak as Mac>::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return false,
    };
    m.update(data);
    m.verify_slice(tag).is_ok()
}

/// Constant time comparison of byte strings
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod test {
    use rand_core::OsRng;

    use super::*;

    #[test]
    fn h_generator() {
        let h = xmr_h();
        assert!(!h.is_identity());
        assert!(h.is_torsion_free());
        assert_eq!(encode_point(&h), H_ENC);
    }

    #[test]
    fn inverse_eight() {
        let s = random_scalar(&mut OsRng {});
        let p = scalarmult_base(&s);

        assert_eq!(mul8(&(p * inv_eight())), p);
    }

    #[test]
    fn scalar_checks() {
        // Group order l is not canonical
        let l: Key = [
            0xed, 0xd3, 0xf5, 0x5c, 0x1a, 0x63, 0x12, 0x58, 0xd6, 0x9c, 0xf7, 0xa2, 0xde, 0xf9,
            0xde, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x10,
        ];
        assert_eq!(decode_scalar(&l), Err(Error::InvalidScalar));
        assert_eq!(decode_scalar(&[0xff; 32]), Err(Error::InvalidScalar));

        let s = random_scalar(&mut OsRng {});
        assert_eq!(decode_scalar(&encode_scalar(&s)), Ok(s));
    }

    #[test]
    fn point_checks() {
        // y = 2 is not on the curve
        let mut k = [0u8; 32];
        k[0] = 2;
        assert_eq!(decode_point(&k), Err(Error::InvalidPoint));

        let p = scalarmult_base(&random_scalar(&mut OsRng {}));
        assert_eq!(decode_point(&encode_point(&p)), Ok(p));

        assert_eq!(decode_point(&IDENTITY_ENC), Ok(EdwardsPoint::identity()));
    }

    #[test]
    fn commitments() {
        let a = random_scalar(&mut OsRng {});
        let b = random_scalar(&mut OsRng {});

        // Commitments are homomorphic in both mask and amount
        let c = gen_commitment(&a, 10) + gen_commitment(&b, 32);
        assert_eq!(c, gen_commitment(&(a + b), 42));
        assert_eq!(sc_mulsub(&a, &b, &Scalar::ZERO), -(a * b));
        assert_eq!(sc_muladd(&a, &b, &a), a * b + a);
    }

    #[test]
    fn hashing() {
        // Known answer for the empty string
        assert_eq!(
            hex::encode(keccak(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(keccak_parts(&[b"ab", b"cd"]), keccak(b"abcd"));
        assert_eq!(keccak2(b"abcd"), keccak(&keccak(b"abcd")));

        let hp = hash_to_point(&H_ENC);
        assert!(hp.is_torsion_free());
        assert!(!hp.is_identity());
    }

    #[test]
    fn hmac_round_trip() {
        let key = [0x5a; 32];
        let data = b"some host offloaded data";
        let tag = compute_hmac(&key, data).unwrap();

        assert!(verify_hmac(&key, data, &tag));

        for i in 0..data.len() {
            let mut d = *data;
            d[i] ^= 0x01;
            assert!(!verify_hmac(&key, &d, &tag), "data tamper at {i}");
        }

        for i in 0..tag.len() {
            let mut t = tag;
            t[i] ^= 0x80;
            assert!(!verify_hmac(&key, data, &t), "tag tamper at {i}");
        }
    }
}
