// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Authenticated encryption of host-offloaded secrets.
//!
//! Ciphertexts are packed as `nonce (12) || ciphertext || tag (16)` with a
//! fresh random nonce per encryption.

use alloc::vec::Vec;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use super::Key;
use crate::engine::Error;

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under `key`, returning the packed ciphertext
pub fn encrypt_pack<R: CryptoRngCore + ?Sized>(
    key: &Key,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, Error> {
    let cipher = ChaCha20Poly1305::new(key.into());

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::EncodingFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);

    Ok(out)
}

/// Decrypt a packed ciphertext under `key`, checking the authentication tag
pub fn decrypt_pack(key: &Key, packed: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    if packed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::InvalidLength);
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    let (nonce, ct) = packed.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map(Zeroizing::new)
        .map_err(|_| Error::Authentication)
}
