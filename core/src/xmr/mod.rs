// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Monero (CryptoNote / RingCT) primitives used by the signing [Engine][crate::engine::Engine]

pub mod varint;

pub(crate) mod codec;
pub use codec::to_vec;

pub mod keys;

pub mod addr;

pub mod tx;

pub mod tsx_data;

pub mod rct;

pub mod mlsag;

pub mod ring_sig;

#[cfg(feature = "borromean")]
pub mod borromean;

#[cfg(feature = "bulletproof")]
pub mod bulletproof;

pub mod hasher;

pub mod key_image;
