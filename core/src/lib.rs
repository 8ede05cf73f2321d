// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Monero hardware wallet core
//!
//! This provides a common [Engine][engine::Engine] supporting incremental RingCT
//! transaction construction and signing for execution on hardware wallets,
//! as well as a [KeyImageSync][engine::KeyImageSync] engine for exporting key
//! images to watch-only wallets.
//!
//! Interactions with the [Engine][engine::Engine] are performed via
//! [Event][engine::Event]s and [Output][engine::Output]s. Data the device is
//! unable to hold (vins, pseudo outputs, spend secrets) is returned to the host
//! protected by an HMAC and/or authenticated encryption under per-transaction keys,
//! and must be echoed back unmodified in later steps.
//!
//! ## Operations
//!
//! ### Executing a transaction
//!
//! 1. Issue [`Event::TxInit`][engine::Event::TxInit] with the transaction
//!    description, returning an HMAC for each destination
//! 2. Issue [`Event::TxSetInput`][engine::Event::TxSetInput] for each input,
//!    returning the serialized `vin`, its HMAC, and the (protected) pseudo output
//!    and secrets for the input
//! 3. Issue [`Event::TxInputPermutation`][engine::Event::TxInputPermutation] with the
//!    ordering of inputs by descending key image
//! 4. Issue [`Event::TxInputVini`][engine::Event::TxInputVini] for each (permuted) input
//! 5. Issue [`Event::TxAllInputsSet`][engine::Event::TxAllInputsSet]
//! 6. Issue [`Event::TxSetOutput`][engine::Event::TxSetOutput] for each destination,
//!    returning the `vout`, output commitment, ECDH info and range proof
//! 7. Issue [`Event::TxAllOutputsSet`][engine::Event::TxAllOutputsSet] to finalise the
//!    transaction prefix, returning `tx.extra` and the prefix hash
//! 8. Issue [`Event::TxMlsagDone`][engine::Event::TxMlsagDone] to compute the message
//!    to be signed
//! 9. Issue [`Event::TxSignInput`][engine::Event::TxSignInput] for each (permuted) input,
//!    returning the MLSAG for the input
//! 10. Issue [`Event::TxFinal`][engine::Event::TxFinal] to complete the transaction,
//!     returning the encrypted transaction keys
//!
//! Between any two steps the engine may be [suspended][engine::Engine::suspend]
//! to an encrypted blob and later [resumed][engine::Engine::resume].
//!
//! ### Key image sync
//!
//! 1. Issue [`KeyImageSync::init`][engine::KeyImageSync::init] with the number of
//!    outputs and the expected hash over them
//! 2. Issue [`KeyImageSync::step`][engine::KeyImageSync::step] with batches of outputs,
//!    returning encrypted key images and signatures
//! 3. Issue [`KeyImageSync::finalize`][engine::KeyImageSync::finalize] to check the
//!    hash and fetch the key required to decrypt the exported images
//!

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod crypto;

pub mod xmr;

pub mod engine;

pub mod helpers;
