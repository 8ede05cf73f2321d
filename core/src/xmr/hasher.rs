// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Incremental transaction prefix and pre-MLSAG message hashers
//!
//! Both hashers are built on [KeccakSponge] so their running state can be
//! persisted between protocol steps.

use strum::Display;

#[cfg(feature = "bulletproof")]
use super::bulletproof::Bulletproof;
use super::{rct::RctType, tx::EcdhTuple};
use crate::{
    crypto::{KeccakSponge, Key},
    engine::Error,
};

/// Transaction prefix hasher,
/// `version || unlock_time || vin[] || vout[] || extra`
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxPrefixHasher {
    h: KeccakSponge,
}

impl TxPrefixHasher {
    /// Start a prefix with the version, unlock time and input count
    pub fn new(version: u64, unlock_time: u64, num_inputs: u64) -> Self {
        let mut h = KeccakSponge::new();
        h.uvarint(version).uvarint(unlock_time).uvarint(num_inputs);
        Self { h }
    }

    /// Absorb a serialized input
    pub fn add_vin(&mut self, vin: &[u8]) {
        self.h.update(vin);
    }

    /// Absorb the output container length
    pub fn begin_outputs(&mut self, num_outputs: u64) {
        self.h.uvarint(num_outputs);
    }

    /// Absorb a serialized output
    pub fn add_vout(&mut self, vout: &[u8]) {
        self.h.update(vout);
    }

    /// Absorb `tx.extra` and finalise the prefix hash
    pub fn finish(mut self, extra: &[u8]) -> Key {
        self.h.uvarint(extra.len() as u64).update(extra);
        self.h.finalize()
    }
}

/// Pre-MLSAG hasher state, advancing in declaration order
#[derive(Copy, Clone, PartialEq, Debug, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MlsagHashState {
    Idle,
    Init,
    TypeFee,
    PseudoOuts,
    Ecdh,
    OutPk,
    BaseDone,
    Done,
}

/// Incremental builder for the message signed by the MLSAGs,
/// `H(prefix_hash || H(rctsig_base) || H(range_proofs))`
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PreMlsagHasher {
    state: MlsagHashState,
    is_simple: bool,
    master: KeccakSponge,
    rctsig_base: KeccakSponge,
    rsig: KeccakSponge,
}

impl Default for PreMlsagHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PreMlsagHasher {
    pub const fn new() -> Self {
        Self {
            state: MlsagHashState::Idle,
            is_simple: false,
            master: KeccakSponge::new(),
            rctsig_base: KeccakSponge::new(),
            rsig: KeccakSponge::new(),
        }
    }

    pub fn state(&self) -> MlsagHashState {
        self.state
    }

    pub fn is_simple(&self) -> bool {
        self.is_simple
    }

    /// Advance to `next` if the current state is one of `from`
    fn advance(&mut self, from: &[MlsagHashState], next: MlsagHashState) -> Result<(), Error> {
        if !from.contains(&self.state) {
            #[cfg(feature = "log")]
            log::error!("pre-mlsag hasher in state {}, expected {:?}", self.state, from);

            return Err(Error::ProtocolOrder);
        }
        self.state = next;
        Ok(())
    }

    pub fn init(&mut self, is_simple: bool) -> Result<(), Error> {
        self.advance(&[MlsagHashState::Idle], MlsagHashState::Init)?;
        self.is_simple = is_simple;
        Ok(())
    }

    /// Absorb the transaction prefix hash
    pub fn set_message(&mut self, message: &Key) {
        self.master.update(message);
    }

    /// Absorb the RingCT type byte and fee
    pub fn set_type_fee(&mut self, rct_type: RctType, fee: u64) -> Result<(), Error> {
        self.advance(&[MlsagHashState::Init], MlsagHashState::TypeFee)?;
        self.rctsig_base.update(&[u8::from(rct_type)]).uvarint(fee);
        Ok(())
    }

    pub fn set_pseudo_out(&mut self, pseudo_out: &Key) -> Result<(), Error> {
        use MlsagHashState::*;
        self.advance(&[TypeFee, PseudoOuts], PseudoOuts)?;
        self.rctsig_base.update(pseudo_out);
        Ok(())
    }

    pub fn set_ecdh(&mut self, ecdh: &EcdhTuple) -> Result<(), Error> {
        use MlsagHashState::*;
        self.advance(&[TypeFee, PseudoOuts, Ecdh], Ecdh)?;
        self.rctsig_base.update(&ecdh.to_bytes());
        Ok(())
    }

    /// Absorb an output commitment
    pub fn set_out_pk(&mut self, mask: &Key) -> Result<(), Error> {
        use MlsagHashState::*;
        self.advance(&[Ecdh, OutPk], OutPk)?;
        self.rctsig_base.update(mask);
        Ok(())
    }

    /// Close the rctsig base, folding its hash into the message
    pub fn rctsig_base_done(&mut self) -> Result<(), Error> {
        self.advance(&[MlsagHashState::OutPk], MlsagHashState::BaseDone)?;
        let d = core::mem::take(&mut self.rctsig_base).finalize();
        self.master.update(&d);
        Ok(())
    }

    /// Absorb raw range proof bytes
    pub fn rsig_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state == MlsagHashState::Done {
            return Err(Error::ProtocolOrder);
        }
        self.rsig.update(data);
        Ok(())
    }

    /// Absorb bulletproof fields
    #[cfg(feature = "bulletproof")]
    pub fn rsig_bulletproof(&mut self, p: &Bulletproof) -> Result<(), Error> {
        if self.state == MlsagHashState::Done {
            return Err(Error::ProtocolOrder);
        }
        p.digest_into(&mut self.rsig);
        Ok(())
    }

    /// Fold the range proof hash and compute the final message
    pub fn get_digest(&mut self) -> Result<Key, Error> {
        self.advance(&[MlsagHashState::BaseDone], MlsagHashState::Done)?;

        let r = core::mem::take(&mut self.rsig).finalize();
        self.master.update(&r);

        Ok(core::mem::take(&mut self.master).finalize())
    }
}
