// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Host supplied transaction description

use alloc::vec::Vec;

use super::{
    addr::{AccountPublicAddress, Destination},
    codec::{decode_via_reader, encode_via_writer, Reader, Writer},
};
use crate::{
    crypto::Key,
    engine::{Error, MAX_BULLETPROOF_BATCH, MAX_INPUTS, MAX_OUTPUTS},
};

/// Maximum payment id length
const MAX_PAYMENT_ID_LEN: usize = 32;

/// Maximum subaddress minor indices precomputed for input matching
pub const MAX_MINOR_INDICES: usize = 64;

/// Range proof batching / offload configuration
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RsigData {
    /// Outputs per range proof batch, summing to the output count.
    /// Empty for one proof per output.
    pub grouping: Vec<u64>,
    /// Range proofs are computed by the host and verified on device
    pub offload: bool,
}

impl RsigData {
    /// Resolve batch sizes for `num_outputs`, checking they cover every output
    pub fn batches(&self, num_outputs: usize) -> Result<Vec<usize>, Error> {
        if self.grouping.is_empty() {
            return Ok(alloc::vec![1; num_outputs]);
        }

        let mut total = 0usize;
        let mut b = Vec::with_capacity(self.grouping.len());

        for g in &self.grouping {
            let g = match usize::try_from(*g) {
                Ok(g) if g != 0 && g <= MAX_BULLETPROOF_BATCH => g,
                _ => return Err(Error::InvalidLength),
            };
            total += g;
            b.push(g);
        }

        if total != num_outputs {
            return Err(Error::InvalidLength);
        }

        Ok(b)
    }
}

/// Transaction description, provided once at [init][crate::engine::Engine::init]
#[derive(Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TsxData {
    pub version: u64,
    /// Empty, 8 byte (encrypted) or 32 byte (plain) payment id
    pub payment_id: Vec<u8>,
    pub unlock_time: u64,
    pub outputs: Vec<Destination>,
    pub change_dts: Option<Destination>,
    pub num_inputs: u64,
    pub mixin: u64,
    pub fee: u64,
    /// Major subaddress index of the spending account
    pub account: u32,
    /// Minor subaddress indices to precompute for input matching
    pub minor_indices: Vec<u32>,
    pub is_multisig: bool,
    /// Expected transaction prefix hash (empty to skip the check)
    pub exp_tx_prefix_hash: Vec<u8>,
    /// Caller-supplied transaction private keys, `r` then additional keys
    pub use_tx_keys: Vec<Key>,
    pub is_bulletproof: bool,
    pub rsig_data: RsigData,
    /// Request that offloaded values be kept on device
    pub in_memory: bool,
}

impl core::fmt::Debug for TsxData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TsxData")
            .field("version", &self.version)
            .field("outputs", &self.outputs.len())
            .field("num_inputs", &self.num_inputs)
            .field("mixin", &self.mixin)
            .field("fee", &self.fee)
            .field("account", &self.account)
            .field("is_multisig", &self.is_multisig)
            .field("use_tx_keys", &self.use_tx_keys.len())
            .field("is_bulletproof", &self.is_bulletproof)
            .finish_non_exhaustive()
    }
}

impl TsxData {
    /// Change destination address, if any
    pub fn change_addr(&self) -> Option<&AccountPublicAddress> {
        self.change_dts.as_ref().map(|d| &d.addr)
    }

    /// Sum of destination amounts
    pub fn total_out(&self) -> Result<u64, Error> {
        self.outputs
            .iter()
            .try_fold(0u64, |a, d| a.checked_add(d.amount))
            .ok_or(Error::ValueMismatch)
    }

    /// Minor indices to precompute, defaulting to the primary address
    pub fn minors(&self) -> &[u32] {
        match self.minor_indices.is_empty() {
            true => &[0],
            false => &self.minor_indices,
        }
    }

    /// Check structural limits
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_inputs == 0 || usize::try_from(self.num_inputs).map_or(true, |n| n > MAX_INPUTS) {
            return Err(Error::InvalidLength);
        }
        if self.outputs.is_empty() || self.outputs.len() > MAX_OUTPUTS {
            return Err(Error::InvalidLength);
        }
        if !matches!(self.exp_tx_prefix_hash.len(), 0 | 32) {
            return Err(Error::InvalidLength);
        }
        if !self.is_bulletproof && self.rsig_data.offload {
            return Err(Error::Unsupported);
        }

        let _ = self.rsig_data.batches(self.outputs.len())?;
        let _ = self.total_out()?;

        Ok(())
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.varint(self.version)?;
        w.blob(&self.payment_id)?;
        w.varint(self.unlock_time)?;

        w.varint(self.outputs.len() as u64)?;
        for o in &self.outputs {
            o.write(w)?;
        }

        match &self.change_dts {
            Some(c) => {
                w.bool(true)?;
                c.write(w)?;
            }
            None => w.bool(false)?,
        }

        w.varint(self.num_inputs)?;
        w.varint(self.mixin)?;
        w.varint(self.fee)?;
        w.varint(self.account as u64)?;

        w.varint(self.minor_indices.len() as u64)?;
        for m in &self.minor_indices {
            w.varint(*m as u64)?;
        }

        w.bool(self.is_multisig)?;
        w.blob(&self.exp_tx_prefix_hash)?;
        w.keys(&self.use_tx_keys)?;
        w.bool(self.is_bulletproof)?;

        w.varint(self.rsig_data.grouping.len() as u64)?;
        for g in &self.rsig_data.grouping {
            w.varint(*g)?;
        }
        w.bool(self.rsig_data.offload)?;
        w.bool(self.in_memory)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        let mut t = TsxData {
            version: r.varint()?,
            ..Default::default()
        };

        let n = r.count(MAX_PAYMENT_ID_LEN)?;
        t.payment_id = r.take(n)?.to_vec();
        t.unlock_time = r.varint()?;

        let n = r.count(MAX_OUTPUTS)?;
        for _ in 0..n {
            t.outputs.push(Destination::read(r)?);
        }

        if r.bool()? {
            t.change_dts = Some(Destination::read(r)?);
        }

        t.num_inputs = r.varint()?;
        t.mixin = r.varint()?;
        t.fee = r.varint()?;
        t.account = u32_varint(r)?;

        let n = r.count(MAX_MINOR_INDICES)?;
        for _ in 0..n {
            t.minor_indices.push(u32_varint(r)?);
        }

        t.is_multisig = r.bool()?;

        let n = r.count(32)?;
        t.exp_tx_prefix_hash = r.take(n)?.to_vec();

        let n = r.count(MAX_OUTPUTS + 1)?;
        for _ in 0..n {
            t.use_tx_keys.push(r.key()?);
        }

        t.is_bulletproof = r.bool()?;

        let n = r.count(MAX_OUTPUTS)?;
        for _ in 0..n {
            t.rsig_data.grouping.push(r.varint()?);
        }
        t.rsig_data.offload = r.bool()?;
        t.in_memory = r.bool()?;

        Ok(t)
    }
}

fn u32_varint(r: &mut Reader) -> Result<u32, Error> {
    u32::try_from(r.varint()?).map_err(|_| Error::EncodingFailed)
}

encode_via_writer!(TsxData);
decode_via_reader!(TsxData);
