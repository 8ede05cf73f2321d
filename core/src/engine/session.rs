// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction session state, held between protocol steps and
//! persisted via [Engine::suspend][super::Engine::suspend]

use alloc::vec::Vec;

use zeroize::Zeroize;

use super::keys::TxKeys;
use crate::{
    crypto::{Key, Scalar},
    xmr::{
        hasher::{PreMlsagHasher, TxPrefixHasher},
        keys::SubaddressMap,
        rct::RctType,
        tsx_data::TsxData,
        tx::TxExtra,
    },
};

/// Builder session state
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TxSession {
    pub(crate) tsx_data: TsxData,
    pub(crate) rct_type: RctType,

    pub(crate) in_memory: bool,
    pub(crate) many_inputs: bool,
    pub(crate) many_outputs: bool,

    /// Transaction private key `r`
    pub(crate) tx_priv: Scalar,
    /// Transaction public key `R`
    pub(crate) tx_pub: Key,
    pub(crate) need_additional_keys: bool,
    pub(crate) additional_tx_priv: Vec<Scalar>,
    pub(crate) additional_tx_pub: Vec<Key>,

    pub(crate) keys: TxKeys,

    /// Subaddresses for input matching, rebuilt on resume
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) subaddresses: SubaddressMap,

    /// Inputs set
    pub(crate) inp_idx: usize,
    /// Inputs streamed into the prefix
    pub(crate) vini_idx: usize,
    /// Inputs signed
    pub(crate) sign_idx: usize,
    /// Outputs set
    pub(crate) out_idx: usize,
    pub(crate) inputs_sealed: bool,

    pub(crate) summary_inputs_money: u64,
    pub(crate) summary_outs_money: u64,

    /// Current input position to original index
    pub(crate) source_permutation: Vec<usize>,

    /// Spend secrets, when not offloaded
    pub(crate) input_secrets: Vec<Scalar>,
    /// Pseudo output masks and commitments, in-memory mode only
    pub(crate) input_alphas: Vec<Scalar>,
    pub(crate) input_pseudo_outs: Vec<Key>,
    /// Serialized inputs and key images, in-memory mode only
    pub(crate) input_vins: Vec<Vec<u8>>,
    pub(crate) input_key_images: Vec<Key>,

    pub(crate) sumpouts_alphas: Scalar,
    pub(crate) sumout: Scalar,

    /// Output masks, pre-generated once inputs are sealed
    pub(crate) output_masks: Vec<Scalar>,
    pub(crate) output_amounts: Vec<u64>,
    /// Output commitments
    pub(crate) output_pk_masks: Vec<Key>,
    /// Outputs per range proof
    pub(crate) rsig_batches: Vec<usize>,

    pub(crate) extra: TxExtra,
    pub(crate) tx_prefix_hasher: TxPrefixHasher,
    pub(crate) full_message_hasher: PreMlsagHasher,
    pub(crate) tx_prefix_hash: Key,
    pub(crate) full_message: Key,
}

impl Default for TxSession {
    fn default() -> Self {
        Self {
            tsx_data: TsxData::default(),
            rct_type: RctType::Null,
            in_memory: false,
            many_inputs: false,
            many_outputs: false,
            tx_priv: Scalar::ZERO,
            tx_pub: [0u8; 32],
            need_additional_keys: false,
            additional_tx_priv: Vec::new(),
            additional_tx_pub: Vec::new(),
            keys: TxKeys::default(),
            subaddresses: SubaddressMap::new(),
            inp_idx: 0,
            vini_idx: 0,
            sign_idx: 0,
            out_idx: 0,
            inputs_sealed: false,
            summary_inputs_money: 0,
            summary_outs_money: 0,
            source_permutation: Vec::new(),
            input_secrets: Vec::new(),
            input_alphas: Vec::new(),
            input_pseudo_outs: Vec::new(),
            input_vins: Vec::new(),
            input_key_images: Vec::new(),
            sumpouts_alphas: Scalar::ZERO,
            sumout: Scalar::ZERO,
            output_masks: Vec::new(),
            output_amounts: Vec::new(),
            output_pk_masks: Vec::new(),
            rsig_batches: Vec::new(),
            extra: TxExtra::new(),
            tx_prefix_hasher: TxPrefixHasher::default(),
            full_message_hasher: PreMlsagHasher::new(),
            tx_prefix_hash: [0u8; 32],
            full_message: [0u8; 32],
        }
    }
}

impl TxSession {
    pub(crate) fn num_inputs(&self) -> usize {
        self.tsx_data.num_inputs as usize
    }

    pub(crate) fn num_outputs(&self) -> usize {
        self.tsx_data.outputs.len()
    }

    /// Check whether pseudo outputs are in use
    pub(crate) fn is_simple(&self) -> bool {
        self.rct_type.is_simple()
    }

    /// Resolve the original index for the input at position `idx`
    pub(crate) fn source_index(&self, idx: usize) -> usize {
        self.source_permutation.get(idx).copied().unwrap_or(idx)
    }

    /// Resolve the range proof batch `[start, end)` containing output `idx`
    pub(crate) fn rsig_batch(&self, idx: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for n in &self.rsig_batches {
            if idx < start + n {
                return Some((start, start + n));
            }
            start += n;
        }
        None
    }

    /// Zeroize held secrets
    pub(crate) fn wipe(&mut self) {
        self.tx_priv.zeroize();
        self.additional_tx_priv.zeroize();
        self.input_secrets.zeroize();
        self.input_alphas.zeroize();
        self.sumpouts_alphas.zeroize();
        self.sumout.zeroize();
        self.output_masks.zeroize();
        self.keys.zeroize();
    }
}

impl Drop for TxSession {
    fn drop(&mut self) {
        self.wipe();
    }
}
