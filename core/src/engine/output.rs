// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use super::{Error, Instruction, State};
use crate::{
    crypto::Key,
    xmr::{
        codec::{encode_via_writer, Writer},
        rct::RctType,
        tx::{CtKey, EcdhTuple},
    },
};

/// Response kind for [Output::State]
const KIND_STATE: u8 = 0x01;

/// [`TxInit`][super::Event::TxInit] response
#[derive(Clone, PartialEq, Debug)]
pub struct InitAck {
    /// Offloaded values are held on device
    pub in_memory: bool,
    /// Spend secrets are offloaded encrypted
    pub many_inputs: bool,
    pub many_outputs: bool,
    /// Per-destination HMACs, echoed back with each output
    pub hmacs: Vec<Key>,
}

/// [`TxSetInput`][super::Event::TxSetInput] response
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SetInputAck {
    /// Serialized `txin_to_key`
    pub vini: Vec<u8>,
    pub vini_hmac: Key,
    pub pseudo_out: Option<Key>,
    pub pseudo_out_hmac: Option<Key>,
    pub alpha_enc: Option<Vec<u8>>,
    pub spend_enc: Option<Vec<u8>>,
}

/// [`TxSetOutput`][super::Event::TxSetOutput] response
#[derive(Clone, PartialEq, Debug)]
pub struct SetOutputAck {
    /// Serialized `tx_out`
    pub tx_out: Vec<u8>,
    pub vouti_hmac: Key,
    /// Range proof, when computed on device and closing a batch
    pub rsig: Option<Vec<u8>>,
    pub out_pk: CtKey,
    pub ecdh_info: EcdhTuple,
}

/// Signed base of the RingCT signature
#[derive(Clone, PartialEq, Debug)]
pub struct RctSigBase {
    pub txn_fee: u64,
    /// Transaction prefix hash
    pub message: Key,
    pub rv_type: RctType,
}

/// [`TxAllOutputsSet`][super::Event::TxAllOutputsSet] response
#[derive(Clone, PartialEq, Debug)]
pub struct AllOutputsAck {
    /// Complete `tx.extra`
    pub extra: Vec<u8>,
    pub tx_prefix_hash: Key,
    pub rv: RctSigBase,
}

/// [`TxSignInput`][super::Event::TxSignInput] response
#[derive(Clone, PartialEq, Debug)]
pub struct SignatureAck {
    /// Serialized MLSAG
    pub signature: Vec<u8>,
    /// Encrypted multisig commitment
    pub cout: Option<Vec<u8>>,
}

/// [`TxFinal`][super::Event::TxFinal] response
#[derive(Clone, PartialEq, Debug)]
pub struct FinalAck {
    /// Key for multisig `cout` values
    pub cout_key: Option<Key>,
    pub salt: Key,
    pub rand_mult: Key,
    /// Transaction private keys encrypted for backup
    pub tx_enc_keys: Vec<u8>,
}

/// [`Engine`][super::Engine] outputs (in response to events), encoded as a
/// kind byte followed by the response body
#[derive(Clone, PartialEq, Debug)]
pub enum Output {
    None,

    /// Engine state
    State {
        state: State,
    },

    TxInit(InitAck),

    TxSetInput(SetInputAck),

    /// Pre-generated output masks, only populated for offloaded range proofs
    TxAllInputsSet {
        out_masks: Vec<Key>,
    },

    TxSetOutput(SetOutputAck),

    TxAllOutputsSet(AllOutputsAck),

    TxMlsagDone {
        full_message_hash: Key,
    },

    TxSignInput(SignatureAck),

    TxFinal(FinalAck),
}

impl Output {
    /// Fetch the engine state for [Output::State] responses
    pub fn state(&self) -> Option<State> {
        match self {
            Output::State { state } => Some(*state),
            _ => None,
        }
    }

    /// Response kind byte, the instruction code for transaction responses
    pub fn kind(&self) -> u8 {
        let i = match self {
            Output::None => return 0x00,
            Output::State { .. } => return KIND_STATE,
            Output::TxInit(_) => Instruction::TxInit,
            Output::TxSetInput(_) => Instruction::TxSetInput,
            Output::TxAllInputsSet { .. } => Instruction::TxAllInputsSet,
            Output::TxSetOutput(_) => Instruction::TxSetOutput,
            Output::TxAllOutputsSet(_) => Instruction::TxAllOutputsSet,
            Output::TxMlsagDone { .. } => Instruction::TxMlsagDone,
            Output::TxSignInput(_) => Instruction::TxSignInput,
            Output::TxFinal(_) => Instruction::TxFinal,
        };
        i.into()
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.byte(self.kind())?;

        match self {
            Output::None => Ok(()),
            Output::State { state } => w.byte((*state).into()),
            Output::TxInit(a) => {
                w.bool(a.in_memory)?;
                w.bool(a.many_inputs)?;
                w.bool(a.many_outputs)?;
                w.keys(&a.hmacs)
            }
            Output::TxSetInput(a) => {
                w.blob(&a.vini)?;
                w.put(&a.vini_hmac)?;
                w.opt_key(a.pseudo_out.as_ref())?;
                w.opt_key(a.pseudo_out_hmac.as_ref())?;
                w.opt_blob(a.alpha_enc.as_deref())?;
                w.opt_blob(a.spend_enc.as_deref())
            }
            Output::TxAllInputsSet { out_masks } => w.keys(out_masks),
            Output::TxSetOutput(a) => {
                w.blob(&a.tx_out)?;
                w.put(&a.vouti_hmac)?;
                w.opt_blob(a.rsig.as_deref())?;
                a.out_pk.write(w)?;
                w.put(&a.ecdh_info.to_bytes())
            }
            Output::TxAllOutputsSet(a) => {
                w.blob(&a.extra)?;
                w.put(&a.tx_prefix_hash)?;
                w.varint(a.rv.txn_fee)?;
                w.put(&a.rv.message)?;
                w.byte(a.rv.rv_type.into())
            }
            Output::TxMlsagDone { full_message_hash } => w.put(full_message_hash),
            Output::TxSignInput(a) => {
                w.blob(&a.signature)?;
                w.opt_blob(a.cout.as_deref())
            }
            Output::TxFinal(a) => {
                w.opt_key(a.cout_key.as_ref())?;
                w.put(&a.salt)?;
                w.put(&a.rand_mult)?;
                w.blob(&a.tx_enc_keys)
            }
        }
    }
}

encode_via_writer!(Output);
