// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use encdec::DecodeOwned;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::{Display, EnumIter, EnumString};

use super::Error;
use crate::{
    crypto::Key,
    helpers::check_permutation,
    xmr::{
        addr::Destination,
        codec::{encode_via_writer, Reader, Writer},
        tsx_data::TsxData,
        tx::{SourceEntry, TxinToKey},
    },
};

/// Maximum serialized `vin` length
pub const MAX_VINI_LEN: usize = 1024;

/// Maximum serialized range proof length
pub const MAX_RSIG_LEN: usize = 8192;

/// Maximum packed ciphertext length for offloaded secrets
pub const MAX_ENC_LEN: usize = 128;

/// Request instruction codes
#[derive(
    Copy,
    Clone,
    PartialEq,
    Debug,
    Display,
    EnumString,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Instruction {
    TxInit = 0x10,
    TxSetInput = 0x11,
    TxInputPermutation = 0x12,
    TxInputVini = 0x13,
    TxAllInputsSet = 0x14,
    TxSetOutput = 0x15,
    TxAllOutputsSet = 0x16,
    TxMlsagDone = 0x17,
    TxSignInput = 0x18,
    TxFinal = 0x19,
    TxGetInfo = 0x1a,
}

/// Previously set input, echoed back by the host with its protection
#[derive(Clone, PartialEq, Debug, Default)]
pub struct InputVini {
    pub src_entr: SourceEntry,
    /// Serialized `txin_to_key`
    pub vini: Vec<u8>,
    pub vini_hmac: Key,
    /// Pseudo output commitment, simple RingCT only
    pub pseudo_out: Option<Key>,
    pub pseudo_out_hmac: Option<Key>,
}

impl InputVini {
    fn write(&self, w: &mut Writer) -> Result<(), Error> {
        self.src_entr.write(w)?;
        w.blob(&self.vini)?;
        w.put(&self.vini_hmac)?;
        w.opt_key(self.pseudo_out.as_ref())?;
        w.opt_key(self.pseudo_out_hmac.as_ref())
    }

    fn read(r: &mut Reader) -> Result<Self, Error> {
        let src_entr = SourceEntry::read(r)?;

        // vini must be a single well formed input
        let vini = r.blob(MAX_VINI_LEN)?;
        let (_, n) = TxinToKey::decode_owned(vini)?;
        if n != vini.len() {
            return Err(Error::InvalidLength);
        }

        Ok(Self {
            src_entr,
            vini: vini.to_vec(),
            vini_hmac: r.key()?,
            pseudo_out: r.opt_key()?,
            pseudo_out_hmac: r.opt_key()?,
        })
    }
}

/// Input signing request
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SignInput {
    pub vini: InputVini,
    /// Encrypted pseudo output mask, when not held on device
    pub alpha_enc: Option<Vec<u8>>,
    /// Encrypted spend secret, when not held on device
    pub spend_enc: Option<Vec<u8>>,
}

/// [`Engine`][super::Engine] input events, typically decoded from host requests
/// via [`Event::parse`]
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    None,

    /// Initialise a transaction
    TxInit {
        account_index: u32,
        tsx_data: TsxData,
    },

    /// Set the next input
    TxSetInput {
        src_entr: SourceEntry,
    },

    /// Set the input ordering, `new[i] = old[perm[i]]`
    TxInputPermutation {
        perm: Vec<usize>,
    },

    /// Stream the next (permuted) input into the prefix hash
    TxInputVini(InputVini),

    /// Close the input phase
    TxAllInputsSet,

    /// Set the next output
    TxSetOutput {
        dst_entr: Destination,
        dst_entr_hmac: Key,
        /// Host computed range proof for the batch closed by this output
        rsig: Option<Vec<u8>>,
    },

    /// Close the output phase and the transaction prefix
    TxAllOutputsSet,

    /// Compute the message signed by the MLSAGs
    TxMlsagDone,

    /// Sign the next (permuted) input
    TxSignInput(SignInput),

    /// Complete the transaction
    TxFinal,

    /// Fetch engine state
    TxGetInfo,
}

impl Event {
    /// Fetch the instruction code for an event
    pub fn instruction(&self) -> Option<Instruction> {
        let i = match self {
            Event::None => return None,
            Event::TxInit { .. } => Instruction::TxInit,
            Event::TxSetInput { .. } => Instruction::TxSetInput,
            Event::TxInputPermutation { .. } => Instruction::TxInputPermutation,
            Event::TxInputVini(_) => Instruction::TxInputVini,
            Event::TxAllInputsSet => Instruction::TxAllInputsSet,
            Event::TxSetOutput { .. } => Instruction::TxSetOutput,
            Event::TxAllOutputsSet => Instruction::TxAllOutputsSet,
            Event::TxMlsagDone => Instruction::TxMlsagDone,
            Event::TxSignInput(_) => Instruction::TxSignInput,
            Event::TxFinal => Instruction::TxFinal,
            Event::TxGetInfo => Instruction::TxGetInfo,
        };
        Some(i)
    }

    /// Parse and validate a request body for the provided instruction
    pub fn parse(ins: u8, buff: &[u8]) -> Result<Self, Error> {
        let ins = Instruction::try_from(ins).map_err(|_| Error::Unsupported)?;
        let mut r = Reader::new(buff);

        let evt = match ins {
            Instruction::TxInit => {
                let account_index = LittleEndian::read_u32(r.take(4)?);

                let tsx_data = TsxData::read(&mut r)?;
                tsx_data.validate()?;

                Event::TxInit {
                    account_index,
                    tsx_data,
                }
            }
            Instruction::TxSetInput => Event::TxSetInput {
                src_entr: SourceEntry::read(&mut r)?,
            },
            Instruction::TxInputPermutation => {
                let n = r.count(super::MAX_INPUTS)?;
                let perm = (0..n)
                    .map(|_| {
                        r.varint()
                            .and_then(|v| usize::try_from(v).map_err(|_| Error::InvalidPermutation))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                check_permutation(&perm)?;

                Event::TxInputPermutation { perm }
            }
            Instruction::TxInputVini => Event::TxInputVini(InputVini::read(&mut r)?),
            Instruction::TxAllInputsSet => Event::TxAllInputsSet,
            Instruction::TxSetOutput => Event::TxSetOutput {
                dst_entr: Destination::read(&mut r)?,
                dst_entr_hmac: r.key()?,
                rsig: r.opt_blob(MAX_RSIG_LEN)?.map(|v| v.to_vec()),
            },
            Instruction::TxAllOutputsSet => Event::TxAllOutputsSet,
            Instruction::TxMlsagDone => Event::TxMlsagDone,
            Instruction::TxSignInput => Event::TxSignInput(SignInput {
                vini: InputVini::read(&mut r)?,
                alpha_enc: r.opt_blob(MAX_ENC_LEN)?.map(|v| v.to_vec()),
                spend_enc: r.opt_blob(MAX_ENC_LEN)?.map(|v| v.to_vec()),
            }),
            Instruction::TxFinal => Event::TxFinal,
            Instruction::TxGetInfo => Event::TxGetInfo,
        };

        // Trailing data is rejected
        if r.position() != buff.len() {
            return Err(Error::InvalidLength);
        }

        Ok(evt)
    }

    /// Write the request body (excluding the instruction code)
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        match self {
            Event::TxInit {
                account_index,
                tsx_data,
            } => {
                let mut b = [0u8; 4];
                LittleEndian::write_u32(&mut b, *account_index);
                w.put(&b)?;
                tsx_data.write(w)
            }
            Event::TxSetInput { src_entr } => src_entr.write(w),
            Event::TxInputPermutation { perm } => {
                w.varint(perm.len() as u64)?;
                for p in perm {
                    w.varint(*p as u64)?;
                }
                Ok(())
            }
            Event::TxInputVini(v) => v.write(w),
            Event::TxSetOutput {
                dst_entr,
                dst_entr_hmac,
                rsig,
            } => {
                dst_entr.write(w)?;
                w.put(dst_entr_hmac)?;
                w.opt_blob(rsig.as_deref())
            }
            Event::TxSignInput(s) => {
                s.vini.write(w)?;
                w.opt_blob(s.alpha_enc.as_deref())?;
                w.opt_blob(s.spend_enc.as_deref())
            }
            Event::None
            | Event::TxAllInputsSet
            | Event::TxAllOutputsSet
            | Event::TxMlsagDone
            | Event::TxFinal
            | Event::TxGetInfo => Ok(()),
        }
    }
}

encode_via_writer!(Event);
