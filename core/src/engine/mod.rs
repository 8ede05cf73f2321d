// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The [Engine] provides transaction signing functionality required by hardware wallets.
//!
//! This handles [Event] inputs and returns [Output] responses to the caller,
//! while the typed step methods ([Engine::init] through [Engine::finalize])
//! may be called directly where requests are decoded elsewhere.

use alloc::vec::Vec;

#[cfg(feature = "serde")]
use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rand_core::{CryptoRngCore, OsRng};
use strum::{Display, EnumIter, EnumString, EnumVariantNames};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    crypto::{
        chacha::{decrypt_pack, encrypt_pack},
        ct_eq, decode_point, decode_scalar, encode_point, encode_scalar, gen_commitment, keccak,
        random_scalar, scalarmult_base, scalarmult_h, Key, Scalar,
    },
    helpers::apply_permutation,
    xmr::{
        addr::{change_indices, classify_subaddresses, destination_view_key, Destination},
        hasher::TxPrefixHasher,
        keys::{
            derivation_to_scalar, derive_public_key, generate_key_derivation,
            generate_key_image_helper, AccountKeys, Network, SubaddressMap,
        },
        mlsag::{prove_rct_mg, prove_rct_mg_simple, FullMgInputs},
        rct::RctType,
        to_vec,
        tsx_data::{RsigData, TsxData},
        tx::{
            absolute_output_offsets_to_relative, encrypt_payment_id, CtKey, EcdhTuple,
            SourceEntry, TxOut, TxinToKey,
        },
    },
};

#[cfg(feature = "log")]
use crate::helpers::fmt_amount;

mod error;
pub use error::Error;

mod event;
pub use event::{Event, InputVini, Instruction, SignInput};

mod output;
pub use output::{
    AllOutputsAck, FinalAck, InitAck, Output, RctSigBase, SetInputAck, SetOutputAck,
    SignatureAck,
};

mod keys;
pub use keys::{compute_tx_key, TxKeys};

mod session;
pub use session::TxSession;

mod key_image_sync;
pub use key_image_sync::{KeyImageSync, KeyImageSyncInit, SyncState, SyncStep, SyncStepAck};

/// Inputs at or above this count offload spend secrets to the host
pub const MANY_INPUTS_THRESHOLD: usize = 10;

/// Outputs at or above this count are reported so the host may batch range proofs
pub const MANY_OUTPUTS_THRESHOLD: usize = 10;

/// Maximum outputs aggregated in a single bulletproof
pub const MAX_BULLETPROOF_BATCH: usize = 16;

/// Maximum ring members per input
pub const MAX_RING_SIZE: usize = 64;

/// Maximum inputs per transaction
pub const MAX_INPUTS: usize = 256;

/// Maximum outputs per transaction
pub const MAX_OUTPUTS: usize = 16;

/// Supported transaction version
pub const TX_VERSION: u64 = 2;

/// Progress phases reported via [Confirm::transaction_step]
pub const STEP_INP: u16 = 100;
pub const STEP_PERM: u16 = 200;
pub const STEP_VINI: u16 = 300;
pub const STEP_ALL_IN: u16 = 350;
pub const STEP_OUT: u16 = 400;
pub const STEP_ALL_OUT: u16 = 500;
pub const STEP_MLSAG: u16 = 600;
pub const STEP_SIGN: u16 = 700;

/// Engine internal state enumeration
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Debug,
    EnumString,
    Display,
    EnumVariantNames,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum State {
    /// Idle, no transaction running
    Start = 0,
    /// Transaction description accepted
    Init = 1,
    /// Awaiting the first input
    InputCount = 2,
    /// Setting inputs
    Input = 3,
    /// All inputs set, awaiting permutation
    InputDone = 4,
    /// Inputs permuted
    InputPermutation = 5,
    /// Streaming permuted inputs into the prefix hash
    InputVins = 6,
    /// Setting outputs
    Output = 7,
    /// Transaction prefix complete
    OutputDone = 8,
    /// Signed message computed
    FinalMessage = 9,
    /// Signing inputs
    Signature = 10,
    /// All inputs signed
    SignatureDone = 11,
    /// Transaction complete
    Final = 12,
    /// Transaction aborted
    Fail = 250,
}

/// [`Driver`] trait provides platform support for [`Engine`] instances
pub trait Driver {
    /// Derive the 32-byte account seed for a hardened derivation `path`
    fn account_seed(&self, path: &[u32]) -> Zeroizing<[u8; 32]>;

    /// Network the device is bound to
    fn network(&self) -> Network {
        Network::Mainnet
    }
}

impl<T: Driver> Driver for &mut T {
    fn account_seed(&self, path: &[u32]) -> Zeroizing<[u8; 32]> {
        T::account_seed(self, path)
    }

    fn network(&self) -> Network {
        T::network(self)
    }
}

/// [`Confirm`] trait provides user interaction for [`Engine`] instances
pub trait Confirm {
    /// Display the transaction summary, returning user approval
    fn confirm_transaction(&mut self, tsx_data: &TsxData, keys: &AccountKeys) -> bool;

    /// Display the transaction fee, returning user approval
    fn confirm_fee(&mut self, fee: u64) -> bool;

    /// Request approval to export `num` key images
    fn confirm_key_image_sync(&mut self, num: usize) -> bool;

    /// Progress notification
    fn transaction_step(&mut self, _step: u16, _sub_step: usize, _sub_step_total: usize) {}

    fn transaction_finished(&mut self) {}

    fn transaction_error(&mut self) {}
}

impl<T: Confirm> Confirm for &mut T {
    fn confirm_transaction(&mut self, tsx_data: &TsxData, keys: &AccountKeys) -> bool {
        T::confirm_transaction(self, tsx_data, keys)
    }

    fn confirm_fee(&mut self, fee: u64) -> bool {
        T::confirm_fee(self, fee)
    }

    fn confirm_key_image_sync(&mut self, num: usize) -> bool {
        T::confirm_key_image_sync(self, num)
    }

    fn transaction_step(&mut self, step: u16, sub_step: usize, sub_step_total: usize) {
        T::transaction_step(self, step, sub_step, sub_step_total)
    }

    fn transaction_finished(&mut self) {
        T::transaction_finished(self)
    }

    fn transaction_error(&mut self) {
        T::transaction_error(self)
    }
}

/// Hardened derivation path for an account, `m/44'/128'/account'`
pub const fn wallet_path(account_index: u32) -> [u32; 3] {
    const H: u32 = 0x8000_0000;
    [44 | H, 128 | H, account_index | H]
}

/// Derive account keys for an account index
pub(crate) fn account_keys<DRV: Driver>(drv: &DRV, account_index: u32) -> AccountKeys {
    let seed = drv.account_seed(&wallet_path(account_index));
    let mut s = keccak(&seed[..]);
    let keys = AccountKeys::from_seed(&s, drv.network());
    s.zeroize();
    keys
}

/// [Engine] provides hardware-independent support for Monero transaction signing
pub struct Engine<DRV: Driver, UI: Confirm, RNG: CryptoRngCore = OsRng> {
    state: State,

    account_index: u32,
    keys: Option<AccountKeys>,

    session: TxSession,
    /// Transactions started since power on, salting the session keys
    tsx_ctr: u64,

    drv: DRV,
    ui: UI,
    rng: RNG,
}

impl<DRV: Driver, UI: Confirm> Engine<DRV, UI> {
    /// Create a new transaction engine instance with the provided driver and UI,
    /// using the default [OsRng]
    pub fn new(drv: DRV, ui: UI) -> Self {
        Self::new_with_rng(drv, ui, OsRng {})
    }
}

impl<DRV: Driver, UI: Confirm, RNG: CryptoRngCore> Engine<DRV, UI, RNG> {
    /// Create a new transaction engine instance with the provided driver, UI and rng
    pub fn new_with_rng(drv: DRV, ui: UI, rng: RNG) -> Self {
        Self {
            state: State::Start,
            account_index: 0,
            keys: None,
            session: TxSession::default(),
            tsx_ctr: 0,
            drv,
            ui,
            rng,
        }
    }

    /// Handle incoming transaction events
    pub fn update(&mut self, evt: &Event) -> Result<Output, Error> {
        // Events carry secrets (input masks), only the instruction is logged
        #[cfg(feature = "log")]
        log::debug!("event: {:?} (state: {})", evt.instruction(), self.state);

        let r = match evt {
            Event::None => Output::None,
            Event::TxInit {
                account_index,
                tsx_data,
            } => Output::TxInit(self.init(*account_index, tsx_data)?),
            Event::TxSetInput { src_entr } => Output::TxSetInput(self.set_input(src_entr)?),
            Event::TxInputPermutation { perm } => {
                self.set_permutation(perm)?;
                Output::State { state: self.state }
            }
            Event::TxInputVini(v) => {
                self.input_vini(v)?;
                Output::State { state: self.state }
            }
            Event::TxAllInputsSet => Output::TxAllInputsSet {
                out_masks: self.all_inputs_set()?,
            },
            Event::TxSetOutput {
                dst_entr,
                dst_entr_hmac,
                rsig,
            } => Output::TxSetOutput(self.set_output(dst_entr, dst_entr_hmac, rsig.as_deref())?),
            Event::TxAllOutputsSet => Output::TxAllOutputsSet(self.all_outputs_set()?),
            Event::TxMlsagDone => Output::TxMlsagDone {
                full_message_hash: self.mlsag_done()?,
            },
            Event::TxSignInput(s) => Output::TxSignInput(self.sign_input(s)?),
            Event::TxFinal => Output::TxFinal(self.finalize()?),
            Event::TxGetInfo => Output::State { state: self.state },
        };

        Ok(r)
    }

    /// Fetch current engine state
    pub fn state(&self) -> State {
        self.state
    }

    /// Fetch the account index for the running transaction
    pub fn account_index(&self) -> u32 {
        self.account_index
    }

    /// Abort any running transaction and return to [State::Start]
    pub fn clear(&mut self) {
        self.session = TxSession::default();
        self.keys = None;
        self.state = State::Start;
    }

    /// Initialise a transaction, confirming it with the user and returning
    /// per-destination HMACs
    pub fn init(&mut self, account_index: u32, tsx_data: &TsxData) -> Result<InitAck, Error> {
        self.step(
            "init",
            &[State::Start, State::Final, State::Fail],
            |e| e.tx_init(account_index, tsx_data),
        )
    }

    /// Set the next input
    pub fn set_input(&mut self, src_entr: &SourceEntry) -> Result<SetInputAck, Error> {
        self.step("set_input", &[State::InputCount, State::Input], |e| {
            e.tx_set_input(src_entr)
        })
    }

    /// Apply the host input ordering, `new[i] = old[perm[i]]`
    pub fn set_permutation(&mut self, perm: &[usize]) -> Result<(), Error> {
        self.step("set_permutation", &[State::InputDone], |e| {
            e.tx_set_permutation(perm)
        })
    }

    /// Stream the next permuted input into the prefix hash
    pub fn input_vini(&mut self, v: &InputVini) -> Result<(), Error> {
        self.step(
            "input_vini",
            &[State::InputPermutation, State::InputVins],
            |e| e.tx_input_vini(v),
        )
    }

    /// Seal inputs and generate output masks, returned when range proofs are offloaded
    pub fn all_inputs_set(&mut self) -> Result<Vec<Key>, Error> {
        self.step(
            "all_inputs_set",
            &[State::InputPermutation, State::InputVins],
            |e| e.tx_all_inputs_set(),
        )
    }

    /// Set the next output, with the host range proof when offloaded
    pub fn set_output(
        &mut self,
        dst_entr: &Destination,
        dst_entr_hmac: &Key,
        rsig: Option<&[u8]>,
    ) -> Result<SetOutputAck, Error> {
        self.step(
            "set_output",
            &[State::InputPermutation, State::InputVins, State::Output],
            |e| e.tx_set_output(dst_entr, dst_entr_hmac, rsig),
        )
    }

    /// Close outputs, check balances and finish the transaction prefix
    pub fn all_outputs_set(&mut self) -> Result<AllOutputsAck, Error> {
        self.step("all_outputs_set", &[State::Output], |e| {
            e.tx_all_outputs_set()
        })
    }

    /// Compute the message signed by the MLSAGs
    pub fn mlsag_done(&mut self) -> Result<Key, Error> {
        self.step("mlsag_done", &[State::OutputDone], |e| e.tx_mlsag_done())
    }

    /// Sign the next permuted input
    pub fn sign_input(&mut self, req: &SignInput) -> Result<SignatureAck, Error> {
        self.step(
            "sign_input",
            &[State::FinalMessage, State::Signature],
            |e| e.tx_sign_input(req),
        )
    }

    /// Complete the transaction, returning the encrypted transaction keys
    pub fn finalize(&mut self) -> Result<FinalAck, Error> {
        self.step("finalize", &[State::SignatureDone], |e| e.tx_finalize())
    }

    /// Serialize the running session to an encrypted blob
    #[cfg(feature = "serde")]
    pub fn suspend(&mut self) -> Result<Vec<u8>, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ProtocolOrder)?;

        let snap = SnapshotRef {
            state: self.state,
            tsx_ctr: self.tsx_ctr,
            session: &self.session,
        };
        let plain =
            Zeroizing::new(serde_cbor::to_vec(&snap).map_err(|_| Error::EncodingFailed)?);

        let key = session_key(keys);
        let enc = encrypt_pack(&key, &plain, &mut self.rng)?;

        let mut blob = alloc::vec![0u8; 4];
        LittleEndian::write_u32(&mut blob, self.account_index);
        blob.extend_from_slice(&enc);

        #[cfg(feature = "log")]
        log::debug!("suspended in state {} ({} bytes)", self.state, blob.len());

        Ok(blob)
    }

    /// Restore a session from a blob produced by [Engine::suspend]
    ///
    /// On failure the current engine state is left untouched.
    #[cfg(feature = "serde")]
    pub fn resume(&mut self, blob: &[u8]) -> Result<State, Error> {
        if blob.len() < 4 {
            return Err(Error::InvalidLength);
        }
        let (a, enc) = blob.split_at(4);
        let account_index = LittleEndian::read_u32(a);

        let keys = account_keys(&self.drv, account_index);
        let plain = decrypt_pack(&session_key(&keys), enc)?;

        let Snapshot {
            state,
            tsx_ctr,
            mut session,
        } = serde_cbor::from_slice(&plain).map_err(|_| Error::EncodingFailed)?;

        keys.compute_subaddresses(
            session.tsx_data.account,
            session.tsx_data.minors(),
            &mut session.subaddresses,
        );

        #[cfg(feature = "log")]
        log::debug!("resumed in state {state}");

        self.session = session;
        self.account_index = account_index;
        self.keys = Some(keys);
        self.tsx_ctr = tsx_ctr;
        self.state = state;

        Ok(state)
    }

    /// Run a transaction step, enforcing allowed states and
    /// failing the session on fatal errors
    fn step<T>(
        &mut self,
        _step: &str,
        allowed: &[State],
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if !allowed.contains(&self.state) {
            #[cfg(feature = "log")]
            log::warn!("{_step} rejected in state {}", self.state);

            return Err(Error::ProtocolOrder);
        }

        match f(self) {
            Ok(v) => {
                #[cfg(feature = "log")]
                log::debug!("{_step} ok, state: {}", self.state);

                Ok(v)
            }
            Err(e) if e.is_fatal() => {
                #[cfg(feature = "log")]
                log::error!("{_step} failed in state {}: {e:?}", self.state);

                self.fail();
                Err(e)
            }
            Err(e) => {
                #[cfg(feature = "log")]
                log::warn!("{_step} rejected: {e:?}");

                Err(e)
            }
        }
    }

    /// Abort the session, wiping held secrets
    fn fail(&mut self) {
        self.session = TxSession::default();
        self.keys = None;
        self.state = State::Fail;
        self.ui.transaction_error();
    }

    fn tx_init(&mut self, account_index: u32, tsx: &TsxData) -> Result<InitAck, Error> {
        tsx.validate()?;
        if tsx.version != TX_VERSION {
            return Err(Error::Unsupported);
        }

        #[cfg(feature = "log")]
        log::debug!(
            "init account {account_index}: {} inputs, {} outputs, fee {}",
            tsx.num_inputs,
            tsx.outputs.len(),
            fmt_amount(tsx.fee)
        );

        let keys = account_keys(&self.drv, account_index);

        if !self.ui.confirm_transaction(tsx, &keys) || !self.ui.confirm_fee(tsx.fee) {
            return Err(Error::UserCancelled);
        }

        // Build the new session aside, committing only on success
        let mut s = TxSession::default();
        s.tsx_data = tsx.clone();
        keys.compute_subaddresses(tsx.account, tsx.minors(), &mut s.subaddresses);

        check_change(&keys, &s.subaddresses, tsx)?;

        s.tx_priv = match tsx.use_tx_keys.first() {
            Some(k) => decode_scalar(k)?,
            None => random_scalar(&mut self.rng),
        };

        let classes = classify_subaddresses(&tsx.outputs, tsx.change_addr());
        s.tx_pub = match classes.lone_subaddress() {
            Some(a) => encode_point(&(a.spend_public()? * s.tx_priv)),
            None => encode_point(&scalarmult_base(&s.tx_priv)),
        };

        s.need_additional_keys = classes.need_additional_keys();
        if s.need_additional_keys {
            let provided = tsx.use_tx_keys.get(1..).unwrap_or(&[]);
            s.additional_tx_priv = match provided.len() == tsx.outputs.len() {
                true => provided
                    .iter()
                    .map(decode_scalar)
                    .collect::<Result<Vec<_>, _>>()?,
                false => (0..tsx.outputs.len())
                    .map(|_| random_scalar(&mut self.rng))
                    .collect(),
            };
        }

        match tsx.payment_id.len() {
            0 => (),
            8 => {
                let view = destination_view_key(&tsx.outputs, tsx.change_addr())
                    .ok_or(Error::NoMatchingAddress)?;

                let mut pid = [0u8; 8];
                pid.copy_from_slice(&tsx.payment_id);
                let enc = encrypt_payment_id(&pid, &decode_point(&view)?, &s.tx_priv);
                s.extra.add_encrypted_payment_id(&enc)?;
            }
            32 => {
                let mut pid = [0u8; 32];
                pid.copy_from_slice(&tsx.payment_id);
                s.extra.add_payment_id(&pid)?;
            }
            _ => return Err(Error::InvalidLength),
        }

        self.tsx_ctr += 1;
        s.keys = TxKeys::derive(tsx, &s.tx_priv, self.tsx_ctr, &mut self.rng)?;

        let (n_in, n_out) = (s.num_inputs(), s.num_outputs());
        s.rct_type = RctType::select(n_in, tsx.is_bulletproof);
        s.many_inputs = n_in >= MANY_INPUTS_THRESHOLD;
        s.many_outputs = n_out >= MANY_OUTPUTS_THRESHOLD;
        s.in_memory = tsx.in_memory && !s.many_inputs;

        s.rsig_batches = tsx.rsig_data.batches(n_out)?;
        check_rsig_support(s.rct_type, &tsx.rsig_data, &s.rsig_batches)?;

        s.tx_prefix_hasher = TxPrefixHasher::new(TX_VERSION, tsx.unlock_time, n_in as u64);
        s.full_message_hasher.init(s.is_simple())?;
        s.full_message_hasher.set_type_fee(s.rct_type, tsx.fee)?;

        let hmacs = tsx
            .outputs
            .iter()
            .enumerate()
            .map(|(i, d)| s.keys.gen_hmac_tsxdest(d, i as u64))
            .collect::<Result<Vec<_>, _>>()?;

        let ack = InitAck {
            in_memory: s.in_memory,
            many_inputs: s.many_inputs,
            many_outputs: s.many_outputs,
            hmacs,
        };

        #[cfg(feature = "log")]
        log::debug!(
            "rct type {}, in memory: {}, many inputs: {}, additional keys: {}",
            s.rct_type,
            s.in_memory,
            s.many_inputs,
            s.need_additional_keys
        );

        self.session = s;
        self.account_index = account_index;
        self.keys = Some(keys);
        self.state = State::InputCount;

        Ok(ack)
    }

    fn tx_set_input(&mut self, src: &SourceEntry) -> Result<SetInputAck, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ProtocolOrder)?;
        let s = &mut self.session;

        let idx = s.inp_idx;
        if idx >= s.num_inputs() {
            return Err(Error::ProtocolOrder);
        }

        let real = src.real()?;
        let out_key = decode_point(&real.key.dest)?;
        let tx_pub = decode_point(&src.real_out_tx_key)?;
        let additional = src
            .real_out_additional_tx_keys
            .iter()
            .map(decode_point)
            .collect::<Result<Vec<_>, _>>()?;

        let secrets = generate_key_image_helper(
            keys,
            &s.subaddresses,
            &out_key,
            &tx_pub,
            &additional,
            src.real_output_in_tx_index,
        )?;

        let k_image = match &src.multisig_klrki {
            Some(k) => k.ki,
            None => encode_point(&secrets.key_image),
        };

        // Ring members are sorted by global index
        if src.outputs.windows(2).any(|w| w[0].index >= w[1].index) {
            return Err(Error::InvalidIndex);
        }
        let offsets: Vec<u64> = src.outputs.iter().map(|o| o.index).collect();

        let vin = TxinToKey {
            amount: if src.rct { 0 } else { src.amount },
            key_offsets: absolute_output_offsets_to_relative(&offsets),
            k_image,
        };
        let vini = to_vec(&vin)?;
        let vini_hmac = s.keys.gen_hmac_vini(src, &vini, idx as u64)?;

        s.summary_inputs_money = s
            .summary_inputs_money
            .checked_add(src.amount)
            .ok_or(Error::ValueMismatch)?;

        let mut ack = SetInputAck {
            vini: vini.clone(),
            vini_hmac,
            ..Default::default()
        };

        if s.is_simple() {
            let mut alpha = random_scalar(&mut self.rng);
            let pseudo_out = encode_point(&gen_commitment(&alpha, src.amount));
            s.sumpouts_alphas += alpha;

            if s.in_memory {
                s.input_alphas.push(alpha);
                s.input_pseudo_outs.push(pseudo_out);
            } else {
                ack.pseudo_out_hmac = Some(s.keys.gen_hmac_pseudo_out(&pseudo_out, idx as u64)?);
                ack.alpha_enc = Some(encrypt_pack(
                    &s.keys.enc_key_txin_alpha(idx as u64),
                    alpha.as_bytes(),
                    &mut self.rng,
                )?);
            }

            ack.pseudo_out = Some(pseudo_out);
            alpha.zeroize();
        }

        if s.many_inputs {
            ack.spend_enc = Some(encrypt_pack(
                &s.keys.enc_key_spend(idx as u64),
                secrets.secret.as_bytes(),
                &mut self.rng,
            )?);
        } else {
            s.input_secrets.push(secrets.secret);
        }

        if s.in_memory {
            s.input_vins.push(vini);
            s.input_key_images.push(k_image);
        }

        s.inp_idx += 1;
        self.ui.transaction_step(STEP_INP, s.inp_idx, s.num_inputs());

        if s.inp_idx < s.num_inputs() {
            self.state = State::Input;
            return Ok(ack);
        }

        if !s.in_memory {
            self.state = State::InputDone;
            return Ok(ack);
        }

        // Held on device, sort by descending key image and stream inputs directly
        let mut perm: Vec<usize> = (0..s.num_inputs()).collect();
        perm.sort_by(|a, b| s.input_key_images[*b].cmp(&s.input_key_images[*a]));
        permute(s, &perm)?;

        for i in 0..s.num_inputs() {
            s.tx_prefix_hasher.add_vin(&s.input_vins[i]);
            if s.rct_type.hashes_pseudo_outs() {
                s.full_message_hasher.set_pseudo_out(&s.input_pseudo_outs[i])?;
            }
        }
        s.vini_idx = s.num_inputs();

        self.ui.transaction_step(STEP_PERM, 0, 0);
        self.state = State::InputPermutation;

        Ok(ack)
    }

    fn tx_set_permutation(&mut self, perm: &[usize]) -> Result<(), Error> {
        permute(&mut self.session, perm)?;

        self.ui.transaction_step(STEP_PERM, 0, 0);
        self.state = State::InputPermutation;

        Ok(())
    }

    fn tx_input_vini(&mut self, v: &InputVini) -> Result<(), Error> {
        let s = &mut self.session;

        let idx = s.vini_idx;
        if s.in_memory || s.inputs_sealed || idx >= s.num_inputs() {
            return Err(Error::ProtocolOrder);
        }
        let src_idx = s.source_index(idx) as u64;

        let h = s.keys.gen_hmac_vini(&v.src_entr, &v.vini, src_idx)?;
        if !ct_eq(&h, &v.vini_hmac) {
            return Err(Error::Integrity);
        }

        if s.is_simple() {
            let (po, po_hmac) = match (&v.pseudo_out, &v.pseudo_out_hmac) {
                (Some(p), Some(h)) => (p, h),
                _ => return Err(Error::Integrity),
            };

            let h = s.keys.gen_hmac_pseudo_out(po, src_idx)?;
            if !ct_eq(&h, po_hmac) {
                return Err(Error::Integrity);
            }

            if s.rct_type.hashes_pseudo_outs() {
                s.full_message_hasher.set_pseudo_out(po)?;
            }
        }

        s.tx_prefix_hasher.add_vin(&v.vini);
        s.vini_idx += 1;

        self.ui.transaction_step(STEP_VINI, s.vini_idx, s.num_inputs());
        self.state = State::InputVins;

        Ok(())
    }

    fn tx_all_inputs_set(&mut self) -> Result<Vec<Key>, Error> {
        let s = &mut self.session;

        if s.inputs_sealed || s.vini_idx != s.num_inputs() {
            return Err(Error::ProtocolOrder);
        }

        let mut masks: Vec<Scalar> = (0..s.num_outputs())
            .map(|_| random_scalar(&mut self.rng))
            .collect();

        // The last output absorbs the deficit so output masks sum to the pseudo output masks
        if s.is_simple() {
            if let Some((last, rest)) = masks.split_last_mut() {
                *last = rest.iter().fold(s.sumpouts_alphas, |a, m| a - m);
            }
        }

        s.output_masks = masks;
        s.inputs_sealed = true;

        self.ui.transaction_step(STEP_ALL_IN, 0, 0);

        match s.tsx_data.rsig_data.offload {
            true => Ok(s.output_masks.iter().map(encode_scalar).collect()),
            false => Ok(Vec::new()),
        }
    }

    fn tx_set_output(
        &mut self,
        dst: &Destination,
        dst_hmac: &Key,
        rsig: Option<&[u8]>,
    ) -> Result<SetOutputAck, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ProtocolOrder)?;
        let s = &mut self.session;

        let idx = s.out_idx;
        if !s.inputs_sealed || idx >= s.num_outputs() {
            return Err(Error::ProtocolOrder);
        }

        let h = s.keys.gen_hmac_tsxdest(dst, idx as u64)?;
        if !ct_eq(&h, dst_hmac) {
            return Err(Error::Integrity);
        }

        #[cfg(feature = "log")]
        log::debug!("output {idx}: {}", fmt_amount(dst.amount));

        if idx == 0 {
            s.tx_prefix_hasher.begin_outputs(s.num_outputs() as u64);
        }

        s.summary_outs_money = s
            .summary_outs_money
            .checked_add(dst.amount)
            .ok_or(Error::ValueMismatch)?;
        s.output_amounts.push(dst.amount);

        let mask = *s.output_masks.get(idx).ok_or(Error::InvalidIndex)?;
        let commitment = encode_point(&gen_commitment(&mask, dst.amount));

        let rsig = range_proof(s, idx, &commitment, rsig, &mut self.rng)?;

        if s.need_additional_keys {
            let sk = s.additional_tx_priv.get(idx).ok_or(Error::InvalidIndex)?;
            let p = match dst.is_subaddress {
                true => dst.addr.spend_public()? * sk,
                false => scalarmult_base(sk),
            };
            s.additional_tx_pub.push(encode_point(&p));
        }

        let derivation = if Some(&dst.addr) == s.tsx_data.change_addr() {
            // Change is derived with our own view key, recoverable from R alone
            generate_key_derivation(&decode_point(&s.tx_pub)?, &keys.view_private)
        } else if dst.is_subaddress && s.need_additional_keys {
            generate_key_derivation(&dst.addr.view_public()?, &s.additional_tx_priv[idx])
        } else {
            generate_key_derivation(&dst.addr.view_public()?, &s.tx_priv)
        };

        let mut amount_key = derivation_to_scalar(&derivation, idx as u64);
        let out_key = encode_point(&derive_public_key(
            &derivation,
            idx as u64,
            &dst.addr.spend_public()?,
        ));

        let tx_out = to_vec(&TxOut {
            amount: 0,
            key: out_key,
        })?;
        s.tx_prefix_hasher.add_vout(&tx_out);
        let vouti_hmac = s.keys.gen_hmac_vouti(dst, &tx_out, idx as u64)?;

        s.output_pk_masks.push(commitment);
        s.sumout += mask;

        let ecdh_info = EcdhTuple::encode(&mask, dst.amount, &amount_key);
        amount_key.zeroize();
        s.full_message_hasher.set_ecdh(&ecdh_info)?;

        s.out_idx += 1;
        self.ui.transaction_step(STEP_OUT, s.out_idx, s.num_outputs());
        self.state = State::Output;

        Ok(SetOutputAck {
            tx_out,
            vouti_hmac,
            rsig,
            out_pk: CtKey {
                dest: out_key,
                mask: commitment,
            },
            ecdh_info,
        })
    }

    fn tx_all_outputs_set(&mut self) -> Result<AllOutputsAck, Error> {
        let s = &mut self.session;

        if s.out_idx != s.num_outputs() {
            return Err(Error::InvalidLength);
        }

        if s.is_simple() && s.sumout != s.sumpouts_alphas {
            return Err(Error::ValueMismatch);
        }

        let fee = s.tsx_data.fee;
        let diff = s.summary_inputs_money.checked_sub(s.summary_outs_money);
        if diff != Some(fee) {
            #[cfg(feature = "log")]
            log::error!(
                "inputs {} - outputs {} != fee {}",
                fmt_amount(s.summary_inputs_money),
                fmt_amount(s.summary_outs_money),
                fmt_amount(fee)
            );

            return Err(Error::ValueMismatch);
        }

        let mut extra = core::mem::take(&mut s.extra);
        extra.add_tx_pub_key(&s.tx_pub);
        if s.need_additional_keys {
            extra.add_additional_tx_pub_keys(&s.additional_tx_pub);
        }
        let extra = extra.into_bytes();

        let prefix_hash = core::mem::take(&mut s.tx_prefix_hasher).finish(&extra);

        let exp = &s.tsx_data.exp_tx_prefix_hash;
        if !exp.is_empty() && !ct_eq(exp, &prefix_hash) {
            return Err(Error::PrefixMismatch);
        }

        s.full_message_hasher.set_message(&prefix_hash);
        s.tx_prefix_hash = prefix_hash;

        self.ui.transaction_step(STEP_ALL_OUT, 0, 0);
        self.state = State::OutputDone;

        Ok(AllOutputsAck {
            extra,
            tx_prefix_hash: prefix_hash,
            rv: RctSigBase {
                txn_fee: fee,
                message: prefix_hash,
                rv_type: s.rct_type,
            },
        })
    }

    fn tx_mlsag_done(&mut self) -> Result<Key, Error> {
        let s = &mut self.session;

        for m in &s.output_pk_masks {
            s.full_message_hasher.set_out_pk(m)?;
        }
        s.full_message_hasher.rctsig_base_done()?;
        s.full_message = s.full_message_hasher.get_digest()?;

        self.ui.transaction_step(STEP_MLSAG, 0, 0);
        self.state = State::FinalMessage;

        Ok(s.full_message)
    }

    fn tx_sign_input(&mut self, req: &SignInput) -> Result<SignatureAck, Error> {
        let s = &mut self.session;

        let idx = s.sign_idx;
        if idx >= s.num_inputs() {
            return Err(Error::ProtocolOrder);
        }
        if !s.is_simple() && idx != 0 {
            return Err(Error::InvalidIndex);
        }
        let src_idx = s.source_index(idx) as u64;

        let v = &req.vini;
        let src = &v.src_entr;

        let h = s.keys.gen_hmac_vini(src, &v.vini, src_idx)?;
        if !ct_eq(&h, &v.vini_hmac) {
            return Err(Error::Integrity);
        }
        let real = src.real()?;

        // Pseudo output and its mask
        let pseudo = match s.is_simple() {
            true if s.in_memory => {
                let alpha = *s.input_alphas.get(idx).ok_or(Error::InvalidIndex)?;
                let po = *s.input_pseudo_outs.get(idx).ok_or(Error::InvalidIndex)?;
                Some((Zeroizing::new(alpha), po))
            }
            true => {
                let (po, po_hmac) = match (&v.pseudo_out, &v.pseudo_out_hmac) {
                    (Some(p), Some(h)) => (p, h),
                    _ => return Err(Error::Integrity),
                };
                let h = s.keys.gen_hmac_pseudo_out(po, src_idx)?;
                if !ct_eq(&h, po_hmac) {
                    return Err(Error::Integrity);
                }

                let enc = req.alpha_enc.as_deref().ok_or(Error::Integrity)?;
                let alpha = decrypt_scalar(&s.keys.enc_key_txin_alpha(src_idx), enc)?;
                Some((alpha, *po))
            }
            false => None,
        };

        if let Some((alpha, po)) = &pseudo {
            if !ct_eq(&encode_point(&gen_commitment(alpha, src.amount)), po) {
                return Err(Error::KeyMismatch);
            }
        }

        let x = match s.many_inputs {
            true => {
                let enc = req.spend_enc.as_deref().ok_or(Error::Integrity)?;
                decrypt_scalar(&s.keys.enc_key_spend(src_idx), enc)?
            }
            false => Zeroizing::new(*s.input_secrets.get(idx).ok_or(Error::InvalidIndex)?),
        };
        let mask = Zeroizing::new(decode_scalar(&src.mask)?);

        // The claimed secrets must open the real ring member
        if !ct_eq(&encode_point(&scalarmult_base(&x)), &real.key.dest)
            || !ct_eq(
                &encode_point(&gen_commitment(&mask, src.amount)),
                &real.key.mask,
            )
        {
            return Err(Error::KeyMismatch);
        }

        let index = usize::try_from(src.real_output).map_err(|_| Error::InvalidIndex)?;
        let mut in_sk = (*x, *mask);

        let r = match &pseudo {
            Some((alpha, po)) => {
                let pubs: Vec<CtKey> = src.outputs.iter().map(|o| o.key).collect();
                decode_point(po).and_then(|po| {
                    prove_rct_mg_simple(
                        &s.full_message,
                        &pubs,
                        &in_sk,
                        alpha,
                        &po,
                        src.multisig_klrki.as_ref(),
                        index,
                        &mut self.rng,
                    )
                })
            }
            None if src.multisig_klrki.is_some() => Err(Error::Unsupported),
            None => {
                let cols: Vec<Vec<CtKey>> = src
                    .outputs
                    .iter()
                    .map(|o| alloc::vec![o.key])
                    .collect();
                let fee_key = scalarmult_h(s.tsx_data.fee);

                let inputs = FullMgInputs {
                    pubs: &cols,
                    in_sk: core::slice::from_ref(&in_sk),
                    out_sk_masks: &s.output_masks,
                    out_pk_masks: &s.output_pk_masks,
                    fee_key: &fee_key,
                };
                prove_rct_mg(&s.full_message, &inputs, index, &mut self.rng)
            }
        };

        in_sk.0.zeroize();
        in_sk.1.zeroize();
        let (sig, mut msc) = r?;

        let cout = match s.tsx_data.is_multisig {
            true => Some(encrypt_pack(
                &s.keys.enc_key_cout(None),
                msc.as_bytes(),
                &mut self.rng,
            )?),
            false => None,
        };
        msc.zeroize();

        let signature = to_vec(&sig)?;

        s.sign_idx += 1;
        self.ui.transaction_step(STEP_SIGN, s.sign_idx, s.num_inputs());
        self.state = match s.sign_idx < s.num_inputs() {
            true => State::Signature,
            false => State::SignatureDone,
        };

        Ok(SignatureAck { signature, cout })
    }

    fn tx_finalize(&mut self) -> Result<FinalAck, Error> {
        let keys = self.keys.as_ref().ok_or(Error::ProtocolOrder)?;
        let s = &mut self.session;

        let cout_key = s.tsx_data.is_multisig.then(|| s.keys.enc_key_cout(None));

        let mut salt = [0u8; 32];
        self.rng.fill_bytes(&mut salt);
        let rand_mult = random_scalar(&mut self.rng);

        let tx_key = Zeroizing::new(compute_tx_key(
            &keys.spend_private,
            &s.tx_prefix_hash,
            &salt,
            &rand_mult,
        )?);

        let mut plain = Zeroizing::new(Vec::with_capacity(32 * (1 + s.additional_tx_priv.len())));
        plain.extend_from_slice(s.tx_priv.as_bytes());
        for k in &s.additional_tx_priv {
            plain.extend_from_slice(k.as_bytes());
        }
        let tx_enc_keys = encrypt_pack(&tx_key, &plain, &mut self.rng)?;

        self.ui.transaction_finished();

        self.session = TxSession::default();
        self.keys = None;
        self.state = State::Final;

        Ok(FinalAck {
            cout_key,
            salt,
            rand_mult: encode_scalar(&rand_mult),
            tx_enc_keys,
        })
    }
}

/// Check the change destination is one of ours and present in the outputs
fn check_change(keys: &AccountKeys, subaddresses: &SubaddressMap, tsx: &TsxData) -> Result<(), Error> {
    let change = match tsx.change_addr() {
        Some(c) => c,
        None => return Ok(()),
    };

    if change_indices(&tsx.outputs, change).is_empty() {
        return Err(Error::InvalidIndex);
    }

    let index = subaddresses
        .get(&change.spend_public_key)
        .ok_or(Error::NoMatchingAddress)?;

    let view = match index.is_primary() {
        true => keys.view_public,
        false => change.spend_public()? * keys.view_private,
    };
    if !ct_eq(&encode_point(&view), &change.view_public_key) {
        return Err(Error::NoMatchingAddress);
    }

    Ok(())
}

/// Check the requested range proof scheme is available
fn check_rsig_support(rct_type: RctType, rsig: &RsigData, batches: &[usize]) -> Result<(), Error> {
    match rct_type.is_bulletproof() {
        true if cfg!(feature = "bulletproof") => Ok(()),
        false
            if cfg!(feature = "borromean")
                && !rsig.offload
                && batches.iter().all(|b| *b == 1) =>
        {
            Ok(())
        }
        _ => Err(Error::Unsupported),
    }
}

/// Reorder held input state, `new[i] = old[perm[i]]`
fn permute(s: &mut TxSession, perm: &[usize]) -> Result<(), Error> {
    if perm.len() != s.num_inputs() {
        return Err(Error::InvalidPermutation);
    }

    fn swap<T>(v: &mut [T], a: usize, b: usize) {
        if !v.is_empty() {
            v.swap(a, b);
        }
    }

    apply_permutation(perm, |a, b| {
        swap(&mut s.input_secrets, a, b);
        swap(&mut s.input_alphas, a, b);
        swap(&mut s.input_pseudo_outs, a, b);
        swap(&mut s.input_vins, a, b);
        swap(&mut s.input_key_images, a, b);
    })?;

    s.source_permutation = perm.to_vec();

    Ok(())
}

/// Produce, or verify and absorb, the range proof closing the batch containing `idx`
fn range_proof<R: CryptoRngCore + ?Sized>(
    s: &mut TxSession,
    idx: usize,
    commitment: &Key,
    rsig: Option<&[u8]>,
    rng: &mut R,
) -> Result<Option<Vec<u8>>, Error> {
    let (start, end) = s.rsig_batch(idx).ok_or(Error::InvalidIndex)?;
    let last = idx + 1 == end;
    let offload = s.tsx_data.rsig_data.offload;

    match (offload, last, rsig.is_some()) {
        (true, false, true) | (true, true, false) | (false, _, true) => {
            return Err(Error::Integrity)
        }
        (_, false, _) => return Ok(None),
        _ => (),
    }

    match s.rct_type.is_bulletproof() {
        true => bulletproof_batch(s, start, end, rsig, rng),
        false => borromean_proof(s, idx, commitment, rng),
    }
}

#[cfg(feature = "bulletproof")]
fn bulletproof_batch<R: CryptoRngCore + ?Sized>(
    s: &mut TxSession,
    start: usize,
    end: usize,
    rsig: Option<&[u8]>,
    rng: &mut R,
) -> Result<Option<Vec<u8>>, Error> {
    use crate::xmr::bulletproof::{self, Bulletproof};
    use encdec::DecodeOwned;

    let amounts = s.output_amounts.get(start..end).ok_or(Error::InvalidIndex)?;
    let masks = s.output_masks.get(start..end).ok_or(Error::InvalidIndex)?;

    match rsig {
        Some(b) => {
            let (mut p, n) = Bulletproof::decode_owned(b).map_err(|_| Error::RangeProofFailed)?;
            if n != b.len() {
                return Err(Error::RangeProofFailed);
            }

            // Commitments are rebuilt from our own masks, never taken from the host
            p.V = bulletproof::commitments_inv8(amounts, masks);
            bulletproof::verify(&p)?;

            s.full_message_hasher.rsig_bulletproof(&p)?;
            Ok(None)
        }
        None => {
            let p = bulletproof::prove_batch(amounts, masks, rng)?;

            s.full_message_hasher.rsig_bulletproof(&p)?;
            Ok(Some(to_vec(&p)?))
        }
    }
}

#[cfg(not(feature = "bulletproof"))]
fn bulletproof_batch<R: CryptoRngCore + ?Sized>(
    _s: &mut TxSession,
    _start: usize,
    _end: usize,
    _rsig: Option<&[u8]>,
    _rng: &mut R,
) -> Result<Option<Vec<u8>>, Error> {
    Err(Error::Unsupported)
}

#[cfg(feature = "borromean")]
fn borromean_proof<R: CryptoRngCore + ?Sized>(
    s: &mut TxSession,
    idx: usize,
    commitment: &Key,
    rng: &mut R,
) -> Result<Option<Vec<u8>>, Error> {
    let amount = *s.output_amounts.get(idx).ok_or(Error::InvalidIndex)?;
    let mask = s.output_masks.get(idx).ok_or(Error::InvalidIndex)?;

    let (c, _, sig) = crate::xmr::borromean::prove_range_chunked(amount, Some(mask), rng);
    if !ct_eq(&encode_point(&c), commitment) {
        return Err(Error::RangeProofFailed);
    }

    let b = sig.to_bytes();
    s.full_message_hasher.rsig_raw(&b)?;

    Ok(Some(b))
}

#[cfg(not(feature = "borromean"))]
fn borromean_proof<R: CryptoRngCore + ?Sized>(
    _s: &mut TxSession,
    _idx: usize,
    _commitment: &Key,
    _rng: &mut R,
) -> Result<Option<Vec<u8>>, Error> {
    Err(Error::Unsupported)
}

/// Decrypt an offloaded scalar
fn decrypt_scalar(key: &Key, enc: &[u8]) -> Result<Zeroizing<Scalar>, Error> {
    let p = decrypt_pack(key, enc)?;
    if p.len() != 32 {
        return Err(Error::InvalidLength);
    }

    let mut b = Zeroizing::new([0u8; 32]);
    b.copy_from_slice(&p);

    Ok(Zeroizing::new(decode_scalar(&b)?))
}

/// Session blob key, `keccak2("session" || spend || view)`
#[cfg(feature = "serde")]
fn session_key(keys: &AccountKeys) -> Zeroizing<Key> {
    use crate::crypto::keccak2;

    let mut b = Zeroizing::new([0u8; 7 + 64]);
    b[..7].copy_from_slice(b"session");
    b[7..39].copy_from_slice(keys.spend_private.as_bytes());
    b[39..].copy_from_slice(keys.view_private.as_bytes());

    Zeroizing::new(keccak2(&b[..]))
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize)]
struct SnapshotRef<'a> {
    state: State,
    tsx_ctr: u64,
    session: &'a TxSession,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct Snapshot {
    state: State,
    tsx_ctr: u64,
    session: TxSession,
}
