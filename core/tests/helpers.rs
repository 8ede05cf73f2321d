#![allow(unused)]

use encdec::DecodeOwned;
use log::debug;
use rand::SeedableRng;
use rand_core::CryptoRngCore;
use rand_hc::Hc128Rng;
use zeroize::Zeroizing;

use ledger_xmr_core::{
    crypto::{
        encode_point, encode_scalar, gen_commitment, keccak, random_scalar, scalarmult_base, Key,
        Scalar,
    },
    engine::{
        wallet_path, AllOutputsAck, Confirm, Driver, Engine, Error, Event, FinalAck, InitAck,
        InputVini, Output, SetInputAck, SetOutputAck, SignInput, SignatureAck, State,
    },
    xmr::{
        addr::{AccountPublicAddress, Destination},
        key_image::TransferDetails,
        keys::{derive_public_key, generate_key_derivation, AccountKeys, Network},
        to_vec,
        tsx_data::{RsigData, TsxData},
        tx::{CtKey, OutputEntry, SourceEntry, TxinToKey},
    },
};

pub const SEED: [u8; 32] = [0x4d; 32];

pub const RING_SIZE: usize = 4;

/// Driver implementation for test use
pub struct TestDriver {
    pub seed: [u8; 32],
}

impl Driver for TestDriver {
    fn account_seed(&self, path: &[u32]) -> Zeroizing<[u8; 32]> {
        let mut b = self.seed.to_vec();
        for p in path {
            b.extend_from_slice(&p.to_le_bytes());
        }
        Zeroizing::new(keccak(&b))
    }

    fn network(&self) -> Network {
        Network::Testnet
    }
}

/// Confirmation stub, recording progress callbacks
#[derive(Default)]
pub struct TestUi {
    pub reject: bool,
    pub steps: Vec<(u16, usize, usize)>,
    pub finished: usize,
    pub errors: usize,
}

impl Confirm for TestUi {
    fn confirm_transaction(&mut self, tsx_data: &TsxData, _keys: &AccountKeys) -> bool {
        debug!("confirm: {tsx_data:?}");
        !self.reject
    }

    fn confirm_fee(&mut self, _fee: u64) -> bool {
        !self.reject
    }

    fn confirm_key_image_sync(&mut self, _num: usize) -> bool {
        !self.reject
    }

    fn transaction_step(&mut self, step: u16, sub_step: usize, sub_step_total: usize) {
        self.steps.push((step, sub_step, sub_step_total));
    }

    fn transaction_finished(&mut self) {
        self.finished += 1;
    }

    fn transaction_error(&mut self) {
        self.errors += 1;
    }
}

pub type TestEngine<'a> = Engine<TestDriver, &'a mut TestUi, Hc128Rng>;

pub fn init_logging() {
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, Default::default());
}

pub fn rng(seed: u64) -> Hc128Rng {
    Hc128Rng::seed_from_u64(seed)
}

pub fn engine(ui: &mut TestUi, seed: u64) -> TestEngine {
    Engine::new_with_rng(TestDriver { seed: SEED }, ui, rng(seed))
}

/// Account keys as derived on device
pub fn account(index: u32) -> AccountKeys {
    let drv = TestDriver { seed: SEED };
    let seed = drv.account_seed(&wallet_path(index));
    AccountKeys::from_seed(&keccak(&seed[..]), drv.network())
}

pub fn address(keys: &AccountKeys) -> AccountPublicAddress {
    AccountPublicAddress::new(encode_point(&keys.spend_public), encode_point(&keys.view_public))
}

/// Some other wallet
pub fn foreign_address(n: u8) -> AccountPublicAddress {
    address(&AccountKeys::from_seed(&[n; 32], Network::Testnet))
}

/// Issue an event through its wire encoding
pub fn exchange(e: &mut TestEngine, evt: &Event) -> Result<Output, Error> {
    let ins: u8 = evt.instruction().expect("event instruction").into();
    let body = to_vec(evt).unwrap();

    let parsed = Event::parse(ins, &body)?;
    assert_eq!(&parsed, evt);

    let r = e.update(&parsed)?;

    let b = to_vec(&r).unwrap();
    assert_eq!(b[0], r.kind());

    Ok(r)
}

/// Build an output owned by `keys`, returning `(out_key, tx_pub)`
pub fn owned_output<R: CryptoRngCore>(keys: &AccountKeys, index: u64, rng: &mut R) -> (Key, Key) {
    let r = random_scalar(rng);
    let d = generate_key_derivation(&keys.view_public, &r);
    let out_key = derive_public_key(&d, index, &keys.spend_public);

    (encode_point(&out_key), encode_point(&scalarmult_base(&r)))
}

/// Build a source entry spending an owned output of `amount`, hidden among random decoys
pub fn owned_source<R: CryptoRngCore>(
    keys: &AccountKeys,
    amount: u64,
    real: usize,
    rng: &mut R,
) -> SourceEntry {
    let index = 1 + rng.next_u64() % 3;
    let (out_key, tx_pub) = owned_output(keys, index, rng);

    let mask = random_scalar(rng);
    let base = 1000 + rng.next_u64() % 100_000;

    let outputs = (0..RING_SIZE)
        .map(|i| {
            let key = match i == real {
                true => CtKey {
                    dest: out_key,
                    mask: encode_point(&gen_commitment(&mask, amount)),
                },
                false => CtKey {
                    dest: encode_point(&scalarmult_base(&random_scalar(rng))),
                    mask: encode_point(&scalarmult_base(&random_scalar(rng))),
                },
            };
            OutputEntry {
                index: base + 17 * i as u64,
                key,
            }
        })
        .collect();

    SourceEntry {
        outputs,
        real_output: real as u64,
        real_out_tx_key: tx_pub,
        real_out_additional_tx_keys: vec![],
        real_output_in_tx_index: index,
        amount,
        rct: true,
        mask: encode_scalar(&mask),
        multisig_klrki: None,
    }
}

/// Owned transfer for key image sync
pub fn owned_transfer<R: CryptoRngCore>(keys: &AccountKeys, rng: &mut R) -> TransferDetails {
    let index = rng.next_u64() % 4;
    let (out_key, tx_pub_key) = owned_output(keys, index, rng);

    TransferDetails {
        out_key,
        tx_pub_key,
        additional_tx_pub_keys: vec![],
        internal_output_index: index,
    }
}

/// Transaction under test
pub struct TxFixture {
    pub tsx: TsxData,
    pub sources: Vec<SourceEntry>,
}

/// Spend `inputs` paying `outputs` to foreign wallets, with `change` back to the account
pub fn tx_fixture<R: CryptoRngCore>(
    keys: &AccountKeys,
    inputs: &[u64],
    outputs: &[u64],
    change: u64,
    fee: u64,
    rng: &mut R,
) -> TxFixture {
    let sources = inputs
        .iter()
        .enumerate()
        .map(|(i, a)| owned_source(keys, *a, i % RING_SIZE, rng))
        .collect();

    let mut dests: Vec<_> = outputs
        .iter()
        .enumerate()
        .map(|(i, a)| Destination {
            amount: *a,
            addr: foreign_address(0x70 + i as u8),
            is_subaddress: false,
        })
        .collect();

    let change_dts = match change {
        0 => None,
        _ => {
            let d = Destination {
                amount: change,
                addr: address(keys),
                is_subaddress: false,
            };
            dests.push(d.clone());
            Some(d)
        }
    };

    let tsx = TsxData {
        version: 2,
        unlock_time: 0,
        rsig_data: RsigData {
            grouping: vec![dests.len() as u64],
            offload: false,
        },
        outputs: dests,
        change_dts,
        num_inputs: inputs.len() as u64,
        mixin: RING_SIZE as u64 - 1,
        fee,
        is_bulletproof: true,
        ..Default::default()
    };

    TxFixture { tsx, sources }
}

/// Host side record of a transaction run
#[derive(Default)]
pub struct Transcript {
    pub init: Option<InitAck>,
    pub inputs: Vec<SetInputAck>,
    /// Position to original input index
    pub perm: Vec<usize>,
    pub masks: Vec<Key>,
    pub outputs: Vec<SetOutputAck>,
    pub prefix: Option<AllOutputsAck>,
    pub full_message: Key,
    pub signatures: Vec<SignatureAck>,
    pub fin: Option<FinalAck>,
}

impl Transcript {
    pub fn init(e: &mut TestEngine, fx: &TxFixture) -> Result<Self, Error> {
        let r = exchange(
            e,
            &Event::TxInit {
                account_index: 0,
                tsx_data: fx.tsx.clone(),
            },
        )?;

        let init = match r {
            Output::TxInit(a) => a,
            o => panic!("unexpected response: {o:?}"),
        };
        assert_eq!(init.hmacs.len(), fx.tsx.outputs.len());

        Ok(Self {
            init: Some(init),
            ..Default::default()
        })
    }

    fn in_memory(&self) -> bool {
        self.init.as_ref().map(|i| i.in_memory).unwrap_or(false)
    }

    /// Set each input, computing the key image ordering
    pub fn set_inputs(&mut self, e: &mut TestEngine, fx: &TxFixture) -> Result<(), Error> {
        for src in &fx.sources {
            let r = exchange(
                e,
                &Event::TxSetInput {
                    src_entr: src.clone(),
                },
            )?;
            match r {
                Output::TxSetInput(a) => self.inputs.push(a),
                o => panic!("unexpected response: {o:?}"),
            }
        }

        let images: Vec<Key> = self.inputs.iter().map(|a| key_image(&a.vini)).collect();
        self.perm = (0..images.len()).collect();
        self.perm.sort_by(|a, b| images[*b].cmp(&images[*a]));

        Ok(())
    }

    /// Input at permuted position `i`, as echoed back to the device
    pub fn vini(&self, fx: &TxFixture, i: usize) -> InputVini {
        let j = self.perm[i];
        let a = &self.inputs[j];

        InputVini {
            src_entr: fx.sources[j].clone(),
            vini: a.vini.clone(),
            vini_hmac: a.vini_hmac,
            pseudo_out: a.pseudo_out,
            pseudo_out_hmac: a.pseudo_out_hmac,
        }
    }

    /// Permute and stream inputs (unless held on device), then seal them
    pub fn permute(&mut self, e: &mut TestEngine, fx: &TxFixture) -> Result<(), Error> {
        if !self.in_memory() {
            let r = exchange(
                e,
                &Event::TxInputPermutation {
                    perm: self.perm.clone(),
                },
            )?;
            assert_eq!(r.state(), Some(State::InputPermutation));

            for i in 0..self.perm.len() {
                exchange(e, &Event::TxInputVini(self.vini(fx, i)))?;
            }
        }

        match exchange(e, &Event::TxAllInputsSet)? {
            Output::TxAllInputsSet { out_masks } => self.masks = out_masks,
            o => panic!("unexpected response: {o:?}"),
        }

        Ok(())
    }

    /// Set output `i`, optionally carrying a host computed range proof
    pub fn set_output(
        &mut self,
        e: &mut TestEngine,
        fx: &TxFixture,
        i: usize,
        rsig: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        let hmac = self.init.as_ref().map(|a| a.hmacs[i]).unwrap_or_default();

        let r = exchange(
            e,
            &Event::TxSetOutput {
                dst_entr: fx.tsx.outputs[i].clone(),
                dst_entr_hmac: hmac,
                rsig,
            },
        )?;
        match r {
            Output::TxSetOutput(a) => self.outputs.push(a),
            o => panic!("unexpected response: {o:?}"),
        }

        Ok(())
    }

    /// Close the outputs, fetching the prefix
    pub fn all_outputs_set(&mut self, e: &mut TestEngine) -> Result<(), Error> {
        match exchange(e, &Event::TxAllOutputsSet)? {
            Output::TxAllOutputsSet(a) => self.prefix = Some(a),
            o => panic!("unexpected response: {o:?}"),
        }

        Ok(())
    }

    pub fn set_outputs(&mut self, e: &mut TestEngine, fx: &TxFixture) -> Result<(), Error> {
        for i in 0..fx.tsx.outputs.len() {
            self.set_output(e, fx, i, None)?;
        }

        self.all_outputs_set(e)
    }

    pub fn sign(&mut self, e: &mut TestEngine, fx: &TxFixture) -> Result<(), Error> {
        match exchange(e, &Event::TxMlsagDone)? {
            Output::TxMlsagDone { full_message_hash } => self.full_message = full_message_hash,
            o => panic!("unexpected response: {o:?}"),
        }

        // Full RingCT signs every input in a single MLSAG
        let n = match self.inputs[0].pseudo_out.is_some() {
            true => self.perm.len(),
            false => 1,
        };

        for i in 0..n {
            let a = &self.inputs[self.perm[i]];
            let req = SignInput {
                vini: self.vini(fx, i),
                alpha_enc: a.alpha_enc.clone(),
                spend_enc: a.spend_enc.clone(),
            };

            match exchange(e, &Event::TxSignInput(req))? {
                Output::TxSignInput(s) => self.signatures.push(s),
                o => panic!("unexpected response: {o:?}"),
            }
        }

        Ok(())
    }

    pub fn finalize(&mut self, e: &mut TestEngine) -> Result<(), Error> {
        match exchange(e, &Event::TxFinal)? {
            Output::TxFinal(a) => self.fin = Some(a),
            o => panic!("unexpected response: {o:?}"),
        }
        Ok(())
    }

    /// Run a complete transaction
    pub fn run(e: &mut TestEngine, fx: &TxFixture) -> Result<Self, Error> {
        let mut t = Self::init(e, fx)?;
        t.set_inputs(e, fx)?;
        t.permute(e, fx)?;
        t.set_outputs(e, fx)?;
        t.sign(e, fx)?;
        t.finalize(e)?;
        Ok(t)
    }
}

/// Fetch the key image from a serialized input
pub fn key_image(vini: &[u8]) -> Key {
    let (v, _) = TxinToKey::decode_owned(vini).unwrap();
    v.k_image
}
