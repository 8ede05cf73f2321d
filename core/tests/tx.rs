use std::ops::Range;

use encdec::DecodeOwned;

use ledger_xmr_core::{
    crypto::{
        chacha::decrypt_pack, decode_point, encode_point, gen_commitment, inv_eight, keccak,
        scalarmult_base, Key, Scalar,
    },
    engine::{
        compute_tx_key, Error, Event, SignInput, State, MANY_INPUTS_THRESHOLD, STEP_ALL_IN,
        STEP_ALL_OUT, STEP_INP, STEP_MLSAG, STEP_OUT, STEP_PERM, STEP_SIGN, STEP_VINI,
    },
    xmr::{
        borromean::{verify_range, RangeSig},
        bulletproof::{self, Bulletproof},
        keys::{derivation_to_scalar, generate_key_derivation},
        mlsag::{verify_rct_mg_simple, MgSig},
        rct::RctType,
        to_vec,
        tsx_data::RsigData,
        tx::TX_EXTRA_TAG_PUBKEY,
        varint,
    },
};

mod helpers;
use helpers::*;

/// Expected prefix hash, serialized in full rather than streamed
fn prefix_hash(fx: &TxFixture, t: &Transcript, extra: &[u8]) -> Key {
    fn v(b: &mut Vec<u8>, n: u64) {
        let (d, l) = varint::to_bytes(n);
        b.extend_from_slice(&d[..l]);
    }

    let mut b = Vec::new();

    v(&mut b, 2);
    v(&mut b, fx.tsx.unlock_time);
    v(&mut b, t.perm.len() as u64);
    for j in &t.perm {
        b.extend_from_slice(&t.inputs[*j].vini);
    }
    v(&mut b, t.outputs.len() as u64);
    for o in &t.outputs {
        b.extend_from_slice(&o.tx_out);
    }
    v(&mut b, extra.len() as u64);
    b.extend_from_slice(extra);

    keccak(&b)
}

/// Check MLSAGs against the ring and pseudo output for each permuted input
fn check_signatures(fx: &TxFixture, t: &Transcript) {
    assert_eq!(t.signatures.len(), t.perm.len());

    for (i, s) in t.signatures.iter().enumerate() {
        let j = t.perm[i];
        let (sig, n) = MgSig::decode_owned(&s.signature).unwrap();
        assert_eq!(n, s.signature.len());

        let pubs: Vec<_> = fx.sources[j].outputs.iter().map(|o| o.key).collect();
        let po = decode_point(&t.inputs[j].pseudo_out.unwrap()).unwrap();
        let ki = key_image(&t.inputs[j].vini);

        assert!(
            verify_rct_mg_simple(&t.full_message, &pubs, &po, &sig, &ki),
            "signature {i} (input {j})"
        );
        assert!(s.cout.is_none());
    }
}

/// Host side bulletproof over `outputs[range]`, using the masks released by the device
fn host_proof(fx: &TxFixture, t: &Transcript, range: Range<usize>, seed: u64) -> Vec<u8> {
    let amounts: Vec<_> = fx.tsx.outputs[range.clone()].iter().map(|d| d.amount).collect();
    let masks: Vec<_> = t.masks[range]
        .iter()
        .map(|m| Scalar::from_canonical_bytes(*m).unwrap())
        .collect();

    let p = bulletproof::prove_batch(&amounts, &masks, &mut rng(seed)).unwrap();
    to_vec(&p).unwrap()
}

/// Start a transaction and seal its inputs
fn inputs_sealed(e: &mut TestEngine, fx: &TxFixture) -> Transcript {
    let mut t = Transcript::init(e, fx).unwrap();
    t.set_inputs(e, fx).unwrap();
    t.permute(e, fx).unwrap();
    t
}

#[test]
fn simple_two_in_two_out() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(1));

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 2);

    let t = Transcript::run(&mut e, &fx).unwrap();
    assert_eq!(e.state(), State::Final);

    let init = t.init.as_ref().unwrap();
    assert!(!init.in_memory && !init.many_inputs && !init.many_outputs);

    // Key images sorted descending in the prefix
    let images: Vec<_> = t.perm.iter().map(|j| key_image(&t.inputs[*j].vini)).collect();
    assert!(images.windows(2).all(|w| w[0] > w[1]));

    // Offloaded values are all protected
    for a in &t.inputs {
        assert!(a.pseudo_out_hmac.is_some());
        assert!(a.alpha_enc.is_some());
        assert!(a.spend_enc.is_none());
    }
    assert!(t.masks.is_empty());

    // One batch, proven when its last output is set
    assert!(t.outputs[0].rsig.is_none());
    let (mut p, _) = Bulletproof::decode_owned(t.outputs[1].rsig.as_ref().unwrap()).unwrap();
    p.V = t
        .outputs
        .iter()
        .map(|o| encode_point(&(decode_point(&o.out_pk.mask).unwrap() * inv_eight())))
        .collect();
    assert_eq!(bulletproof::verify(&p), Ok(()));

    let prefix = t.prefix.as_ref().unwrap();
    assert_eq!(prefix.tx_prefix_hash, prefix_hash(&fx, &t, &prefix.extra));
    assert_eq!(prefix.rv.txn_fee, 1_000);
    assert_eq!(prefix.rv.message, prefix.tx_prefix_hash);
    assert_eq!(prefix.rv.rv_type, RctType::SimpleBulletproof);

    // extra is just the tx public key
    assert_eq!(prefix.extra.len(), 33);
    assert_eq!(prefix.extra[0], TX_EXTRA_TAG_PUBKEY);

    // Change output is recoverable by the account
    let mut tx_pub = [0u8; 32];
    tx_pub.copy_from_slice(&prefix.extra[1..]);
    let d = generate_key_derivation(&decode_point(&tx_pub).unwrap(), &keys.view_private);
    let (mask, amount) = t.outputs[1].ecdh_info.decode(&derivation_to_scalar(&d, 1));
    assert_eq!(amount, Scalar::from(3_000u64));
    assert_eq!(
        encode_point(&gen_commitment(&mask, 3_000)),
        t.outputs[1].out_pk.mask
    );

    check_signatures(&fx, &t);

    // Transaction keys are recoverable from the backup
    let fin = t.fin.as_ref().unwrap();
    assert!(fin.cout_key.is_none());
    let rand_mult = Scalar::from_canonical_bytes(fin.rand_mult).unwrap();
    let tx_key = compute_tx_key(
        &keys.spend_private,
        &prefix.tx_prefix_hash,
        &fin.salt,
        &rand_mult,
    )
    .unwrap();
    let plain = decrypt_pack(&tx_key, &fin.tx_enc_keys).unwrap();
    assert_eq!(plain.len(), 32);

    let mut r = [0u8; 32];
    r.copy_from_slice(&plain);
    let r = Scalar::from_canonical_bytes(r).unwrap();
    assert_eq!(encode_point(&scalarmult_base(&r)), tx_pub);

    drop(e);
    assert_eq!(ui.finished, 1);
    assert_eq!(ui.errors, 0);

    let phases: Vec<_> = ui.steps.iter().map(|s| s.0).collect();
    assert_eq!(
        phases,
        [
            STEP_INP,
            STEP_INP,
            STEP_PERM,
            STEP_VINI,
            STEP_VINI,
            STEP_ALL_IN,
            STEP_OUT,
            STEP_OUT,
            STEP_ALL_OUT,
            STEP_MLSAG,
            STEP_SIGN,
            STEP_SIGN
        ]
    );
}

#[test]
fn in_memory() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[4_000, 4_000, 4_000], &[5_000, 3_000], 3_500, 500, &mut rng(3));
    fx.tsx.in_memory = true;

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 4);

    let mut t = Transcript::init(&mut e, &fx).unwrap();
    assert!(t.init.as_ref().unwrap().in_memory);

    t.set_inputs(&mut e, &fx).unwrap();
    // Permutation is applied on device once the last input is set
    assert_eq!(e.state(), State::InputPermutation);
    assert_eq!(
        e.set_permutation(&t.perm),
        Err(Error::ProtocolOrder),
        "host permutation after in memory sort"
    );
    for a in &t.inputs {
        assert!(a.pseudo_out.is_some());
        assert!(a.pseudo_out_hmac.is_none() && a.alpha_enc.is_none());
    }

    t.permute(&mut e, &fx).unwrap();
    t.set_outputs(&mut e, &fx).unwrap();

    let prefix = t.prefix.as_ref().unwrap();
    assert_eq!(prefix.tx_prefix_hash, prefix_hash(&fx, &t, &prefix.extra));

    t.sign(&mut e, &fx).unwrap();
    t.finalize(&mut e).unwrap();
    assert_eq!(e.state(), State::Final);

    check_signatures(&fx, &t);
}

#[test]
fn many_inputs() {
    init_logging();

    let keys = account(0);
    let inputs = [1_000; MANY_INPUTS_THRESHOLD];
    let mut fx = tx_fixture(&keys, &inputs, &[9_000], 500, 500, &mut rng(5));
    // Ignored past the threshold
    fx.tsx.in_memory = true;

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 6);

    let t = Transcript::run(&mut e, &fx).unwrap();
    let init = t.init.as_ref().unwrap();
    assert!(init.many_inputs && !init.in_memory);

    for a in &t.inputs {
        assert!(a.spend_enc.is_some());
    }
    check_signatures(&fx, &t);
}

#[test]
fn expected_prefix_hash() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[2_000, 2_000], &[3_000], 500, 500, &mut rng(7));

    // Run once to learn the prefix for a fixed tx key
    fx.tsx.use_tx_keys = vec![[0x01; 32]];

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 8);
    let t = Transcript::run(&mut e, &fx).unwrap();
    let expected = t.prefix.as_ref().unwrap().tx_prefix_hash;

    // Same inputs and keys give the same prefix
    fx.tsx.exp_tx_prefix_hash = expected.to_vec();
    let t = Transcript::run(&mut e, &fx).unwrap();
    assert_eq!(t.prefix.as_ref().unwrap().tx_prefix_hash, expected);

    // Any other prefix is rejected
    fx.tsx.exp_tx_prefix_hash = vec![0xaa; 32];
    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    t.permute(&mut e, &fx).unwrap();
    assert_eq!(t.set_outputs(&mut e, &fx), Err(Error::PrefixMismatch));
    assert_eq!(e.state(), State::Fail);
}

#[test]
fn fee_mismatch() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(9));
    fx.tsx.fee += 1;

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 10);

    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    t.permute(&mut e, &fx).unwrap();
    assert_eq!(t.set_outputs(&mut e, &fx), Err(Error::ValueMismatch));
    assert_eq!(e.state(), State::Fail);

    // Failed sessions only accept a new init
    assert_eq!(e.mlsag_done(), Err(Error::ProtocolOrder));

    drop(e);
    assert_eq!(ui.errors, 1);
    assert_eq!(ui.finished, 0);
}

#[test]
fn tampered_inputs() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(11));

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 12);

    // Modified vin
    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    e.set_permutation(&t.perm).unwrap();

    let mut v = t.vini(&fx, 0);
    let n = v.vini.len();
    v.vini[n - 1] ^= 0x01;
    assert_eq!(e.input_vini(&v), Err(Error::Integrity));
    assert_eq!(e.state(), State::Fail);

    // Swapped pseudo outputs
    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    e.set_permutation(&t.perm).unwrap();

    let mut v = t.vini(&fx, 0);
    v.pseudo_out = t.vini(&fx, 1).pseudo_out;
    assert_eq!(e.input_vini(&v), Err(Error::Integrity));

    // Modified encrypted alpha at signing
    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    t.permute(&mut e, &fx).unwrap();
    t.set_outputs(&mut e, &fx).unwrap();
    e.mlsag_done().unwrap();

    let a = &t.inputs[t.perm[0]];
    let mut alpha_enc = a.alpha_enc.clone().unwrap();
    alpha_enc[20] ^= 0x01;
    let req = SignInput {
        vini: t.vini(&fx, 0),
        alpha_enc: Some(alpha_enc),
        spend_enc: None,
    };
    assert_eq!(e.sign_input(&req), Err(Error::Authentication));
    assert_eq!(e.state(), State::Fail);
}

#[test]
fn illegal_transitions() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(13));

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 14);

    assert_eq!(exchange(&mut e, &Event::TxFinal), Err(Error::ProtocolOrder));
    assert_eq!(e.state(), State::Start);

    let mut t = Transcript::init(&mut e, &fx).unwrap();

    // Outputs before inputs
    assert_eq!(
        e.set_output(&fx.tsx.outputs[0], &t.init.as_ref().unwrap().hmacs[0], None),
        Err(Error::ProtocolOrder)
    );
    assert_eq!(e.all_inputs_set(), Err(Error::ProtocolOrder));
    assert_eq!(e.state(), State::InputCount);

    t.set_inputs(&mut e, &fx).unwrap();
    assert_eq!(e.state(), State::InputDone);

    // Inputs are closed
    assert_eq!(
        e.set_input(&fx.sources[0]),
        Err(Error::ProtocolOrder)
    );

    // Sealing before every input is streamed
    e.set_permutation(&t.perm).unwrap();
    e.input_vini(&t.vini(&fx, 0)).unwrap();
    assert_eq!(e.all_inputs_set(), Err(Error::ProtocolOrder));
    assert_eq!(e.state(), State::InputVins);

    // Session is intact, the transaction completes
    e.input_vini(&t.vini(&fx, 1)).unwrap();
    e.all_inputs_set().unwrap();
    t.set_outputs(&mut e, &fx).unwrap();
    t.sign(&mut e, &fx).unwrap();

    // No signing past the last input
    assert_eq!(
        e.sign_input(&SignInput {
            vini: t.vini(&fx, 0),
            ..Default::default()
        }),
        Err(Error::ProtocolOrder)
    );

    t.finalize(&mut e).unwrap();
    assert_eq!(e.state(), State::Final);
}

#[test]
fn invalid_permutation() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(15));

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 16);

    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();

    assert_eq!(e.set_permutation(&[0, 0]), Err(Error::InvalidPermutation));
    assert_eq!(e.state(), State::Fail);

    // Rejected at parse for wire requests
    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    assert_eq!(
        exchange(&mut e, &Event::TxInputPermutation { perm: vec![1, 1] }),
        Err(Error::InvalidPermutation)
    );
    assert_eq!(e.state(), State::InputDone);

    assert_eq!(e.set_permutation(&[0, 1, 2]), Err(Error::InvalidPermutation));
}

#[test]
fn cancelled() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(17));

    let mut ui = TestUi {
        reject: true,
        ..Default::default()
    };
    let mut e = engine(&mut ui, 18);

    assert!(matches!(
        Transcript::init(&mut e, &fx),
        Err(Error::UserCancelled)
    ));
    assert_eq!(e.state(), State::Start);

    drop(e);
    assert_eq!(ui.errors, 0);
}

#[test]
fn suspend_resume() {
    init_logging();

    let keys = account(0);
    let fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(19));

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 20);

    let mut t = Transcript::init(&mut e, &fx).unwrap();
    t.set_inputs(&mut e, &fx).unwrap();
    t.permute(&mut e, &fx).unwrap();
    t.set_outputs(&mut e, &fx).unwrap();

    let blob = e.suspend().unwrap();
    drop(e);

    // A fresh device with the same seed picks up where we left off
    let mut ui2 = TestUi::default();
    let mut e2 = engine(&mut ui2, 21);
    assert_eq!(e2.resume(&blob), Ok(State::OutputDone));

    t.sign(&mut e2, &fx).unwrap();
    t.finalize(&mut e2).unwrap();
    assert_eq!(e2.state(), State::Final);

    check_signatures(&fx, &t);
}

#[test]
fn borromean() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(22));
    fx.tsx.is_bulletproof = false;
    fx.tsx.rsig_data.grouping.clear();

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 23);

    let t = Transcript::run(&mut e, &fx).unwrap();
    assert_eq!(e.state(), State::Final);

    let prefix = t.prefix.as_ref().unwrap();
    assert_eq!(prefix.rv.rv_type, RctType::Simple);
    assert_eq!(prefix.tx_prefix_hash, prefix_hash(&fx, &t, &prefix.extra));

    // Each output carries a proof over its own commitment
    let commitments: Vec<_> = t
        .outputs
        .iter()
        .map(|o| decode_point(&o.out_pk.mask).unwrap())
        .collect();
    for (i, o) in t.outputs.iter().enumerate() {
        let sig = RangeSig::from_bytes(o.rsig.as_ref().unwrap()).unwrap();
        assert!(verify_range(&commitments[i], &sig), "output {i}");
        assert!(!verify_range(&commitments[1 - i], &sig), "output {i} swapped");
    }

    check_signatures(&fx, &t);

    // Borromean proofs cover a single output each
    fx.tsx.rsig_data.grouping = vec![2];
    assert!(matches!(
        Transcript::init(&mut e, &fx),
        Err(Error::Unsupported)
    ));
    assert_eq!(e.state(), State::Fail);
}

#[test]
fn borromean_fee_mismatch() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[6_000, 5_000], &[7_000], 3_000, 1_000, &mut rng(24));
    fx.tsx.is_bulletproof = false;
    fx.tsx.rsig_data.grouping.clear();
    fx.tsx.fee += 1;

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 25);

    let mut t = inputs_sealed(&mut e, &fx);
    assert_eq!(t.set_outputs(&mut e, &fx), Err(Error::ValueMismatch));
    assert_eq!(e.state(), State::Fail);
}

#[test]
fn offloaded_bulletproof() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[6_000, 5_000], &[4_000, 3_000], 3_000, 1_000, &mut rng(26));
    fx.tsx.rsig_data = RsigData {
        grouping: vec![2, 1],
        offload: true,
    };

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 27);

    let mut t = inputs_sealed(&mut e, &fx);
    assert_eq!(t.masks.len(), 3);

    t.set_output(&mut e, &fx, 0, None).unwrap();
    let p = host_proof(&fx, &t, 0..2, 28);
    t.set_output(&mut e, &fx, 1, Some(p)).unwrap();
    let p = host_proof(&fx, &t, 2..3, 29);
    t.set_output(&mut e, &fx, 2, Some(p)).unwrap();
    t.all_outputs_set(&mut e).unwrap();

    // Commitments use the released masks, nothing is proven on device
    for (i, o) in t.outputs.iter().enumerate() {
        assert!(o.rsig.is_none());
        let mask = Scalar::from_canonical_bytes(t.masks[i]).unwrap();
        assert_eq!(
            encode_point(&gen_commitment(&mask, fx.tsx.outputs[i].amount)),
            o.out_pk.mask
        );
    }

    t.sign(&mut e, &fx).unwrap();
    t.finalize(&mut e).unwrap();
    assert_eq!(e.state(), State::Final);

    check_signatures(&fx, &t);
}

#[test]
fn offloaded_bulletproof_rejected() {
    init_logging();

    let keys = account(0);
    let mut fx = tx_fixture(&keys, &[6_000, 5_000], &[4_000, 3_000], 3_000, 1_000, &mut rng(30));
    fx.tsx.rsig_data = RsigData {
        grouping: vec![2, 1],
        offload: true,
    };

    let mut ui = TestUi::default();
    let mut e = engine(&mut ui, 31);

    // Modified proof
    let mut t = inputs_sealed(&mut e, &fx);
    t.set_output(&mut e, &fx, 0, None).unwrap();
    let mut p = host_proof(&fx, &t, 0..2, 32);
    let n = p.len();
    p[n - 20] ^= 0x01;
    assert_eq!(
        t.set_output(&mut e, &fx, 1, Some(p)),
        Err(Error::RangeProofFailed)
    );
    assert_eq!(e.state(), State::Fail);

    // Valid proof over other masks
    let mut t = inputs_sealed(&mut e, &fx);
    t.set_output(&mut e, &fx, 0, None).unwrap();
    let amounts = [fx.tsx.outputs[0].amount, fx.tsx.outputs[1].amount];
    let masks = [Scalar::from(3u64), Scalar::from(5u64)];
    let p = bulletproof::prove_batch(&amounts, &masks, &mut rng(33)).unwrap();
    assert_eq!(
        t.set_output(&mut e, &fx, 1, Some(to_vec(&p).unwrap())),
        Err(Error::RangeProofFailed)
    );

    // Proof ahead of the batch closing output
    let mut t = inputs_sealed(&mut e, &fx);
    let p = host_proof(&fx, &t, 0..2, 34);
    assert_eq!(
        t.set_output(&mut e, &fx, 0, Some(p)),
        Err(Error::Integrity)
    );
    assert_eq!(e.state(), State::Fail);

    // Missing proof on the closing output
    let mut t = inputs_sealed(&mut e, &fx);
    t.set_output(&mut e, &fx, 0, None).unwrap();
    assert_eq!(t.set_output(&mut e, &fx, 1, None), Err(Error::Integrity));

    drop(e);
    assert_eq!(ui.errors, 4);
    assert_eq!(ui.finished, 0);
}
