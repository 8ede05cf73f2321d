// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Key image export for watch-only wallet synchronisation
//!
//! The host announces the number of owned outputs and the expected hash over
//! them, streams [TransferDetails] in batches and receives encrypted
//! `(ki, c, r)` triples. The encryption key is only released by
//! [KeyImageSync::finalize] once the count and hash match.

use alloc::vec::Vec;

use rand_core::{CryptoRngCore, OsRng};
use strum::{Display, EnumString};
use zeroize::Zeroize;

use super::{account_keys, Confirm, Driver, Error};
use crate::{
    crypto::{chacha::encrypt_pack, ct_eq, KeccakSponge, Key},
    xmr::{
        key_image::{export_key_image, TransferDetails},
        keys::{AccountKeys, SubaddressMap},
        tsx_data::MAX_MINOR_INDICES,
    },
};

/// Maximum transfers accepted per [KeyImageSync::step]
pub const MAX_SYNC_BATCH: usize = 16;

/// Key image sync request
#[derive(Clone, PartialEq, Debug, Default)]
pub struct KeyImageSyncInit {
    pub account_index: u32,
    /// Number of transfers to be exported
    pub num: usize,
    /// Expected hash over all per-transfer hashes
    pub hash: Key,
    /// Subaddress ranges, `(major, [minor..])`
    pub subs: Vec<(u32, Vec<u32>)>,
}

/// Key image sync status
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString)]
pub enum SyncState {
    Running,
    Done,
    Failed,
}

/// Sync progress
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SyncStep {
    /// Transfers exported so far
    Continue(usize),
    /// All transfers exported, call [KeyImageSync::finalize]
    Done,
}

/// [KeyImageSync::step] response
#[derive(Clone, PartialEq, Debug)]
pub struct SyncStepAck {
    /// Encrypted `ki || c || r` per transfer
    pub items: Vec<Vec<u8>>,
    pub progress: SyncStep,
}

/// Key image sync engine
pub struct KeyImageSync<RNG: CryptoRngCore = OsRng> {
    keys: AccountKeys,
    subaddresses: SubaddressMap,

    num: usize,
    idx: usize,
    expected: Key,
    hasher: KeccakSponge,
    enc_key: Key,

    state: SyncState,
    rng: RNG,
}

impl KeyImageSync {
    /// Start a sync using the default [OsRng]
    pub fn init<DRV: Driver, UI: Confirm>(
        drv: &DRV,
        ui: &mut UI,
        req: &KeyImageSyncInit,
    ) -> Result<Self, Error> {
        Self::init_with_rng(drv, ui, req, OsRng {})
    }
}

impl<RNG: CryptoRngCore> KeyImageSync<RNG> {
    /// Start a sync, confirming the export with the user
    pub fn init_with_rng<DRV: Driver, UI: Confirm>(
        drv: &DRV,
        ui: &mut UI,
        req: &KeyImageSyncInit,
        mut rng: RNG,
    ) -> Result<Self, Error> {
        if req.num == 0 {
            return Err(Error::InvalidLength);
        }
        if req
            .subs
            .iter()
            .any(|(_, minors)| minors.len() > MAX_MINOR_INDICES)
        {
            return Err(Error::InvalidLength);
        }

        if !ui.confirm_key_image_sync(req.num) {
            return Err(Error::UserCancelled);
        }

        let keys = account_keys(drv, req.account_index);

        let mut subaddresses = SubaddressMap::new();
        keys.compute_subaddresses(0, &[0], &mut subaddresses);
        for (major, minors) in &req.subs {
            keys.compute_subaddresses(*major, minors, &mut subaddresses);
        }

        let mut enc_key = [0u8; 32];
        rng.fill_bytes(&mut enc_key);

        #[cfg(feature = "log")]
        log::debug!(
            "key image sync: {} transfers, {} subaddresses",
            req.num,
            subaddresses.len()
        );

        Ok(Self {
            keys,
            subaddresses,
            num: req.num,
            idx: 0,
            expected: req.hash,
            hasher: KeccakSponge::new(),
            enc_key,
            state: SyncState::Running,
            rng,
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Export key images for the next batch of transfers
    pub fn step(&mut self, transfers: &[TransferDetails]) -> Result<SyncStepAck, Error> {
        if self.state != SyncState::Running || self.idx == self.num {
            return Err(Error::ProtocolOrder);
        }

        let r = self.export(transfers);
        if r.is_err() {
            self.fail();
        }
        r
    }

    /// Check the transfer count and hash, returning the item encryption key
    pub fn finalize(&mut self) -> Result<Key, Error> {
        if self.state != SyncState::Running {
            return Err(Error::ProtocolOrder);
        }

        if self.idx != self.num {
            self.fail();
            return Err(Error::InvalidLength);
        }

        let h = core::mem::replace(&mut self.hasher, KeccakSponge::new()).finalize();
        if !ct_eq(&h, &self.expected) {
            #[cfg(feature = "log")]
            log::error!("key image sync hash mismatch");

            self.fail();
            return Err(Error::InvalidHash);
        }

        self.state = SyncState::Done;

        Ok(self.enc_key)
    }

    fn export(&mut self, transfers: &[TransferDetails]) -> Result<SyncStepAck, Error> {
        if transfers.is_empty() || transfers.len() > MAX_SYNC_BATCH {
            return Err(Error::InvalidLength);
        }
        if self.idx + transfers.len() > self.num {
            return Err(Error::InvalidIndex);
        }

        let mut items = Vec::with_capacity(transfers.len());
        for td in transfers {
            self.hasher.update(&td.compute_hash());

            let ki = export_key_image(&self.keys, &self.subaddresses, td, &mut self.rng)?;
            let mut b = ki.to_bytes();
            let enc = encrypt_pack(&self.enc_key, &b, &mut self.rng);
            b.zeroize();

            items.push(enc?);
        }

        self.idx += transfers.len();

        let progress = match self.idx == self.num {
            true => SyncStep::Done,
            false => SyncStep::Continue(self.idx),
        };

        Ok(SyncStepAck { items, progress })
    }

    fn fail(&mut self) {
        self.enc_key.zeroize();
        self.state = SyncState::Failed;
    }
}

impl<RNG: CryptoRngCore> Drop for KeyImageSync<RNG> {
    fn drop(&mut self) {
        self.enc_key.zeroize();
    }
}
