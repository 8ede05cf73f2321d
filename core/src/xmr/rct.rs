// Copyright (c) 2022-2023 The MobileCoin Foundation

//! RingCT signature type selection

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::{Display, EnumString};

/// RingCT signature type, serialized as the first byte of `rct_signatures`
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum RctType {
    Null = 0,
    /// Single aggregate MLSAG across all inputs
    Full = 1,
    /// Per-input MLSAG against pseudo outputs
    Simple = 2,
    FullBulletproof = 3,
    SimpleBulletproof = 4,
}

impl RctType {
    /// Select the signature type for a transaction
    pub fn select(num_inputs: usize, bulletproof: bool) -> Self {
        match (num_inputs > 1, bulletproof) {
            (true, false) => RctType::Simple,
            (true, true) => RctType::SimpleBulletproof,
            (false, false) => RctType::Full,
            (false, true) => RctType::FullBulletproof,
        }
    }

    /// Check whether inputs are signed individually against pseudo outputs
    pub fn is_simple(&self) -> bool {
        matches!(self, RctType::Simple | RctType::SimpleBulletproof)
    }

    /// Check whether range proofs are bulletproofs
    pub fn is_bulletproof(&self) -> bool {
        matches!(self, RctType::FullBulletproof | RctType::SimpleBulletproof)
    }

    /// Check whether pseudo outputs are part of the signed base
    /// (pre-bulletproof simple transactions only)
    pub fn hashes_pseudo_outs(&self) -> bool {
        matches!(self, RctType::Simple)
    }
}
