// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Public addresses and transaction destinations

use alloc::{collections::BTreeSet, vec::Vec};

use super::codec::{decode_via_reader, encode_via_writer, Reader, Writer};
use crate::{
    crypto::{decode_point, EdwardsPoint, Key},
    engine::Error,
};

/// Account (or subaddress) public address, `(spend, view)` public keys
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccountPublicAddress {
    pub spend_public_key: Key,
    pub view_public_key: Key,
}

impl AccountPublicAddress {
    pub const fn new(spend_public_key: Key, view_public_key: Key) -> Self {
        Self {
            spend_public_key,
            view_public_key,
        }
    }

    /// Decode and check the spend public key
    pub fn spend_public(&self) -> Result<EdwardsPoint, Error> {
        decode_point(&self.spend_public_key)
    }

    /// Decode and check the view public key
    pub fn view_public(&self) -> Result<EdwardsPoint, Error> {
        decode_point(&self.view_public_key)
    }

    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.put(&self.spend_public_key)?;
        w.put(&self.view_public_key)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            spend_public_key: r.key()?,
            view_public_key: r.key()?,
        })
    }
}

encode_via_writer!(AccountPublicAddress);
decode_via_reader!(AccountPublicAddress);

/// Transaction destination entry
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Destination {
    pub amount: u64,
    pub addr: AccountPublicAddress,
    pub is_subaddress: bool,
}

impl Destination {
    pub(crate) fn write(&self, w: &mut Writer) -> Result<(), Error> {
        w.varint(self.amount)?;
        self.addr.write(w)?;
        w.bool(self.is_subaddress)
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, Error> {
        let amount = r.varint()?;
        let addr = AccountPublicAddress::read(r)?;
        let is_subaddress = r.bool()?;

        Ok(Self {
            amount,
            addr,
            is_subaddress,
        })
    }
}

encode_via_writer!(Destination);
decode_via_reader!(Destination);

/// Destination classification used to select transaction public keys
#[derive(Clone, PartialEq, Debug, Default)]
pub struct AddressClasses {
    /// Count of distinct standard address destinations
    pub num_std: usize,
    /// Count of distinct subaddress destinations
    pub num_sub: usize,
    /// Last subaddress destination seen
    pub single_dest_subaddress: Option<AccountPublicAddress>,
}

impl AddressClasses {
    /// Check whether per-output additional transaction keys are required
    pub fn need_additional_keys(&self) -> bool {
        self.num_sub > 0 && (self.num_std > 0 || self.num_sub > 1)
    }

    /// Fetch the lone subaddress destination, if that is the only destination
    pub fn lone_subaddress(&self) -> Option<&AccountPublicAddress> {
        match (self.num_std, self.num_sub) {
            (0, 1) => self.single_dest_subaddress.as_ref(),
            _ => None,
        }
    }
}

/// Classify distinct non-change destinations into standard and subaddresses
pub fn classify_subaddresses(
    dests: &[Destination],
    change: Option<&AccountPublicAddress>,
) -> AddressClasses {
    let mut seen = BTreeSet::new();
    let mut c = AddressClasses::default();

    for d in dests {
        if Some(&d.addr) == change {
            continue;
        }
        if !seen.insert(d.addr) {
            continue;
        }

        if d.is_subaddress {
            c.num_sub += 1;
            c.single_dest_subaddress = Some(d.addr);
        } else {
            c.num_std += 1;
        }
    }

    c
}

/// Fetch the view public key of the single non-change destination with a
/// non-zero amount, returning `None` when there are none or several
pub fn destination_view_key(
    dests: &[Destination],
    change: Option<&AccountPublicAddress>,
) -> Option<Key> {
    let mut found: Option<&AccountPublicAddress> = None;

    for d in dests.iter().filter(|d| d.amount > 0) {
        if Some(&d.addr) == change || Some(&d.addr) == found {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(&d.addr);
    }

    found.map(|a| a.view_public_key)
}

/// Locate destinations paying the change address
pub fn change_indices(dests: &[Destination], change: &AccountPublicAddress) -> Vec<usize> {
    dests
        .iter()
        .enumerate()
        .filter(|(_, d)| &d.addr == change)
        .map(|(i, _)| i)
        .collect()
}
