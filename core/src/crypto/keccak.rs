// Copyright (c) 2022-2023 The MobileCoin Foundation

use alloc::vec::Vec;

use super::Key;

/// Keccak-256 rate in bytes
const RATE: usize = 136;

/// Resumable Keccak-256 sponge.
///
/// Unlike an opaque digest object the absorbed state and pending partial
/// block are plain data, so the running hash can be persisted between
/// protocol round-trips and restored bit-for-bit.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeccakSponge {
    state: [u64; 25],
    pending: Vec<u8>,
}

impl Default for KeccakSponge {
    fn default() -> Self {
        Self::new()
    }
}

impl KeccakSponge {
    /// Create a new (empty) sponge
    pub const fn new() -> Self {
        Self {
            state: [0u64; 25],
            pending: Vec::new(),
        }
    }

    /// Absorb data into the sponge
    pub fn update(&mut self, mut data: &[u8]) -> &mut Self {
        while !data.is_empty() {
            let n = (RATE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..n]);
            data = &data[n..];

            if self.pending.len() == RATE {
                let mut block = [0u8; RATE];
                block.copy_from_slice(&self.pending);
                self.absorb(&block);
                self.pending.clear();
            }
        }

        self
    }

    /// Absorb a varint encoded value
    pub fn uvarint(&mut self, v: u64) -> &mut Self {
        let mut b = [0u8; crate::xmr::varint::MAX_LEN];
        let n = crate::xmr::varint::encode(v, &mut b);
        self.update(&b[..n])
    }

    /// Apply padding and squeeze the 32-byte digest
    pub fn finalize(mut self) -> Key {
        let mut block = [0u8; RATE];
        block[..self.pending.len()].copy_from_slice(&self.pending);

        // Original Keccak padding (pad10*1 with 0x01 domain)
        block[self.pending.len()] ^= 0x01;
        block[RATE - 1] ^= 0x80;
        self.absorb(&block);

        let mut out = [0u8; 32];
        for (i, lane) in self.state[..4].iter().enumerate() {
            out[i * 8..][..8].copy_from_slice(&lane.to_le_bytes());
        }
        out
    }

    /// Fetch the digest of the data absorbed so far, leaving the sponge untouched
    pub fn digest(&self) -> Key {
        self.clone().finalize()
    }

    fn absorb(&mut self, block: &[u8; RATE]) {
        for (lane, chunk) in self.state.iter_mut().zip(block.chunks_exact(8)) {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            *lane ^= u64::from_le_bytes(b);
        }
        ::keccak::f1600(&mut self.state);
    }
}
