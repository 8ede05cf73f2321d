// Copyright (c) 2022-2023 The MobileCoin Foundation

//! LEB128 style unsigned varints as used in CryptoNote serialization

use crate::engine::Error;

/// Maximum encoded length of a `u64`
pub const MAX_LEN: usize = 10;

/// Encode `v` into `buff`, returning the number of bytes written
///
/// `buff` must hold at least [MAX_LEN] bytes or the encoded length of `v`.
pub fn encode(mut v: u64, buff: &mut [u8]) -> usize {
    let mut n = 0;
    while v >= 0x80 {
        buff[n] = (v as u8 & 0x7f) | 0x80;
        v >>= 7;
        n += 1;
    }
    buff[n] = v as u8;
    n + 1
}

/// Compute the encoded length of `v`
pub const fn encode_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Decode a varint from `buff`, returning the value and bytes consumed
///
/// Overlong encodings and values exceeding 64 bits are rejected.
pub fn decode(buff: &[u8]) -> Result<(u64, usize), Error> {
    let mut v = 0u64;

    for (i, b) in buff.iter().enumerate().take(MAX_LEN) {
        let shift = 7 * i as u32;
        let bits = (*b & 0x7f) as u64;

        if shift == 63 && bits > 1 {
            return Err(Error::EncodingFailed);
        }
        v |= bits << shift;

        if b & 0x80 == 0 {
            // Trailing zero groups are non-canonical
            if i > 0 && *b == 0 {
                return Err(Error::EncodingFailed);
            }
            return Ok((v, i + 1));
        }
    }

    Err(Error::EncodingFailed)
}

/// Encode a varint into a fixed buffer, returning the buffer and length
pub fn to_bytes(v: u64) -> ([u8; MAX_LEN], usize) {
    let mut b = [0u8; MAX_LEN];
    let n = encode(v, &mut b);
    (b, n)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_values() {
        let tests: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (u64::MAX, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
        ];

        for (v, e) in tests {
            let (b, n) = to_bytes(*v);
            assert_eq!(&b[..n], *e, "encode {v}");
            assert_eq!(encode_len(*v), e.len());
            assert_eq!(decode(e), Ok((*v, e.len())), "decode {v}");
        }
    }

    #[test]
    fn reject_malformed() {
        // Truncated
        assert_eq!(decode(&[0x80]), Err(Error::EncodingFailed));
        assert_eq!(decode(&[]), Err(Error::EncodingFailed));
        // Overlong zero
        assert_eq!(decode(&[0x80, 0x00]), Err(Error::EncodingFailed));
        // Overflows 64 bits
        assert_eq!(
            decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02]),
            Err(Error::EncodingFailed)
        );
    }
}
