// Copyright (c) 2022-2023 The MobileCoin Foundation

use core::fmt::Write;

use crate::engine::Error;

/// Atomic units per XMR
const SCALAR_XMR: u64 = 1_000_000_000_000;

/// Decimal places in an atomic amount
const XMR_DECIMALS: usize = 12;

const XMR_SUFFIX: &str = " XMR";

/// Placeholder for amounts that fail to render
const ENCODE_ERR: &str = "ENCODE_ERR";

const fn decimal_digits(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 10 {
        v /= 10;
        n += 1;
    }
    n
}

/// Maximum rendered amount length, the whole part of `u64::MAX` with separator,
/// all decimals and suffix
pub const AMOUNT_MAX_LEN: usize =
    decimal_digits(u64::MAX / SCALAR_XMR) + 1 + XMR_DECIMALS + XMR_SUFFIX.len();

/// Format an atomic amount for display, trimming trailing zeros
pub fn fmt_amount(value: u64) -> heapless::String<AMOUNT_MAX_LEN> {
    let mut s = heapless::String::new();

    let whole = value / SCALAR_XMR;
    let frac = value % SCALAR_XMR;

    let r = match frac {
        0 => write!(s, "{whole}{XMR_SUFFIX}"),
        _ => {
            let mut digits = heapless::String::<XMR_DECIMALS>::new();
            write!(digits, "{frac:012}")
                .and_then(|_| write!(s, "{whole}.{}{XMR_SUFFIX}", digits.trim_end_matches('0')))
        }
    };

    if r.is_err() {
        s.clear();
        let _ = s.push_str(ENCODE_ERR);
    }

    s
}

/// Check `permutation` is a bijection over `[0, len)`
pub fn check_permutation(permutation: &[usize]) -> Result<(), Error> {
    let mut seen = alloc::vec![false; permutation.len()];

    for p in permutation {
        match seen.get_mut(*p) {
            Some(s) if !*s => *s = true,
            _ => return Err(Error::InvalidPermutation),
        }
    }

    Ok(())
}

/// Apply `permutation` in-place via `swapper`, following cycles so that
/// afterwards `new[i] = old[permutation[i]]`
pub fn apply_permutation<F: FnMut(usize, usize)>(permutation: &[usize], mut swapper: F) -> Result<(), Error> {
    check_permutation(permutation)?;

    let mut perm = permutation.to_vec();
    for i in 0..perm.len() {
        let mut current = i;
        while i != perm[current] {
            let next = perm[current];
            swapper(current, next);
            perm[current] = current;
            current = next;
        }
        perm[current] = current;
    }

    Ok(())
}
