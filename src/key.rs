// SPDX-License-Identifier: Apache-2.0
//! Locking-key material.
//!
//! A key is a bit vector, one bit per locked signal. The hex form is
//! nibble-little-endian: hex digit d of the string (counted from the
//! right) encodes key bits 4d..4d+3, so the leftmost nibble carries the
//! highest-numbered bits. Canonical form is lowercase with exactly
//! ceil(n/4) nibbles.

use crate::error::LockError;
use rand::{rngs::OsRng, Rng};

/// Draw `nbits` key bits from the operating system entropy source.
///
/// Test vectors use a fixed seed for reproducibility, but the key itself
/// must not: a predictable key defeats the locking entirely.
pub fn random_key(nbits: usize) -> Vec<bool> {
    let mut rng = OsRng;
    (0..nbits).map(|_| rng.gen()).collect()
}

/// Serialize a key to its canonical hex form.
pub fn key_to_hex(bits: &[bool]) -> String {
    let nibbles = bits.len().div_ceil(4);
    let mut out = String::with_capacity(nibbles);
    for d in (0..nibbles).rev() {
        let mut nibble = 0u8;
        for b in 0..4 {
            let idx = d * 4 + b;
            if idx < bits.len() && bits[idx] {
                nibble |= 1 << b;
            }
        }
        out.push(char::from_digit(nibble as u32, 16).unwrap());
    }
    out
}

/// Parse a hex key into exactly `nbits` bits.
///
/// The string must supply at least `nbits` bits; excess high bits are
/// accepted only when zero, so that serializing the parsed key yields
/// the canonical form of the same value.
pub fn key_from_hex(s: &str, nbits: usize) -> Result<Vec<bool>, LockError> {
    let s = s.trim();
    let mut bits = Vec::with_capacity(s.len() * 4);
    for c in s.chars().rev() {
        let nibble = c.to_digit(16).ok_or_else(|| {
            LockError::InvalidKey(format!("`{}` is not a hex digit", c))
        })? as u8;
        for b in 0..4 {
            bits.push(nibble >> b & 1 != 0);
        }
    }
    if bits.len() < nbits {
        return Err(LockError::InvalidKey(format!(
            "key `{}` provides {} bits but the budget needs {}",
            s,
            bits.len(),
            nbits
        )));
    }
    if bits[nbits..].iter().any(|&b| b) {
        return Err(LockError::InvalidKey(format!(
            "key `{}` has more than {} significant bits",
            s, nbits
        )));
    }
    bits.truncate(nbits);
    Ok(bits)
}
