//! Checksums used by every structural region of the card.
//!
//! GameCube cards protect the header, directory tables and block tables with
//! the same dual 16-bit checksum: an additive sum of big-endian words and an
//! additive sum of the inverted words. The algorithm sits behind
//! [`ChecksumAlgorithm`] so it can be tested in isolation and swapped for
//! other card formats.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

use crate::error::{CardError, Result};

/// A checksum algorithm producing a 32-bit value from a byte region.
pub trait ChecksumAlgorithm {
    fn name(&self) -> &'static str;

    fn compute(&self, data: &[u8]) -> u32;
}

/// Additive + inverted-additive dual 16-bit checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddInvDual16;

impl AddInvDual16 {
    /// Compute both halves separately.
    pub fn compute_pair(data: &[u8]) -> (u16, u16) {
        let mut sum: u16 = 0;
        let mut inv: u16 = 0;
        for word in data.chunks_exact(2) {
            let w = BigEndian::read_u16(word);
            sum = sum.wrapping_add(w);
            inv = inv.wrapping_add(w ^ 0xFFFF);
        }

        // 0xFFFF is never stored; the console writes 0 instead.
        if sum == 0xFFFF {
            sum = 0;
        }
        if inv == 0xFFFF {
            inv = 0;
        }
        (sum, inv)
    }

    pub fn pack(sum: u16, inv: u16) -> u32 {
        ((sum as u32) << 16) | inv as u32
    }
}

impl ChecksumAlgorithm for AddInvDual16 {
    fn name(&self) -> &'static str {
        "AddInvDual16"
    }

    fn compute(&self, data: &[u8]) -> u32 {
        let (sum, inv) = Self::compute_pair(data);
        Self::pack(sum, inv)
    }
}

/// Stored vs. computed checksum of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChecksumValue {
    pub expected: u32,
    pub actual: u32,
}

impl ChecksumValue {
    pub fn is_valid(&self) -> bool {
        self.expected == self.actual
    }

    /// Which halves match, as (sum, inverted sum).
    pub fn halves_match(&self) -> (bool, bool) {
        (
            self.expected >> 16 == self.actual >> 16,
            self.expected & 0xFFFF == self.actual & 0xFFFF,
        )
    }
}

impl std::fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{:08X}", self.actual)
        } else {
            write!(f, "{:08X} (expected {:08X})", self.actual, self.expected)
        }
    }
}

fn check_bounds(data: &[u8], region: &Range<usize>, stored_at: usize) -> Result<()> {
    let needed = region.end.max(stored_at + 4);
    if region.start > region.end || data.len() < needed {
        return Err(CardError::decode("checksum region", needed, data.len()));
    }
    Ok(())
}

/// Compare the checksum stored at `stored_at` (two big-endian u16 halves)
/// with the one computed over `data[region]`.
pub fn verify_region(
    algo: &dyn ChecksumAlgorithm,
    data: &[u8],
    region: Range<usize>,
    stored_at: usize,
) -> Result<ChecksumValue> {
    check_bounds(data, &region, stored_at)?;
    let expected = BigEndian::read_u32(&data[stored_at..stored_at + 4]);
    let actual = algo.compute(&data[region]);
    Ok(ChecksumValue { expected, actual })
}

/// Compute the checksum over `data[region]` and store it at `stored_at`.
pub fn store(
    algo: &dyn ChecksumAlgorithm,
    data: &mut [u8],
    region: Range<usize>,
    stored_at: usize,
) -> Result<u32> {
    check_bounds(data, &region, stored_at)?;
    let value = algo.compute(&data[region]);
    BigEndian::write_u32(&mut data[stored_at..stored_at + 4], value);
    Ok(value)
}
