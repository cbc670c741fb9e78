//! Compact target encoding and chain work arithmetic.

use dashu_int::{ops::BitTest, UBig};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("compact value {0:#010x} has the sign bit set")]
    Negative(u32),

    #[error("compact value {0:#010x} does not fit in 256 bits")]
    Overflow(u32),
}

/// Decode a Bitcoin-style compact number (size byte + 23-bit mantissa).
pub fn decode_compact(compact: u32) -> Result<UBig, CompactError> {
    let size = compact >> 24;
    let mut word = compact & 0x007f_ffff;
    if word != 0 && compact & 0x0080_0000 != 0 {
        return Err(CompactError::Negative(compact));
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(CompactError::Overflow(compact));
    }
    if size <= 3 {
        word >>= 8 * (3 - size);
        Ok(UBig::from(word))
    } else {
        Ok(UBig::from(word) << (8 * (size as usize - 3)))
    }
}

/// Encode `value` in compact form, rounding down to 3 significant bytes.
pub fn encode_compact(value: &UBig) -> u32 {
    let mut size = value.bit_len().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        (low_u64(value) << (8 * (3 - size))) as u32
    } else {
        low_u64(&(value >> (8 * (size as usize - 3)))) as u32
    };
    // keep the mantissa positive
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Interpret a hash as a big-endian unsigned number.
pub fn hash_to_ubig(hash: &[u8]) -> UBig {
    UBig::from_be_bytes(hash)
}

/// Expected number of hashes to find a block at `target`:
/// `2^256 / (target + 1)`.
pub fn work_from_target(target: &UBig) -> UBig {
    (UBig::ONE << 256) / (target + UBig::ONE)
}

fn low_u64(value: &UBig) -> u64 {
    let bytes = value.to_be_bytes();
    let start = bytes.len().saturating_sub(8);
    bytes[start..].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
