//! Guest address width.
//!
//! The core is generic over the register width of the emulated hart.
//! `u32` selects RV32 and `u64` selects RV64. All arithmetic is done on
//! 64-bit host values and truncated back to the guest width, so the same
//! handler code serves both variants.

use std::fmt;
use std::hash::Hash;

/// Integer type used for guest addresses and integer registers.
pub trait AddressType:
    Copy + Default + Eq + Ord + Hash + fmt::Debug + fmt::LowerHex + fmt::UpperHex + 'static
{
    /// Register width in bits (XLEN).
    const BITS: u32;
    /// Register width in bytes.
    const BYTES: usize;

    /// Zero-extend to 64 bits.
    fn to_u64(self) -> u64;

    /// Sign-extend to 64 bits.
    fn to_i64(self) -> i64;

    /// Truncate a 64-bit value to the guest width.
    fn from_u64(value: u64) -> Self;

    /// Truncate a signed 64-bit value to the guest width.
    #[inline]
    fn from_i64(value: i64) -> Self {
        Self::from_u64(value as u64)
    }

    /// Smallest signed value representable at this width, sign-extended.
    #[inline]
    fn signed_min() -> i64 {
        i64::MIN >> (64 - Self::BITS)
    }

    /// Whether this is the 64-bit variant.
    #[inline]
    fn is_rv64() -> bool {
        Self::BITS == 64
    }
}

impl AddressType for u32 {
    const BITS: u32 = 32;
    const BYTES: usize = 4;

    #[inline]
    fn to_u64(self) -> u64 {
        self as u64
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self as i32 as i64
    }

    #[inline]
    fn from_u64(value: u64) -> Self {
        value as u32
    }
}

impl AddressType for u64 {
    const BITS: u32 = 64;
    const BYTES: usize = 8;

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }

    #[inline]
    fn to_i64(self) -> i64 {
        self as i64
    }

    #[inline]
    fn from_u64(value: u64) -> Self {
        value
    }
}

/// Mask of the low XLEN bits of a 64-bit value.
#[inline]
pub fn xlen_mask<A: AddressType>() -> u64 {
    if A::BITS == 64 {
        u64::MAX
    } else {
        (1u64 << A::BITS) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extension() {
        assert_eq!(0xFFFF_FFFFu32.to_i64(), -1);
        assert_eq!(0xFFFF_FFFFu32.to_u64(), 0xFFFF_FFFF);
        assert_eq!(u64::MAX.to_i64(), -1);
    }

    #[test]
    fn test_truncation() {
        assert_eq!(u32::from_u64(0x1_2345_6789), 0x2345_6789);
        assert_eq!(u32::from_i64(-1), u32::MAX);
        assert_eq!(u64::from_i64(-2), u64::MAX - 1);
    }

    #[test]
    fn test_signed_min() {
        assert_eq!(<u32 as AddressType>::signed_min(), i32::MIN as i64);
        assert_eq!(<u64 as AddressType>::signed_min(), i64::MIN);
        assert_eq!(xlen_mask::<u32>(), 0xFFFF_FFFF);
        assert_eq!(xlen_mask::<u64>(), u64::MAX);
    }
}
