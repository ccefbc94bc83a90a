//! Integer arithmetic shared by block dispatch and precise mode.
//!
//! Both execution paths call these helpers so that a cached bytecode and a
//! freshly decoded instruction always compute the same result.

use super::address::AddressType;

#[inline]
fn shamt<A: AddressType>(b: A) -> u32 {
    (b.to_u64() & (A::BITS as u64 - 1)) as u32
}

#[inline]
fn word(value: i64) -> i64 {
    value as i32 as i64
}

#[inline]
pub fn add<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64().wrapping_add(b.to_u64()))
}

#[inline]
pub fn add_imm<A: AddressType>(a: A, imm: i64) -> A {
    A::from_u64(a.to_u64().wrapping_add(imm as u64))
}

#[inline]
pub fn sub<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64().wrapping_sub(b.to_u64()))
}

#[inline]
pub fn sll<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() << shamt(b))
}

#[inline]
pub fn srl<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() >> shamt(b))
}

#[inline]
pub fn sra<A: AddressType>(a: A, b: A) -> A {
    A::from_i64(a.to_i64() >> shamt(b))
}

#[inline]
pub fn slt<A: AddressType>(a: A, b: A) -> A {
    A::from_u64((a.to_i64() < b.to_i64()) as u64)
}

#[inline]
pub fn sltu<A: AddressType>(a: A, b: A) -> A {
    A::from_u64((a.to_u64() < b.to_u64()) as u64)
}

#[inline]
pub fn mul<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64().wrapping_mul(b.to_u64()))
}

/// Upper XLEN bits of signed × signed.
#[inline]
pub fn mulh<A: AddressType>(a: A, b: A) -> A {
    let product = (a.to_i64() as i128) * (b.to_i64() as i128);
    A::from_u64((product >> A::BITS) as u64)
}

/// Upper XLEN bits of signed × unsigned.
#[inline]
pub fn mulhsu<A: AddressType>(a: A, b: A) -> A {
    let product = (a.to_i64() as i128).wrapping_mul(b.to_u64() as i128);
    A::from_u64((product >> A::BITS) as u64)
}

/// Upper XLEN bits of unsigned × unsigned.
#[inline]
pub fn mulhu<A: AddressType>(a: A, b: A) -> A {
    let product = (a.to_u64() as u128) * (b.to_u64() as u128);
    A::from_u64((product >> A::BITS) as u64)
}

#[inline]
pub fn div<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_i64(), b.to_i64());
    if b == 0 {
        A::from_i64(-1)
    } else if a == A::signed_min() && b == -1 {
        A::from_i64(a)
    } else {
        A::from_i64(a / b)
    }
}

#[inline]
pub fn divu<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64(), b.to_u64());
    if b == 0 {
        A::from_i64(-1)
    } else {
        A::from_u64(a / b)
    }
}

#[inline]
pub fn rem<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_i64(), b.to_i64());
    if b == 0 {
        A::from_i64(a)
    } else if a == A::signed_min() && b == -1 {
        A::from_u64(0)
    } else {
        A::from_i64(a % b)
    }
}

#[inline]
pub fn remu<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64(), b.to_u64());
    if b == 0 {
        A::from_u64(a)
    } else {
        A::from_u64(a % b)
    }
}

// RV64 word operations. Results are sign-extended from bit 31.

#[inline]
pub fn addw<A: AddressType>(a: A, b: A) -> A {
    A::from_i64(word(a.to_u64().wrapping_add(b.to_u64()) as i64))
}

#[inline]
pub fn subw<A: AddressType>(a: A, b: A) -> A {
    A::from_i64(word(a.to_u64().wrapping_sub(b.to_u64()) as i64))
}

#[inline]
pub fn mulw<A: AddressType>(a: A, b: A) -> A {
    A::from_i64((a.to_u64() as u32).wrapping_mul(b.to_u64() as u32) as i32 as i64)
}

#[inline]
pub fn sllw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_i64(((a.to_u64() as u32) << (shift & 31)) as i32 as i64)
}

#[inline]
pub fn srlw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_i64(((a.to_u64() as u32) >> (shift & 31)) as i32 as i64)
}

#[inline]
pub fn sraw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_i64(((a.to_u64() as i32) >> (shift & 31)) as i64)
}

#[inline]
pub fn divw<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64() as i32, b.to_u64() as i32);
    if b == 0 {
        A::from_i64(-1)
    } else {
        A::from_i64(a.wrapping_div(b) as i64)
    }
}

#[inline]
pub fn divuw<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64() as u32, b.to_u64() as u32);
    if b == 0 {
        A::from_i64(-1)
    } else {
        A::from_i64((a / b) as i32 as i64)
    }
}

#[inline]
pub fn remw<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64() as i32, b.to_u64() as i32);
    if b == 0 {
        A::from_i64(a as i64)
    } else {
        A::from_i64(a.wrapping_rem(b) as i64)
    }
}

#[inline]
pub fn remuw<A: AddressType>(a: A, b: A) -> A {
    let (a, b) = (a.to_u64() as u32, b.to_u64() as u32);
    if b == 0 {
        A::from_i64(a as i32 as i64)
    } else {
        A::from_i64((a % b) as i32 as i64)
    }
}

// Zba

/// `b + (a << n)`.
#[inline]
pub fn sh_add<A: AddressType>(a: A, b: A, n: u32) -> A {
    A::from_u64(b.to_u64().wrapping_add(a.to_u64() << n))
}

/// `b + (zext32(a) << n)`.
#[inline]
pub fn sh_add_uw<A: AddressType>(a: A, b: A, n: u32) -> A {
    A::from_u64(b.to_u64().wrapping_add((a.to_u64() & 0xFFFF_FFFF) << n))
}

#[inline]
pub fn slli_uw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_u64((a.to_u64() & 0xFFFF_FFFF) << (shift & 63))
}

// Zbb

#[inline]
pub fn andn<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() & !b.to_u64())
}

#[inline]
pub fn orn<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() | !b.to_u64())
}

#[inline]
pub fn xnor<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(!(a.to_u64() ^ b.to_u64()))
}

#[inline]
pub fn max<A: AddressType>(a: A, b: A) -> A {
    if a.to_i64() >= b.to_i64() {
        a
    } else {
        b
    }
}

#[inline]
pub fn maxu<A: AddressType>(a: A, b: A) -> A {
    if a.to_u64() >= b.to_u64() {
        a
    } else {
        b
    }
}

#[inline]
pub fn min<A: AddressType>(a: A, b: A) -> A {
    if a.to_i64() <= b.to_i64() {
        a
    } else {
        b
    }
}

#[inline]
pub fn minu<A: AddressType>(a: A, b: A) -> A {
    if a.to_u64() <= b.to_u64() {
        a
    } else {
        b
    }
}

#[inline]
pub fn clz<A: AddressType>(a: A) -> A {
    A::from_u64((a.to_u64().leading_zeros() - (64 - A::BITS)) as u64)
}

#[inline]
pub fn ctz<A: AddressType>(a: A) -> A {
    A::from_u64(a.to_u64().trailing_zeros().min(A::BITS) as u64)
}

#[inline]
pub fn cpop<A: AddressType>(a: A) -> A {
    A::from_u64(a.to_u64().count_ones() as u64)
}

#[inline]
pub fn clzw<A: AddressType>(a: A) -> A {
    A::from_u64((a.to_u64() as u32).leading_zeros() as u64)
}

#[inline]
pub fn ctzw<A: AddressType>(a: A) -> A {
    A::from_u64((a.to_u64() as u32).trailing_zeros() as u64)
}

#[inline]
pub fn cpopw<A: AddressType>(a: A) -> A {
    A::from_u64((a.to_u64() as u32).count_ones() as u64)
}

#[inline]
pub fn sext_b<A: AddressType>(a: A) -> A {
    A::from_i64(a.to_u64() as i8 as i64)
}

#[inline]
pub fn sext_h<A: AddressType>(a: A) -> A {
    A::from_i64(a.to_u64() as i16 as i64)
}

#[inline]
pub fn zext_h<A: AddressType>(a: A) -> A {
    A::from_u64(a.to_u64() & 0xFFFF)
}

#[inline]
pub fn rol<A: AddressType>(a: A, b: A) -> A {
    let s = shamt(b);
    let v = a.to_u64();
    if s == 0 {
        a
    } else {
        A::from_u64((v << s) | (v >> (A::BITS - s)))
    }
}

#[inline]
pub fn ror<A: AddressType>(a: A, b: A) -> A {
    let s = shamt(b);
    let v = a.to_u64();
    if s == 0 {
        a
    } else {
        A::from_u64((v >> s) | (v << (A::BITS - s)))
    }
}

#[inline]
pub fn rolw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_i64((a.to_u64() as u32).rotate_left(shift & 31) as i32 as i64)
}

#[inline]
pub fn rorw<A: AddressType>(a: A, shift: u32) -> A {
    A::from_i64((a.to_u64() as u32).rotate_right(shift & 31) as i32 as i64)
}

#[inline]
pub fn rev8<A: AddressType>(a: A) -> A {
    if A::BITS == 64 {
        A::from_u64(a.to_u64().swap_bytes())
    } else {
        A::from_u64((a.to_u64() as u32).swap_bytes() as u64)
    }
}

#[inline]
pub fn orc_b<A: AddressType>(a: A) -> A {
    let v = a.to_u64();
    let mut out = 0u64;
    for byte in 0..(A::BITS / 8) {
        if (v >> (byte * 8)) & 0xFF != 0 {
            out |= 0xFF << (byte * 8);
        }
    }
    A::from_u64(out)
}

// Zbs

#[inline]
pub fn bset<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() | (1u64 << shamt(b)))
}

#[inline]
pub fn bclr<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() & !(1u64 << shamt(b)))
}

#[inline]
pub fn binv<A: AddressType>(a: A, b: A) -> A {
    A::from_u64(a.to_u64() ^ (1u64 << shamt(b)))
}

#[inline]
pub fn bext<A: AddressType>(a: A, b: A) -> A {
    A::from_u64((a.to_u64() >> shamt(b)) & 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_edge_cases() {
        assert_eq!(div::<u32>(7, 0), u32::MAX);
        assert_eq!(div::<u32>(0x8000_0000, u32::MAX), 0x8000_0000);
        assert_eq!(div::<u64>(i64::MIN as u64, u64::MAX), i64::MIN as u64);
        assert_eq!(divu::<u32>(7, 0), u32::MAX);
        assert_eq!(rem::<u32>(7, 0), 7);
        assert_eq!(rem::<u32>(0x8000_0000, u32::MAX), 0);
        assert_eq!(remu::<u64>(9, 0), 9);
        assert_eq!(div::<u32>((-7i32) as u32, 2), (-3i32) as u32);
        assert_eq!(rem::<u32>((-7i32) as u32, 2), (-1i32) as u32);
    }

    #[test]
    fn test_shifts_mask_by_xlen() {
        assert_eq!(sll::<u32>(1, 33), 2);
        assert_eq!(sll::<u64>(1, 33), 1 << 33);
        assert_eq!(sra::<u32>(0x8000_0000, 31), u32::MAX);
        assert_eq!(srl::<u32>(0x8000_0000, 31), 1);
    }

    #[test]
    fn test_high_multiplies() {
        assert_eq!(mulh::<u32>(u32::MAX, u32::MAX), 0);
        assert_eq!(mulhu::<u32>(u32::MAX, u32::MAX), 0xFFFF_FFFE);
        assert_eq!(mulhsu::<u32>(u32::MAX, 2), u32::MAX);
        assert_eq!(mulhu::<u64>(u64::MAX, 2), 1);
    }

    #[test]
    fn test_word_ops_sign_extend() {
        assert_eq!(addw::<u64>(0x7FFF_FFFF, 1), 0xFFFF_FFFF_8000_0000);
        assert_eq!(subw::<u64>(0, 1), u64::MAX);
        assert_eq!(sraw::<u64>(0x8000_0000, 4), 0xFFFF_FFFF_F800_0000);
        assert_eq!(divw::<u64>(5, 0), u64::MAX);
    }

    #[test]
    fn test_bit_manipulation() {
        assert_eq!(clz::<u32>(1), 31);
        assert_eq!(clz::<u64>(1), 63);
        assert_eq!(ctz::<u32>(0), 32);
        assert_eq!(cpop::<u32>(0xF0F0), 8);
        assert_eq!(sext_b::<u32>(0x80), 0xFFFF_FF80);
        assert_eq!(zext_h::<u64>(0x1234_5678), 0x5678);
        assert_eq!(rol::<u32>(0x8000_0001, 1), 3);
        assert_eq!(ror::<u32>(3, 1), 0x8000_0001);
        assert_eq!(rev8::<u32>(0x1122_3344), 0x4433_2211);
        assert_eq!(orc_b::<u32>(0x0100_2000), 0xFF00_FF00);
        assert_eq!(bset::<u32>(0, 35), 8);
        assert_eq!(bext::<u64>(1 << 40, 40), 1);
        assert_eq!(sh_add::<u32>(3, 10, 2), 22);
        assert_eq!(sh_add_uw::<u64>(0xFFFF_FFFF_0000_0001, 0, 3), 8);
    }
}
