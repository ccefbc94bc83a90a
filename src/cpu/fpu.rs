//! Floating-point helpers for the F and D extensions.
//!
//! Host floating-point arithmetic provides IEEE results for the basic
//! operations. The helpers here cover the parts where RISC-V differs from
//! plain host semantics: NaN-aware min/max, classification, saturating
//! integer conversions and the accrued exception flags they raise.

/// Invalid operation.
pub const FFLAG_NV: u32 = 1 << 4;
/// Divide by zero.
pub const FFLAG_DZ: u32 = 1 << 3;
/// Overflow.
pub const FFLAG_OF: u32 = 1 << 2;
/// Underflow.
pub const FFLAG_UF: u32 = 1 << 1;
/// Inexact.
pub const FFLAG_NX: u32 = 1 << 0;

pub const CANONICAL_NAN_F32: u32 = 0x7FC0_0000;
pub const CANONICAL_NAN_F64: u64 = 0x7FF8_0000_0000_0000;

/// Static rounding mode of an instruction or `frm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    Rne,
    /// Round towards zero.
    Rtz,
    /// Round down.
    Rdn,
    /// Round up.
    Rup,
    /// Round to nearest, ties to max magnitude.
    Rmm,
}

impl RoundingMode {
    /// Resolve an instruction `rm` field, where 7 selects the dynamic
    /// mode from `frm`. Reserved encodings give `None`.
    pub fn resolve(rm: u32, frm: u32) -> Option<Self> {
        let rm = if rm == 7 { frm } else { rm };
        match rm {
            0 => Some(Self::Rne),
            1 => Some(Self::Rtz),
            2 => Some(Self::Rdn),
            3 => Some(Self::Rup),
            4 => Some(Self::Rmm),
            _ => None,
        }
    }

    /// Round `value` to an integral value.
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::Rne => value.round_ties_even(),
            Self::Rtz => value.trunc(),
            Self::Rdn => value.floor(),
            Self::Rup => value.ceil(),
            Self::Rmm => value.round(),
        }
    }
}

#[inline]
pub fn is_nan_f32(bits: u32) -> bool {
    (bits >> 23) & 0xFF == 0xFF && bits & 0x7F_FFFF != 0
}

#[inline]
pub fn is_nan_f64(bits: u64) -> bool {
    (bits >> 52) & 0x7FF == 0x7FF && bits & 0x000F_FFFF_FFFF_FFFF != 0
}

#[inline]
pub fn is_snan_f32(bits: u32) -> bool {
    is_nan_f32(bits) && bits & (1 << 22) == 0
}

#[inline]
pub fn is_snan_f64(bits: u64) -> bool {
    is_nan_f64(bits) && bits & (1 << 51) == 0
}

/// FMIN.S / FMAX.S. Returns the result bits and raised flags.
pub fn fminmax_f32(a: u32, b: u32, max: bool) -> (u32, u32) {
    let flags = if is_snan_f32(a) || is_snan_f32(b) { FFLAG_NV } else { 0 };
    let (a_nan, b_nan) = (is_nan_f32(a), is_nan_f32(b));
    if a_nan && b_nan {
        return (CANONICAL_NAN_F32, flags);
    }
    if a_nan {
        return (b, flags);
    }
    if b_nan {
        return (a, flags);
    }
    let (af, bf) = (f32::from_bits(a), f32::from_bits(b));
    let result = if af == bf {
        // -0.0 orders below +0.0
        if max {
            a & b
        } else {
            a | b
        }
    } else if (af > bf) == max {
        a
    } else {
        b
    };
    (result, flags)
}

/// FMIN.D / FMAX.D. Returns the result bits and raised flags.
pub fn fminmax_f64(a: u64, b: u64, max: bool) -> (u64, u32) {
    let flags = if is_snan_f64(a) || is_snan_f64(b) { FFLAG_NV } else { 0 };
    let (a_nan, b_nan) = (is_nan_f64(a), is_nan_f64(b));
    if a_nan && b_nan {
        return (CANONICAL_NAN_F64, flags);
    }
    if a_nan {
        return (b, flags);
    }
    if b_nan {
        return (a, flags);
    }
    let (af, bf) = (f64::from_bits(a), f64::from_bits(b));
    let result = if af == bf {
        if max {
            a & b
        } else {
            a | b
        }
    } else if (af > bf) == max {
        a
    } else {
        b
    };
    (result, flags)
}

fn classify(sign: bool, exp_all_ones: bool, exp_zero: bool, frac_zero: bool, quiet: bool) -> u32 {
    let bit = match (exp_all_ones, exp_zero, frac_zero) {
        (true, _, true) => {
            if sign {
                0
            } else {
                7
            }
        }
        (true, _, false) => {
            if quiet {
                9
            } else {
                8
            }
        }
        (false, true, true) => {
            if sign {
                3
            } else {
                4
            }
        }
        (false, true, false) => {
            if sign {
                2
            } else {
                5
            }
        }
        (false, false, _) => {
            if sign {
                1
            } else {
                6
            }
        }
    };
    1 << bit
}

/// FCLASS.S result mask.
pub fn fclass_f32(bits: u32) -> u32 {
    let exp = (bits >> 23) & 0xFF;
    let frac = bits & 0x7F_FFFF;
    classify(bits >> 31 != 0, exp == 0xFF, exp == 0, frac == 0, frac & (1 << 22) != 0)
}

/// FCLASS.D result mask.
pub fn fclass_f64(bits: u64) -> u32 {
    let exp = (bits >> 52) & 0x7FF;
    let frac = bits & 0x000F_FFFF_FFFF_FFFF;
    classify(bits >> 63 != 0, exp == 0x7FF, exp == 0, frac == 0, frac & (1 << 51) != 0)
}

/// Saturating float-to-integer conversion into the range `[min, max]`.
///
/// Returns the integer (as i128 so both signed and unsigned 64-bit ranges
/// fit) and the raised flags. NaN converts to `max`.
pub fn fcvt_to_int(value: f64, rm: RoundingMode, min: i128, max: i128) -> (i128, u32) {
    if value.is_nan() {
        return (max, FFLAG_NV);
    }
    let rounded = rm.round(value);
    if rounded < min as f64 {
        return (min, FFLAG_NV);
    }
    if rounded >= max as f64 + 1.0 {
        return (max, FFLAG_NV);
    }
    let result = rounded as i128;
    if result > max {
        return (max, FFLAG_NV);
    }
    let flags = if rounded != value { FFLAG_NX } else { 0 };
    (result, flags)
}

/// Comparison flags: FEQ only signals on signaling NaNs, FLT/FLE on any NaN.
pub fn compare_flags_f32(a: u32, b: u32, signaling: bool) -> u32 {
    let invalid = if signaling {
        is_nan_f32(a) || is_nan_f32(b)
    } else {
        is_snan_f32(a) || is_snan_f32(b)
    };
    if invalid {
        FFLAG_NV
    } else {
        0
    }
}

pub fn compare_flags_f64(a: u64, b: u64, signaling: bool) -> u32 {
    let invalid = if signaling {
        is_nan_f64(a) || is_nan_f64(b)
    } else {
        is_snan_f64(a) || is_snan_f64(b)
    };
    if invalid {
        FFLAG_NV
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_modes() {
        assert_eq!(RoundingMode::resolve(7, 1), Some(RoundingMode::Rtz));
        assert_eq!(RoundingMode::resolve(5, 0), None);
        assert_eq!(RoundingMode::Rne.round(2.5), 2.0);
        assert_eq!(RoundingMode::Rmm.round(2.5), 3.0);
        assert_eq!(RoundingMode::Rdn.round(-1.5), -2.0);
        assert_eq!(RoundingMode::Rup.round(-1.5), -1.0);
    }

    #[test]
    fn test_minmax_nan_and_zero() {
        let qnan = CANONICAL_NAN_F32;
        let one = 1.0f32.to_bits();
        assert_eq!(fminmax_f32(qnan, one, false), (one, 0));
        assert_eq!(fminmax_f32(qnan, qnan, true), (CANONICAL_NAN_F32, 0));
        // Signaling NaN raises invalid
        assert_eq!(fminmax_f32(0x7F80_0001, one, false).1, FFLAG_NV);

        let pz = 0.0f64.to_bits();
        let nz = (-0.0f64).to_bits();
        assert_eq!(fminmax_f64(pz, nz, false).0, nz);
        assert_eq!(fminmax_f64(pz, nz, true).0, pz);
    }

    #[test]
    fn test_fclass() {
        assert_eq!(fclass_f32(f32::NEG_INFINITY.to_bits()), 1 << 0);
        assert_eq!(fclass_f32((-1.0f32).to_bits()), 1 << 1);
        assert_eq!(fclass_f32(0.0f32.to_bits()), 1 << 4);
        assert_eq!(fclass_f32(1u32), 1 << 5);
        assert_eq!(fclass_f32(CANONICAL_NAN_F32), 1 << 9);
        assert_eq!(fclass_f64(0x7FF0_0000_0000_0001), 1 << 8);
        assert_eq!(fclass_f64(f64::INFINITY.to_bits()), 1 << 7);
    }

    #[test]
    fn test_conversion_saturates() {
        let (v, f) = fcvt_to_int(f64::NAN, RoundingMode::Rtz, i32::MIN as i128, i32::MAX as i128);
        assert_eq!((v, f), (i32::MAX as i128, FFLAG_NV));
        let (v, f) = fcvt_to_int(-1.0, RoundingMode::Rtz, 0, u32::MAX as i128);
        assert_eq!((v, f), (0, FFLAG_NV));
        let (v, f) = fcvt_to_int(1.5, RoundingMode::Rtz, i32::MIN as i128, i32::MAX as i128);
        assert_eq!((v, f), (1, FFLAG_NX));
        let (v, _) = fcvt_to_int(1e30, RoundingMode::Rne, 0, u64::MAX as i128);
        assert_eq!(v, u64::MAX as i128);
    }
}
