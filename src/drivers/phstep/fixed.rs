// SPDX-License-Identifier: GPL-3.0-or-later

// Fixed point arithmetic for the synthesis path. `FRAC` is the number of
// fractional bits. Every operation saturates: a wrapped current command
// would flip the torque direction of the motor.

use crate::consts::phase_stepping::hardware::*;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Fixed<const FRAC: u32>(i32);

// Sine table samples and correction coefficients.
pub type Sample = Fixed<SIN_LUT_FRACTIONAL>;

// Product of two samples. Sums of these go in a Wide accumulator.
pub const ACC_FRACTIONAL: u32 = 2 * SIN_LUT_FRACTIONAL;
pub type Acc = Wide<ACC_FRACTIONAL>;

fn saturate(v: i64) -> i32 {
    num::clamp(v, i32::MIN as i64, i32::MAX as i64) as i32
}

// Rounds half away from zero, so that negating the input negates the output
// exactly. Plain `>>` would round toward -inf and break the symmetry.
fn round_shift(v: i64, shift: u32) -> i64 {
    if shift == 0 {
        return v;
    }
    let half = 1i64 << (shift - 1);
    if v >= 0 {
        v.saturating_add(half) >> shift
    } else {
        -(v.saturating_neg().saturating_add(half) >> shift)
    }
}

fn saturate_wide(v: i128) -> i32 {
    num::clamp(v, i32::MIN as i128, i32::MAX as i128) as i32
}

// Same as round_shift. Only the overflow path of mul_narrow needs it.
fn round_shift_wide(v: i128, shift: u32) -> i128 {
    if shift == 0 {
        return v;
    }
    let half = 1i128 << (shift - 1);
    if v >= 0 {
        (v + half) >> shift
    } else {
        -((-v + half) >> shift)
    }
}

impl<const FRAC: u32> Fixed<FRAC> {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << FRAC);
    pub const MAX: Self = Self(i32::MAX);
    pub const MIN: Self = Self(i32::MIN);

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> i32 {
        self.0
    }

    pub fn from_int(v: i32) -> Self {
        Self(saturate((v as i64) << FRAC))
    }

    // `as` saturates float to int conversions (and maps NaN to 0).
    pub fn from_f32(v: f32) -> Self {
        Self(libm::roundf(v * (1u64 << FRAC) as f32) as i32)
    }

    pub fn to_f32(self) -> f32 {
        self.0 as f32 / (1u64 << FRAC) as f32
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn saturating_neg(self) -> Self {
        Self(self.0.saturating_neg())
    }

    pub fn saturating_mul<const R: u32>(self, rhs: Fixed<R>) -> Self {
        Self(saturate(round_shift(self.0 as i64 * rhs.0 as i64, R)))
    }

    pub fn round_to_int(self) -> i32 {
        round_shift(self.0 as i64, FRAC) as i32
    }
}

// 64 bit accumulator. Products of two `Fixed` are summed here without losing
// precision, and only narrowed (with saturation) at the very end.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Wide<const FRAC: u32>(i64);

impl<const FRAC: u32> Wide<FRAC> {
    pub const ZERO: Self = Self(0);

    pub const fn to_bits(self) -> i64 {
        self.0
    }

    pub fn from_fixed<const F: u32>(v: Fixed<F>) -> Self {
        debug_assert!(FRAC >= F);
        Self((v.0 as i64) << (FRAC - F))
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    // self + a*b. The fractional bits of a and b must add up to ours.
    pub fn mac<const A: u32, const B: u32>(self, a: Fixed<A>, b: Fixed<B>) -> Self {
        debug_assert_eq!(A + B, FRAC);
        Self(self.0.saturating_add(a.0 as i64 * b.0 as i64))
    }

    // (self * k) narrowed to `OUT` fractional bits with a single rounding.
    // Products that overflow 64 bits are redone in 128 bits, and must only be
    // clamped after the shift.
    pub fn mul_narrow<const F: u32, const OUT: u32>(self, k: Fixed<F>) -> Fixed<OUT> {
        debug_assert!(FRAC + F >= OUT);
        let shift = FRAC + F - OUT;
        match self.0.checked_mul(k.0 as i64) {
            Some(p) => Fixed(saturate(round_shift(p, shift))),
            None => Fixed(saturate_wide(round_shift_wide(self.0 as i128 * k.0 as i128, shift))),
        }
    }

    pub fn narrow<const OUT: u32>(self) -> Fixed<OUT> {
        debug_assert!(FRAC >= OUT);
        Fixed(saturate(round_shift(self.0, FRAC - OUT)))
    }
}

/// Commanded current amplitude, in driver units with `MAG_FRACTIONAL` bits.
/// Always within `[0, CURRENT_AMPLITUDE]`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Magnitude(Fixed<MAG_FRACTIONAL>);

impl Magnitude {
    pub const ZERO: Self = Self(Fixed::ZERO);
    pub const MAX: Self = Self(Fixed::from_bits(CURRENT_AMPLITUDE << MAG_FRACTIONAL));

    pub fn new(v: Fixed<MAG_FRACTIONAL>) -> Self {
        Self(num::clamp(v, Self::ZERO.0, Self::MAX.0))
    }

    pub fn from_units(units: i32) -> Self {
        Self::new(Fixed::from_int(units))
    }

    pub fn from_bits(bits: i32) -> Self {
        Self::new(Fixed::from_bits(bits))
    }

    pub fn to_bits(self) -> i32 {
        self.0.to_bits()
    }

    pub fn as_fixed(self) -> Fixed<MAG_FRACTIONAL> {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == Fixed::ZERO
    }
}
