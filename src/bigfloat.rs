use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Shl, Shr, Sub, SubAssign};

/// Binary floating-point value with an `i64` mantissa and an unbounded
/// (well, `i32`) binary exponent.
///
/// Quadrant centers live on a grid of half-widths `2^level`, and with
/// deep roots those magnitudes leave the range of every machine integer.
/// All coordinate arithmetic in the tree walkers goes through this type.
///
/// The representation is kept normalized: the mantissa of a nonzero
/// value is odd, and zero is `(0, 0)`. That makes equality structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BigFloat {
    mantissa: i64,
    exponent: i32,
}

const WORD_BITS: i32 = 64;

impl BigFloat {
    pub const ZERO: Self = Self {
        mantissa: 0,
        exponent: 0,
    };

    pub fn new(mantissa: i64, exponent: i32) -> Self {
        let mut v = Self { mantissa, exponent };
        v.normalize();
        v
    }

    /// `2^exponent`.
    pub fn exp2(exponent: i32) -> Self {
        Self {
            mantissa: 1,
            exponent,
        }
    }

    fn normalize(&mut self) {
        if self.mantissa == 0 {
            self.exponent = 0;
        } else {
            let tz = self.mantissa.trailing_zeros() as i32;
            self.mantissa >>= tz;
            self.exponent += tz;
        }
    }

    /// Shift the mantissa as far left as it goes without overflow, to
    /// keep low bits around an alignment in `add`.
    fn unnormalized(self) -> Self {
        if self.mantissa == 0 {
            return self;
        }
        let lz = (self.mantissa.leading_zeros() as i32 - 1)
            .max((!self.mantissa).leading_zeros() as i32 - 1)
            .max(0);
        Self {
            mantissa: self.mantissa << lz,
            exponent: self.exponent - lz,
        }
    }

    fn from_wide(mut mantissa: i128, mut exponent: i32) -> Self {
        while mantissa != (mantissa as i64) as i128 {
            mantissa >>= 1;
            exponent += 1;
        }
        Self::new(mantissa as i64, exponent)
    }

    pub fn signum(self) -> i32 {
        match self.mantissa.cmp(&0) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    pub fn abs(self) -> Self {
        Self {
            mantissa: self.mantissa.abs(),
            exponent: self.exponent,
        }
    }

    pub fn floor(self) -> Self {
        if self.exponent >= 0 {
            self
        } else if self.exponent <= -WORD_BITS {
            Self::new(if self.mantissa < 0 { -1 } else { 0 }, 0)
        } else {
            Self::new(self.mantissa >> -self.exponent, 0)
        }
    }

    pub fn ceil(self) -> Self {
        if self.exponent >= 0 {
            self
        } else if self.exponent <= -WORD_BITS {
            Self::new(if self.mantissa > 0 { 1 } else { 0 }, 0)
        } else {
            Self::new(-(-self.mantissa >> -self.exponent), 0)
        }
    }

    /// Truncation toward negative infinity, saturating at the `i64` range.
    pub fn to_i64(self) -> i64 {
        if self.exponent <= -WORD_BITS {
            return if self.mantissa < 0 { -1 } else { 0 };
        }
        if self.exponent < 0 {
            return self.mantissa >> -self.exponent;
        }
        if self.exponent >= WORD_BITS {
            return if self.mantissa < 0 { i64::MIN } else { i64::MAX };
        }
        self.mantissa
            .checked_shl(self.exponent as u32)
            .filter(|v| v >> self.exponent == self.mantissa)
            .unwrap_or(if self.mantissa < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn to_f64(self) -> f64 {
        self.mantissa as f64 * (self.exponent as f64).exp2()
    }
}

impl From<i64> for BigFloat {
    fn from(v: i64) -> Self {
        Self::new(v, 0)
    }
}

impl From<i32> for BigFloat {
    fn from(v: i32) -> Self {
        Self::new(v as i64, 0)
    }
}

impl From<f64> for BigFloat {
    fn from(v: f64) -> Self {
        assert!(v.is_finite());
        if v == 0.0 {
            return Self::ZERO;
        }
        let bits = v.to_bits();
        let raw_exponent = ((bits >> 52) & 0x7FF) as i32;
        let fraction = (bits & ((1u64 << 52) - 1)) as i64;
        let (mantissa, exponent) = if raw_exponent == 0 {
            (fraction, -1074)
        } else {
            (fraction | (1 << 52), raw_exponent - 1075)
        };
        Self::new(if v < 0.0 { -mantissa } else { mantissa }, exponent)
    }
}

impl Neg for BigFloat {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            mantissa: -self.mantissa,
            exponent: self.exponent,
        }
    }
}

impl Add for BigFloat {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.mantissa == 0 {
            return rhs;
        }
        if rhs.mantissa == 0 {
            return self;
        }
        let a = self.unnormalized();
        let b = rhs.unnormalized();
        let exponent = a.exponent.max(b.exponent);
        // A term more than a full word below the other is lost entirely.
        if exponent - a.exponent >= WORD_BITS {
            return rhs;
        }
        if exponent - b.exponent >= WORD_BITS {
            return self;
        }
        let sum = (a.mantissa >> (exponent - a.exponent)) as i128
            + (b.mantissa >> (exponent - b.exponent)) as i128;
        Self::from_wide(sum, exponent)
    }
}

impl Sub for BigFloat {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + -rhs
    }
}

impl AddAssign for BigFloat {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for BigFloat {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for BigFloat {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_wide(
            self.mantissa as i128 * rhs.mantissa as i128,
            self.exponent + rhs.exponent,
        )
    }
}

impl Div for BigFloat {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        assert_ne!(rhs.mantissa, 0, "division by zero");
        let wide = (self.mantissa as i128) << WORD_BITS;
        Self::from_wide(
            wide / rhs.mantissa as i128,
            self.exponent - rhs.exponent - WORD_BITS,
        )
    }
}

impl Shl<i32> for BigFloat {
    type Output = Self;

    fn shl(self, rhs: i32) -> Self {
        if self.mantissa == 0 {
            return self;
        }
        Self {
            mantissa: self.mantissa,
            exponent: self.exponent + rhs,
        }
    }
}

impl Shr<i32> for BigFloat {
    type Output = Self;

    fn shr(self, rhs: i32) -> Self {
        self << -rhs
    }
}

impl PartialOrd for BigFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BigFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self - *other).signum().cmp(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_roundtrips() {
        let a = BigFloat::from(12i64);
        let b = BigFloat::from(-5i64);
        assert_eq!((a + b).to_i64(), 7);
        assert_eq!((a - b).to_i64(), 17);
        assert_eq!((a * b).to_i64(), -60);
        assert_eq!((a / BigFloat::from(4i64)).to_f64(), 3.0);
    }

    #[test]
    fn division_uses_divisor() {
        let a = BigFloat::from(1i64);
        let b = BigFloat::from(3i64);
        let third = a / b;
        assert!((third.to_f64() - 1.0 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn beyond_machine_integers() {
        let big = BigFloat::exp2(100);
        assert!(big > BigFloat::from(i64::MAX));
        assert_eq!(big + big, BigFloat::exp2(101));
        assert_eq!(big - big, BigFloat::ZERO);
        assert_eq!((big >> 40).to_f64(), (60f64).exp2());
        assert_eq!(big.to_i64(), i64::MAX);
    }

    #[test]
    fn floor_and_ceil() {
        let half = BigFloat::exp2(-1);
        assert_eq!(half.floor().to_i64(), 0);
        assert_eq!(half.ceil().to_i64(), 1);
        assert_eq!((-half).floor().to_i64(), -1);
        assert_eq!((-half).ceil().to_i64(), 0);
        let v = BigFloat::from(3i64) + half;
        assert_eq!(v.floor().to_i64(), 3);
        assert_eq!(v.ceil().to_i64(), 4);
    }

    #[test]
    fn ordering() {
        let mut values = [
            BigFloat::from(-3i64),
            BigFloat::exp2(70),
            BigFloat::ZERO,
            BigFloat::from(1i64),
            -BigFloat::exp2(70),
        ];
        values.sort();
        assert_eq!(values[0], -BigFloat::exp2(70));
        assert_eq!(values[1], BigFloat::from(-3i64));
        assert_eq!(values[2], BigFloat::ZERO);
        assert_eq!(values[3], BigFloat::from(1i64));
        assert_eq!(values[4], BigFloat::exp2(70));
    }

    #[test]
    fn f64_conversions() {
        for v in [0.0, 1.0, -2.5, 1234.5678, -0.001953125] {
            assert_eq!(BigFloat::from(v).to_f64(), v);
        }
    }
}
