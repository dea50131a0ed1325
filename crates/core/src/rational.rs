// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rational time bases and timestamp arithmetic.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A rational number used as a time base (`1/30`, `1/48000`) or a rate (`30/1`).
///
/// A timestamp `t` expressed in time base `tb` denotes `t * tb.num / tb.den` seconds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    /// Microsecond time base used for wall-clock style values.
    pub const MICROS: Self = Self { num: 1, den: 1_000_000 };

    /// Creates a rational, moving the sign to the numerator.
    pub const fn new(num: i64, den: i64) -> Self {
        if den < 0 {
            Self { num: -num, den: -den }
        } else {
            Self { num, den }
        }
    }

    /// A time base or rate is only meaningful when both terms are positive.
    pub const fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Swaps numerator and denominator (`30/1` fps becomes a `1/30` time base).
    #[must_use]
    pub const fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    #[must_use]
    pub fn reduce(self) -> Self {
        if self.num == 0 || self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        let g = i64::try_from(g).unwrap_or(1);
        Self { num: self.num / g, den: self.den / g }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Rescales `value` from this time base into `target`, rounding to the nearest
    /// integer (halfway cases away from zero). Saturates instead of overflowing.
    pub fn rescale(self, value: i64, target: Self) -> i64 {
        let num = i128::from(value) * i128::from(self.num) * i128::from(target.den);
        let den = i128::from(self.den) * i128::from(target.num);
        if den == 0 {
            return value;
        }
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX })
    }

    /// Exact comparison of two timestamps expressed in different time bases.
    pub fn compare_timestamps(a: i64, a_tb: Self, b: i64, b_tb: Self) -> Ordering {
        let lhs = i128::from(a) * i128::from(a_tb.num) * i128::from(b_tb.den);
        let rhs = i128::from(b) * i128::from(b_tb.num) * i128::from(a_tb.den);
        lhs.cmp(&rhs)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::MICROS
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i64, i64)> for Rational {
    fn from((num, den): (i64, i64)) -> Self {
        Self::new(num, den)
    }
}

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_video_to_audio() {
        let video = Rational::new(1, 30);
        let audio = Rational::new(1, 48000);
        assert_eq!(video.rescale(1, audio), 1600);
        assert_eq!(audio.rescale(1600, video), 1);
        assert_eq!(audio.rescale(799, video), 0);
        assert_eq!(audio.rescale(800, video), 1);
    }

    #[test]
    fn test_rescale_negative_rounds_away_from_zero() {
        let a = Rational::new(1, 10);
        let b = Rational::new(1, 4);
        // -0.5s -> -2 in quarters; -0.3s -> -1.2 quarters -> -1
        assert_eq!(a.rescale(-5, b), -2);
        assert_eq!(a.rescale(-3, b), -1);
    }

    #[test]
    fn test_compare_timestamps() {
        let video = Rational::new(1, 30);
        let audio = Rational::new(1, 48000);
        assert_eq!(Rational::compare_timestamps(1, video, 1600, audio), Ordering::Equal);
        assert_eq!(Rational::compare_timestamps(1, video, 1599, audio), Ordering::Greater);
        assert_eq!(Rational::compare_timestamps(0, video, 1, audio), Ordering::Less);
    }

    #[test]
    fn test_normalization() {
        let r = Rational::new(3, -6);
        assert_eq!(r, Rational { num: -3, den: 6 });
        assert_eq!(Rational::new(30, 60).reduce(), Rational::new(1, 2));
        assert!(!Rational::new(0, 1).is_valid());
        assert_eq!(Rational::new(30, 1).invert(), Rational::new(1, 30));
    }
}
