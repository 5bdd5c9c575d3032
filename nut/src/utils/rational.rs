//! Exact fractions used for timebases and audio sample rates.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Exact fraction `num / den`, always stored reduced with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i64,
    den: i64,
}

const fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };
    pub const MILLISECOND: Rational = Rational { num: 1, den: 1000 };

    /// Creates a reduced fraction.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero or the reduced value is not representable.
    pub fn new(num: i64, den: i64) -> Self {
        match Self::try_new(num, den) {
            Some(r) => r,
            None => panic!("invalid rational {num}/{den}"),
        }
    }

    /// Creates a reduced fraction, returning `None` for a zero denominator.
    pub fn try_new(num: i64, den: i64) -> Option<Self> {
        Self::from_wide(num as i128, den as i128)
    }

    fn from_wide(mut num: i128, mut den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        if den < 0 {
            num = -num;
            den = -den;
        }

        let g = gcd(num.unsigned_abs(), den as u128).max(1) as i128;

        Some(Self {
            num: i64::try_from(num / g).ok()?,
            den: i64::try_from(den / g).ok()?,
        })
    }

    pub const fn num(&self) -> i64 {
        self.num
    }

    pub const fn den(&self) -> i64 {
        self.den
    }

    pub fn is_positive(&self) -> bool {
        self.num > 0
    }

    pub fn recip(&self) -> Option<Self> {
        Self::try_new(self.den, self.num)
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s.split_once('/').unwrap_or((s, "1"));
        let num = num.trim().parse::<i64>().map_err(|e| e.to_string())?;
        let den = den.trim().parse::<i64>().map_err(|e| e.to_string())?;
        Self::try_new(num, den).ok_or_else(|| format!("zero denominator in {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_and_normalizes_sign() {
        let r = Rational::new(10, -40);
        assert_eq!(r.num(), -1);
        assert_eq!(r.den(), 4);
        assert_eq!(Rational::new(0, 7), Rational::ZERO);
        assert!(Rational::try_new(1, 0).is_none());
    }

    #[test]
    fn ordering_is_exact() {
        assert!(Rational::new(1, 3) < Rational::new(334, 1000));
        assert!(Rational::new(-1, 2) < Rational::new(-1, 3));
        assert_eq!(
            Rational::new(1, 25).cmp(&Rational::new(40, 1000)),
            Ordering::Equal
        );
    }

    #[test]
    fn reciprocal() {
        assert_eq!(Rational::new(1, 3).recip(), Some(Rational::new(3, 1)));
        assert_eq!(Rational::new(-2, 5).recip(), Some(Rational::new(-5, 2)));
        assert_eq!(Rational::ZERO.recip(), None);
    }

    #[test]
    fn parse_and_display() {
        let r: Rational = "1001/30000".parse().unwrap();
        assert_eq!(r.to_string(), "1001/30000");
        assert_eq!("48000".parse::<Rational>().unwrap(), Rational::new(48000, 1));
        assert!("1/0".parse::<Rational>().is_err());
    }
}
