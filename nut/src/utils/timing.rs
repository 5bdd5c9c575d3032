//! Timestamp conversion between timebases.
//!
//! All rescaling is done with exact 128-bit integer arithmetic. Results are
//! rounded to the nearest integer; an exact half is truncated toward zero.

use std::cmp::Ordering;

use crate::utils::errors::{NutError, Result};
use crate::utils::rational::Rational;

/// Rescales `value` ticks of `from` into ticks of `to`.
pub fn convert(value: i64, from: Rational, to: Rational) -> Result<i64> {
    if from == to {
        return Ok(value);
    }
    if to.num() == 0 {
        return Err(NutError::ArithmeticOverflow);
    }

    let num = (value as i128)
        .checked_mul(from.num() as i128)
        .and_then(|n| n.checked_mul(to.den() as i128))
        .ok_or(NutError::ArithmeticOverflow)?;
    let mut den = from.den() as i128 * to.num() as i128;
    let mut num = num;
    if den < 0 {
        num = -num;
        den = -den;
    }

    let mut quotient = num / den;
    let remainder = num % den;
    if remainder.unsigned_abs() * 2 > den.unsigned_abs() {
        quotient += num.signum();
    }

    i64::try_from(quotient).map_err(|_| NutError::ArithmeticOverflow)
}

/// Milliseconds for `value` ticks of `time_base`.
pub fn to_millis(value: i64, time_base: Rational) -> Result<i64> {
    convert(value, time_base, Rational::MILLISECOND)
}

/// Timestamp coded together with the id of the main header timebase it uses.
///
/// On the wire this is the `t` type: `pts * time_base_count + time_base_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalTimestamp {
    pub time_base_id: usize,
    pub pts: u64,
}

impl GlobalTimestamp {
    pub fn encode(&self, time_base_count: usize) -> Result<u64> {
        self.pts
            .checked_mul(time_base_count as u64)
            .and_then(|v| v.checked_add(self.time_base_id as u64))
            .ok_or(NutError::ArithmeticOverflow)
    }

    pub fn decode(value: u64, time_base_count: usize) -> Result<Self> {
        if time_base_count == 0 {
            return Err(NutError::malformed("timestamp without timebases"));
        }
        let count = time_base_count as u64;

        Ok(Self {
            time_base_id: (value % count) as usize,
            pts: value / count,
        })
    }
}

/// A point on the media timeline, ordered exactly across different timebases.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub pts: i64,
    pub time_base: Rational,
}

impl MediaTime {
    pub fn new(pts: i64, time_base: Rational) -> Self {
        Self { pts, time_base }
    }

    pub fn millis(&self) -> Result<i64> {
        to_millis(self.pts, self.time_base)
    }

    fn scaled(&self, other: &Self) -> Option<i128> {
        (self.pts as i128)
            .checked_mul(self.time_base.num() as i128)?
            .checked_mul(other.time_base.den() as i128)
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.scaled(other), other.scaled(self)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = self.pts as f64 * self.time_base.to_f64();
                let b = other.pts as f64 * other.time_base.to_f64();
                a.total_cmp(&b)
            }
        }
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_between_decimal_timebases() -> Result<()> {
        let tenth = Rational::new(1, 10);
        let milli = Rational::new(1, 1000);
        assert_eq!(convert(1, tenth, milli)?, 100);
        assert_eq!(convert(10, tenth, milli)?, 1000);
        assert_eq!(convert(1000, milli, tenth)?, 10);
        Ok(())
    }

    #[test]
    fn convert_identity() -> Result<()> {
        let tb = Rational::new(1001, 30000);
        for v in [i64::MIN, -1, 0, 1, 12345, i64::MAX] {
            assert_eq!(convert(v, tb, tb)?, v);
        }
        Ok(())
    }

    #[test]
    fn convert_rounds_to_nearest_and_truncates_ties() -> Result<()> {
        let half = Rational::new(1, 2);
        let third = Rational::new(1, 3);
        assert_eq!(convert(1, half, Rational::ONE)?, 0);
        assert_eq!(convert(3, half, Rational::ONE)?, 1);
        assert_eq!(convert(-3, half, Rational::ONE)?, -1);
        assert_eq!(convert(5, third, Rational::ONE)?, 2);
        assert_eq!(convert(-5, third, Rational::ONE)?, -2);
        assert_eq!(convert(4, third, Rational::ONE)?, 1);
        Ok(())
    }

    #[test]
    fn convert_audio_to_video_ticks() -> Result<()> {
        // 48000 samples at 1/48000 is one second, 25 frames at 1/25.
        assert_eq!(
            convert(48000, Rational::new(1, 48000), Rational::new(1, 25))?,
            25
        );
        assert_eq!(
            convert(3003, Rational::new(1, 90000), Rational::new(1001, 30000))?,
            1
        );
        Ok(())
    }

    #[test]
    fn convert_overflow() {
        let result = convert(i64::MAX, Rational::ONE, Rational::new(1, 1_000_000));
        assert!(matches!(result, Err(NutError::ArithmeticOverflow)));
    }

    #[test]
    fn media_time_ordering() {
        let a = MediaTime::new(1, Rational::new(1, 25));
        let b = MediaTime::new(40, Rational::new(1, 1000));
        let c = MediaTime::new(1919, Rational::new(1, 48000));
        assert_eq!(a, b);
        assert!(c < a);
        assert_eq!(MediaTime::new(1920, Rational::new(1, 48000)), a);
        assert!(MediaTime::new(41, Rational::new(1, 1000)) > a);
    }

    #[test]
    fn global_timestamp_coding() -> Result<()> {
        let ts = GlobalTimestamp {
            time_base_id: 2,
            pts: 1000,
        };
        let coded = ts.encode(3)?;
        assert_eq!(coded, 3002);
        assert_eq!(GlobalTimestamp::decode(coded, 3)?, ts);
        assert!(GlobalTimestamp::decode(coded, 0).is_err());
        Ok(())
    }
}
