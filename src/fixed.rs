//! 17.14 fixed-point arithmetic for the MLFQS scheduler.
//!
//! The concrete 17.14 layout and conversion rules are grounded on the
//! Pintos original's `threads/fixed_point.h`, referenced from `thread.c`'s
//! `mlfqs_recent_cpu`/`mlfqs_load_avg` via `fp_to_int`/`mult_mixed`/`div_fp`.

const FRACTION_BITS: i32 = 14;
const SCALE: i64 = 1 << FRACTION_BITS;

/// A signed 17.14 fixed-point number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Fixed(i64);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub fn from_int(n: i32) -> Self {
        Fixed((n as i64) * SCALE)
    }

    /// Truncate toward zero, matching Pintos's `fp_to_int` (not `fp_to_int_round`).
    pub fn to_int(self) -> i32 {
        (self.0 / SCALE) as i32
    }

    /// Round to nearest integer, matching Pintos's `fp_to_int_round`.
    pub fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            ((self.0 + SCALE / 2) / SCALE) as i32
        } else {
            ((self.0 - SCALE / 2) / SCALE) as i32
        }
    }

    pub fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }

    pub fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }

    pub fn add_int(self, n: i32) -> Fixed {
        Fixed(self.0 + (n as i64) * SCALE)
    }

    pub fn sub_int(self, n: i32) -> Fixed {
        Fixed(self.0 - (n as i64) * SCALE)
    }

    pub fn mul(self, other: Fixed) -> Fixed {
        Fixed(((self.0 as i128 * other.0 as i128) / SCALE as i128) as i64)
    }

    pub fn mul_int(self, n: i32) -> Fixed {
        Fixed(self.0 * n as i64)
    }

    pub fn div(self, other: Fixed) -> Fixed {
        Fixed(((self.0 as i128 * SCALE as i128) / other.0 as i128) as i64)
    }

    pub fn div_int(self, n: i32) -> Fixed {
        Fixed(self.0 / n as i64)
    }
}

impl core::ops::Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed::add(self, rhs)
    }
}

impl core::ops::Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed::sub(self, rhs)
    }
}

impl core::ops::Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed::mul(self, rhs)
    }
}

impl core::ops::Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed::div(self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        assert_eq!(Fixed::from_int(5).to_int(), 5);
        assert_eq!(Fixed::from_int(-5).to_int(), -5);
    }

    #[test]
    fn rounding() {
        let half = Fixed::from_int(1).div_int(2);
        assert_eq!(half.to_int(), 0);
        assert_eq!(half.to_int_round(), 1);
    }

    #[test]
    fn load_avg_decay_shape() {
        // load_avg' = (59/60) * load_avg + (1/60) * ready_count
        let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
        let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));
        let load_avg = Fixed::ZERO;
        let ready = Fixed::from_int(1);
        let next = fifty_nine_sixtieths.mul(load_avg).add(one_sixtieth.mul(ready));
        assert!(next.to_int_round() == 0);
        assert!(next.0 > 0);
    }
}
