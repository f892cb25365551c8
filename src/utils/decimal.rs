//! Decimal arithmetic utilities for allocation calculations.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Signed percent change from `current` to `target`.
///
/// Returns zero when `current` is zero; callers treat that case separately
/// (a new allocation, not a percentage move).
pub fn percent_change(current: Decimal, target: Decimal) -> Decimal {
    if current == Decimal::ZERO {
        return Decimal::ZERO;
    }
    (target - current) / current * dec!(100)
}

/// Whole units purchasable with `allocated` at `price`, rounded down.
///
/// Never rounds up: a fractional remainder stays uninvested rather than
/// over-allocating.
pub fn floor_units(allocated: Decimal, price: Decimal) -> u64 {
    if price <= Decimal::ZERO {
        return 0;
    }
    (allocated / price).floor().to_u64().unwrap_or(0)
}

/// Lossy conversion for statistical math that runs in f64.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div_zero_denominator() {
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(dec!(100), dec!(150)), dec!(50));
        assert_eq!(percent_change(dec!(200), dec!(100)), dec!(-50));
        assert_eq!(percent_change(Decimal::ZERO, dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn test_floor_units_never_rounds_up() {
        assert_eq!(floor_units(dec!(1000), dec!(300)), 3);
        assert_eq!(floor_units(dec!(899.99), dec!(300)), 2);
        assert_eq!(floor_units(dec!(100), Decimal::ZERO), 0);
    }
}
