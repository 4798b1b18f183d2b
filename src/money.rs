//! Whole-yen amounts and the one rounding rule applied to them.
//!
//! Every fractional money value in the crate (rebates, tax, tax-inclusive
//! deductions) passes through [`round_half_up`]. Midpoints round away from
//! zero, so `62509.5` becomes `62510` and `-0.5` becomes `-1`.

use rust_decimal::prelude::*;

/// Amount in whole yen.
pub type Yen = i64;

/// Round to the nearest yen, midpoints away from zero.
///
/// Values outside the `i64` range saturate.
pub fn round_half_up(value: Decimal) -> Yen {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// `amount × rate`, rounded with [`round_half_up`].
pub fn apply_rate(amount: Yen, rate: Decimal) -> Yen {
    round_half_up(Decimal::from(amount) * rate)
}

/// `quantity × unit_price`, or `None` on overflow.
pub fn line_amount(quantity: i64, unit_price: Yen) -> Option<Yen> {
    quantity.checked_mul(unit_price)
}

/// Format with a yen sign and thousands separators, e.g. `¥1,224,096`.
pub fn format_yen(value: Yen) -> String {
    let grouped = format_grouped_int(value);
    match grouped.strip_prefix('-') {
        Some(digits) => format!("-¥{digits}"),
        None => format!("¥{grouped}"),
    }
}

pub fn format_grouped_int(value: i64) -> String {
    let negative = value < 0;
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut grouped: String = out.chars().rev().collect();
    if negative {
        grouped.insert(0, '-');
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_midpoint_up() {
        assert_eq!(round_half_up(dec!(62509.8)), 62510);
        assert_eq!(round_half_up(dec!(62509.5)), 62510);
        assert_eq!(round_half_up(dec!(62509.4)), 62509);
        assert_eq!(round_half_up(dec!(-0.5)), -1);
    }

    #[test]
    fn applies_tax_rate() {
        assert_eq!(apply_rate(625098, dec!(0.10)), 62510);
        assert_eq!(apply_rate(0, dec!(0.10)), 0);
        assert_eq!(apply_rate(15, dec!(0.10)), 2);
    }

    #[test]
    fn line_amount_detects_overflow() {
        assert_eq!(line_amount(10, 550), Some(5500));
        assert_eq!(line_amount(i64::MAX, 2), None);
    }

    #[test]
    fn formats_grouped_yen() {
        assert_eq!(format_yen(1224096), "¥1,224,096");
        assert_eq!(format_yen(0), "¥0");
        assert_eq!(format_yen(-5500), "-¥5,500");
        assert_eq!(format_grouped_int(999), "999");
    }
}
