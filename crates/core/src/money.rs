//! Money formatting
//!
//! All monetary amounts are `rust_decimal::Decimal`. Storage keeps full
//! precision; rounding happens only at display/TTS time, to two places with
//! banker's rounding.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round for display: two places, midpoint-to-even.
pub fn round_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Render an amount with the rupee symbol, trimming a ".00" fraction so the
/// TTS output stays natural ("₹500", "₹500.50").
pub fn format_inr(amount: Decimal) -> String {
    let rounded = round_display(amount);
    if rounded.fract().is_zero() {
        format!("₹{}", rounded.trunc())
    } else {
        format!("₹{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn whole_amounts_drop_fraction() {
        assert_eq!(format_inr(Decimal::from(500)), "₹500");
        assert_eq!(format_inr(Decimal::from_str("800.00").unwrap()), "₹800");
    }

    #[test]
    fn fractional_amounts_keep_two_places() {
        assert_eq!(format_inr(Decimal::from_str("499.5").unwrap()), "₹499.50");
        assert_eq!(format_inr(Decimal::from_str("12.345").unwrap()), "₹12.34");
    }

    #[test]
    fn bankers_rounding_at_midpoint() {
        // midpoint rounds to even
        assert_eq!(round_display(Decimal::from_str("2.125").unwrap()).to_string(), "2.12");
        assert_eq!(round_display(Decimal::from_str("2.135").unwrap()).to_string(), "2.14");
    }
}
