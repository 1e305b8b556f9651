//! Conversion from shop-currency decimals to the provider's integer minor units.

use crate::errors::ServiceError;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};

/// Currencies charged in whole units.
pub const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Currencies charged in thousandths.
pub const THREE_DECIMAL_CURRENCIES: [&str; 7] = ["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Number of decimal places the provider charges `currency` in.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Multiplier from a major-unit amount to the provider's minor units.
pub fn minor_unit_factor(currency: &str) -> i64 {
    10i64.pow(minor_unit_exponent(currency))
}

/// Scales `amount` into minor units, rounding to the nearest integer.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, ServiceError> {
    let scaled = (amount * Decimal::from(minor_unit_factor(currency)))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("{} {} is out of range", amount, currency))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(dec!(1500.00), "JPY", 1500 ; "zero decimal")]
    #[test_case(dec!(19.99), "USD", 1999 ; "two decimal")]
    #[test_case(dec!(12.345), "KWD", 12345 ; "three decimal")]
    #[test_case(dec!(19.99), "usd", 1999 ; "lower case code")]
    #[test_case(dec!(10.005), "EUR", 1001 ; "rounds to nearest")]
    #[test_case(dec!(99.5), "KRW", 100 ; "zero decimal rounds")]
    fn converts(amount: Decimal, currency: &str, expected: i64) {
        assert_eq!(to_minor_units(amount, currency).unwrap(), expected);
    }

    #[test]
    fn unknown_currencies_use_cents() {
        assert_eq!(minor_unit_factor("XYZ"), 100);
    }

    #[test_case("jpy", 0, 1)]
    #[test_case("USD", 2, 100)]
    #[test_case("kwd", 3, 1000)]
    fn exponent_matches_factor(currency: &str, exponent: u32, factor: i64) {
        assert_eq!(minor_unit_exponent(currency), exponent);
        assert_eq!(minor_unit_factor(currency), factor);
    }
}
