//! Money arithmetic shared by carts, orders and checkout.
//!
//! Amounts are kept as [`Decimal`] in the shop currency and rounded to that
//! currency's minor unit (half away from zero) whenever a value is stored, so a
//! stored amount always converts to provider minor units without loss.

use crate::payments::currency::minor_unit_exponent;
use rust_decimal::{Decimal, RoundingStrategy};

/// Largest quantity a single cart or order line may carry.
pub const MAX_LINE_QUANTITY: i32 = 99;

pub fn round_money(amount: Decimal, currency: &str) -> Decimal {
    amount.round_dp_with_strategy(
        minor_unit_exponent(currency),
        RoundingStrategy::MidpointAwayFromZero,
    )
}

/// `quantity × price × (1 − discount/100)`, rounded to the currency's minor unit.
pub fn line_subtotal(
    quantity: i32,
    unit_price: Decimal,
    discount_percent: Decimal,
    currency: &str,
) -> Decimal {
    let factor = Decimal::ONE - discount_percent / Decimal::ONE_HUNDRED;
    round_money(Decimal::from(quantity) * unit_price * factor, currency)
}

/// Two stored amounts are the same price if they agree to four places, which
/// is the precision of the decimal columns.
pub fn same_amount(a: Decimal, b: Decimal) -> bool {
    a.round_dp(4) == b.round_dp(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub final_amount: Decimal,
}

/// Tax is charged on the pre-discount subtotal; the order discount comes off last.
pub fn order_totals(
    subtotal: Decimal,
    tax_rate_percent: Decimal,
    shipping_cost: Decimal,
    discount_amount: Decimal,
    currency: &str,
) -> OrderTotals {
    let tax_amount = round_money(subtotal * tax_rate_percent / Decimal::ONE_HUNDRED, currency);
    OrderTotals {
        subtotal,
        tax_amount,
        final_amount: subtotal + shipping_cost + tax_amount - discount_amount,
    }
}

/// Platform share of an order, as a percentage of its item subtotal.
pub fn platform_fee(subtotal: Decimal, fee_percent: Decimal, currency: &str) -> Decimal {
    round_money(subtotal * fee_percent / Decimal::ONE_HUNDRED, currency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test]
    fn discounted_line() {
        assert_eq!(line_subtotal(3, dec!(20.00), dec!(10), "USD"), dec!(54.00));
    }

    #[test_case(1, dec!(19.99), dec!(0), dec!(19.99) ; "no discount")]
    #[test_case(2, dec!(10.00), dec!(100), dec!(0.00) ; "free")]
    #[test_case(1, dec!(0.25), dec!(10), dec!(0.23) ; "rounds half away from zero")]
    #[test_case(3, dec!(0.99), dec!(15), dec!(2.52) ; "drops fractional cents")]
    #[test_case(7, dec!(1.005), dec!(0), dec!(7.04) ; "sub cent price")]
    fn line_subtotals(qty: i32, price: Decimal, discount: Decimal, expected: Decimal) {
        assert_eq!(line_subtotal(qty, price, discount, "USD"), expected);
    }

    #[test_case(1, dec!(12.345), dec!(0), "KWD", dec!(12.345) ; "three decimal keeps fils")]
    #[test_case(3, dec!(1.2345), dec!(10), "BHD", dec!(3.333) ; "three decimal rounds")]
    #[test_case(3, dec!(333.5), dec!(0), "JPY", dec!(1001) ; "zero decimal rounds to whole yen")]
    fn line_subtotals_follow_currency(
        qty: i32,
        price: Decimal,
        discount: Decimal,
        currency: &str,
        expected: Decimal,
    ) {
        assert_eq!(line_subtotal(qty, price, discount, currency), expected);
    }

    #[test]
    fn order_totals_scenario() {
        let totals = order_totals(dec!(54.00), dec!(10), dec!(5), Decimal::ZERO, "USD");
        assert_eq!(totals.tax_amount, dec!(5.40));
        assert_eq!(totals.final_amount, dec!(64.40));
    }

    #[test]
    fn three_decimal_tax() {
        let totals = order_totals(dec!(12.345), dec!(5), Decimal::ZERO, Decimal::ZERO, "KWD");
        assert_eq!(totals.tax_amount, dec!(0.617));
        assert_eq!(totals.final_amount, dec!(12.962));
    }

    #[test]
    fn order_discount_is_subtracted_after_tax() {
        let totals = order_totals(dec!(100), dec!(8.25), dec!(0), dec!(10), "USD");
        assert_eq!(totals.tax_amount, dec!(8.25));
        assert_eq!(totals.final_amount, dec!(98.25));
    }

    #[test]
    fn fee_is_percentage_of_subtotal() {
        assert_eq!(platform_fee(dec!(54.00), dec!(5), "USD"), dec!(2.70));
        assert_eq!(platform_fee(dec!(0.10), dec!(5), "USD"), dec!(0.01));
        assert_eq!(platform_fee(dec!(12.345), dec!(5), "KWD"), dec!(0.617));
    }

    #[test]
    fn amounts_compare_at_column_precision() {
        assert!(same_amount(dec!(19.99), dec!(19.990000001)));
        assert!(!same_amount(dec!(19.99), dec!(19.98)));
    }
}
