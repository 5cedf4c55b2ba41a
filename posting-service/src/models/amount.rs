//! Exact decimal arithmetic helpers for money amounts.
//!
//! All amounts are `rust_decimal::Decimal`; nothing in the posting path ever
//! touches floating point. Quantization uses half-away-from-zero rounding,
//! which is what statutory bookkeeping expects for currency amounts.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round an amount to the currency's minor-unit precision.
pub fn quantize(amount: Decimal, minor_units: u32) -> Decimal {
    amount.round_dp_with_strategy(minor_units, RoundingStrategy::MidpointAwayFromZero)
}

/// The smallest representable amount for a currency (0.01 for two minor units).
pub fn minor_unit(minor_units: u32) -> Decimal {
    Decimal::new(1, minor_units)
}

/// True when `a` and `b` differ by no more than `tolerance`.
pub fn within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

/// Anything that carries a debit and a credit side.
pub trait DebitCredit {
    fn debit(&self) -> Decimal;
    fn credit(&self) -> Decimal;
}

/// Sum of debits and sum of credits over a set of lines.
pub fn line_totals<L: DebitCredit>(lines: &[L]) -> (Decimal, Decimal) {
    lines.iter().fold((Decimal::ZERO, Decimal::ZERO), |(d, c), line| {
        (d + line.debit(), c + line.credit())
    })
}

/// Exact balance check. No tolerance: callers quantize first.
pub fn is_balanced<L: DebitCredit>(lines: &[L]) -> bool {
    let (debit, credit) = line_totals(lines);
    debit == credit
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct Line(Decimal, Decimal);

    impl DebitCredit for Line {
        fn debit(&self) -> Decimal {
            self.0
        }
        fn credit(&self) -> Decimal {
            self.1
        }
    }

    #[test]
    fn test_quantize_rounds_half_away_from_zero() {
        assert_eq!(quantize(dec!(10.005), 2), dec!(10.01));
        assert_eq!(quantize(dec!(-10.005), 2), dec!(-10.01));
        assert_eq!(quantize(dec!(10.004), 2), dec!(10.00));
        assert_eq!(quantize(dec!(12.5), 0), dec!(13));
    }

    #[test]
    fn test_minor_unit() {
        assert_eq!(minor_unit(2), dec!(0.01));
        assert_eq!(minor_unit(0), dec!(1));
        assert_eq!(minor_unit(3), dec!(0.001));
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(dec!(100.00), dec!(100.01), dec!(0.01)));
        assert!(!within_tolerance(dec!(100.00), dec!(100.02), dec!(0.01)));
    }

    #[test]
    fn test_line_totals_and_balance() {
        let lines = vec![
            Line(dec!(10000), Decimal::ZERO),
            Line(dec!(2500), Decimal::ZERO),
            Line(Decimal::ZERO, dec!(12500)),
        ];
        assert_eq!(line_totals(&lines), (dec!(12500), dec!(12500)));
        assert!(is_balanced(&lines));

        let unbalanced = vec![Line(dec!(1), Decimal::ZERO), Line(Decimal::ZERO, dec!(0.99))];
        assert!(!is_balanced(&unbalanced));
    }
}
