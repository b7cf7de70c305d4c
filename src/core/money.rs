use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use super::error::{PlanError, PlanResult};

/// Rounds half away from zero at `dp` decimal places; values outside the
/// decimal range are returned unchanged.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

fn decimal_cents(amount: f64) -> PlanResult<Decimal> {
    Decimal::from_f64(amount)
        .and_then(|d| d.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(|| PlanError::invalid(format!("amount {amount} is not representable in cents")))
}

fn cents_to_i64(cents: Decimal, amount: f64) -> PlanResult<i64> {
    cents
        .to_i64()
        .ok_or_else(|| PlanError::invalid(format!("amount {amount} is not representable in cents")))
}

pub fn to_cents(amount: f64) -> PlanResult<i64> {
    let cents = decimal_cents(amount)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    cents_to_i64(cents, amount)
}

/// Rounds up to whole cents, so any positive amount is at least one cent.
/// Float noise below a millionth of a cent is dropped first.
pub fn to_cents_ceil(amount: f64) -> PlanResult<i64> {
    let cents = decimal_cents(amount)?
        .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
        .ceil();
    cents_to_i64(cents, amount)
}

/// Sums cent amounts, rejecting totals outside the `i64` range.
pub fn checked_sum_cents<I>(values: I, label: &str) -> PlanResult<i64>
where
    I: IntoIterator<Item = i64>,
{
    values.into_iter().try_fold(0i64, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| PlanError::invalid(format!("{label} overflows the supported range")))
    })
}

pub fn from_cents(cents: i64) -> f64 {
    Decimal::new(cents, 2).to_f64().unwrap_or(cents as f64 / 100.0)
}

/// Fractional rate applied to a cent amount, rounded back to whole cents.
pub fn apply_rate_cents(cents: i64, rate: f64) -> PlanResult<i64> {
    Decimal::from_f64(rate)
        .and_then(|rate| Decimal::from(cents).checked_mul(rate))
        .map(|d| d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_i64())
        .ok_or_else(|| {
            PlanError::invalid(format!("rate {rate} applied to {cents} cents overflows"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_dp_rounds_half_away_from_zero() {
        assert_eq!(round_dp(87.25, 1), 87.3);
        assert_eq!(round_dp(-2.5, 0), -3.0);
        assert_eq!(round_dp(66.666_666, 1), 66.7);
    }

    #[test]
    fn cents_conversion_is_exact_for_money_amounts() {
        assert_eq!(to_cents(1_234.567).expect("ok"), 123_457);
        assert_eq!(to_cents(0.1 + 0.2).expect("ok"), 30);
        assert_eq!(from_cents(123_457), 1_234.57);
        assert!(to_cents(f64::NAN).is_err());
    }

    #[test]
    fn ceiling_cents_never_round_a_positive_amount_to_zero() {
        assert_eq!(to_cents_ceil(0.004).expect("ok"), 1);
        assert_eq!(to_cents_ceil(600.0).expect("ok"), 60_000);
        assert_eq!(to_cents_ceil(0.1 + 0.2).expect("ok"), 30);
        assert_eq!(to_cents_ceil(12.341).expect("ok"), 1_235);
        assert_eq!(to_cents_ceil(0.0).expect("ok"), 0);
    }

    #[test]
    fn huge_amounts_are_rejected_instead_of_overflowing() {
        assert!(to_cents(1e27).is_err());
        assert!(to_cents(1e300).is_err());
        assert!(to_cents_ceil(1e27).is_err());
    }

    #[test]
    fn checked_sum_reports_overflow() {
        assert_eq!(checked_sum_cents([1, 2, 3], "total").expect("ok"), 6);
        let err = checked_sum_cents([i64::MAX, 1], "total").expect_err("overflow");
        assert!(matches!(err, PlanError::InvalidInput(_)));
    }

    #[test]
    fn rate_application_rounds_to_whole_cents() {
        assert_eq!(apply_rate_cents(100_000, 0.22).expect("ok"), 22_000);
        assert_eq!(apply_rate_cents(12_345, 0.22).expect("ok"), 2_716);
        assert!(apply_rate_cents(i64::MAX, 1e10).is_err());
    }
}
