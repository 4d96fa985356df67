//! Currency-safe minor-unit arithmetic (spec component C1).

use std::fmt;

use async_graphql::{InputValueError, InputValueResult, ScalarType, Value};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Three-letter ISO 4217 currency code, e.g. `USD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode([u8; 3]);

/// Exposed on the wire as a plain string scalar (e.g. `"USD"`), the same way
/// `order.rs`'s other plain-value fields round-trip through `SimpleObject`.
#[async_graphql::Scalar(name = "CurrencyCode")]
impl ScalarType for CurrencyCode {
    fn parse(value: Value) -> InputValueResult<Self> {
        match value {
            Value::String(s) => CurrencyCode::new(&s).map_err(|e| InputValueError::custom(e.to_string())),
            _ => Err(InputValueError::expected_type(value)),
        }
    }

    fn to_value(&self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl CurrencyCode {
    pub fn new(code: &str) -> Result<Self, CoreError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(CoreError::validation(format!(
                "`{}` is not a valid 3-letter ISO 4217 currency code",
                code
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("currency code is ASCII by construction")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monetary amount in minor units (e.g. cents) of a fixed currency.
///
/// All arithmetic that combines two `Money` values checks currency equality
/// first and fails with `CoreError::BusinessRule` (`Money.CurrencyMismatch`)
/// on mismatch, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: CurrencyCode,
}

impl Money {
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            amount_minor: 0,
            currency,
        }
    }

    pub fn new(amount_minor: i64, currency: CurrencyCode) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    fn check_currency(&self, other: &Money) -> Result<(), CoreError> {
        if self.currency != other.currency {
            return Err(CoreError::business_rule(
                "Money.CurrencyMismatch",
                format!(
                    "cannot combine `{}` with `{}`",
                    self.currency, other.currency
                ),
            ));
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, CoreError> {
        self.check_currency(other)?;
        Ok(Money::new(
            self.amount_minor + other.amount_minor,
            self.currency,
        ))
    }

    pub fn sub(&self, other: &Money) -> Result<Money, CoreError> {
        self.check_currency(other)?;
        Ok(Money::new(
            self.amount_minor - other.amount_minor,
            self.currency,
        ))
    }

    pub fn negate(&self) -> Money {
        Money::new(-self.amount_minor, self.currency)
    }

    pub fn mul_i64(&self, factor: i64) -> Money {
        Money::new(self.amount_minor * factor, self.currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    pub fn min(&self, other: &Money) -> Result<Money, CoreError> {
        self.check_currency(other)?;
        Ok(if self.amount_minor <= other.amount_minor {
            *self
        } else {
            *other
        })
    }

    /// Multiplies by a rational `numerator / denominator` using banker's
    /// rounding (round-half-to-even), per spec §3.
    pub fn mul_rational(&self, numerator: i64, denominator: i64) -> Money {
        debug_assert!(denominator != 0);
        let scaled = self.amount_minor as i128 * numerator as i128;
        let rounded = round_half_to_even(scaled, denominator as i128);
        Money::new(rounded as i64, self.currency)
    }

    /// Sums a set of adjustments that all share `currency`, failing fast on
    /// any cross-currency value.
    pub fn sum<'a>(
        currency: CurrencyCode,
        values: impl IntoIterator<Item = &'a Money>,
    ) -> Result<Money, CoreError> {
        let mut total = Money::zero(currency);
        for value in values {
            total = total.add(value)?;
        }
        Ok(total)
    }
}

/// Divides `numerator * value` by `denominator` rounding half-to-even, the
/// rounding rule spec §3 calls "banker's rounding" for percentage math.
fn round_half_to_even(value: i128, denominator: i128) -> i128 {
    let denominator = denominator.abs();
    let quotient = value.div_euclid(denominator);
    let remainder = value.rem_euclid(denominator);
    let twice_remainder = remainder * 2;
    if twice_remainder < denominator {
        quotient
    } else if twice_remainder > denominator {
        quotient + 1
    } else if quotient % 2 == 0 {
        quotient
    } else {
        quotient + 1
    }
}

/// Scales a set of per-target amounts down proportionally so that their sum
/// does not exceed `cap`, using largest-remainder rounding to reconcile
/// minor units (spec §4.2 "Apply max-discount cap").
pub fn scale_to_cap(amounts: &[i64], cap: i64) -> Vec<i64> {
    let total: i64 = amounts.iter().sum();
    if total <= cap || total == 0 {
        return amounts.to_vec();
    }
    let mut scaled_floor = Vec::with_capacity(amounts.len());
    let mut remainders = Vec::with_capacity(amounts.len());
    let mut floor_sum: i64 = 0;
    for &amount in amounts {
        let numerator = amount as i128 * cap as i128;
        let floor = (numerator / total as i128) as i64;
        let remainder = numerator - (floor as i128 * total as i128);
        scaled_floor.push(floor);
        remainders.push(remainder);
        floor_sum += floor;
    }
    let mut leftover = cap - floor_sum;
    let mut order: Vec<usize> = (0..amounts.len()).collect();
    order.sort_by(|&a, &b| remainders[b].cmp(&remainders[a]));
    for idx in order {
        if leftover <= 0 {
            break;
        }
        scaled_floor[idx] += 1;
        leftover -= 1;
    }
    scaled_floor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    #[test]
    fn add_same_currency() {
        let a = Money::new(1000, usd());
        let b = Money::new(250, usd());
        assert_eq!(a.add(&b).unwrap().amount_minor, 1250);
    }

    #[test]
    fn add_mismatched_currency_fails() {
        let a = Money::new(1000, usd());
        let b = Money::new(250, CurrencyCode::new("EUR").unwrap());
        let err = a.add(&b).unwrap_err();
        assert_eq!(err.code(), "Money.CurrencyMismatch");
    }

    #[test]
    fn mul_rational_rounds_half_to_even() {
        let m = Money::new(10000, usd());
        // 20% of 10000 = 2000, exact.
        assert_eq!(m.mul_rational(20, 100).amount_minor, 2000);
        // 2.5 rounds to 2 (even) rather than 3.
        let half = Money::new(5, usd());
        assert_eq!(half.mul_rational(1, 2).amount_minor, 2);
        let half_odd = Money::new(7, usd());
        assert_eq!(half_odd.mul_rational(1, 2).amount_minor, 4);
    }

    #[test]
    fn scale_to_cap_preserves_total() {
        let amounts = vec![3333, 3333, 3334];
        let scaled = scale_to_cap(&amounts, 1500);
        assert_eq!(scaled.iter().sum::<i64>(), 1500);
    }

    #[test]
    fn scale_to_cap_noop_under_cap() {
        let amounts = vec![100, 200];
        assert_eq!(scale_to_cap(&amounts, 1000), amounts);
    }
}
