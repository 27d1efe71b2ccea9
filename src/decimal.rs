//! Arbitrary-precision decimal.
//!
//! Represented as `(sign, coefficient: BigUint, exponent: i64)` such that
//! the value equals `sign * coefficient * 10^exponent`. Exponent notation is
//! never accepted in literals (spec §9) and never produced by the printer —
//! the text form is always a plain `-123.456`-style decimal, normalized so
//! no two textually-different strings represent the same value.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Decimal {
    negative: bool,
    coefficient: BigUint,
    /// Power of ten the coefficient is scaled by; value = coefficient * 10^exponent.
    exponent: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalParseError(pub String);

impl fmt::Display for DecimalParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid decimal literal: {:?}", self.0)
    }
}
impl std::error::Error for DecimalParseError {}

impl Decimal {
    pub fn zero() -> Self {
        Decimal {
            negative: false,
            coefficient: BigUint::from(0u32),
            exponent: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.coefficient == BigUint::from(0u32)
    }

    pub fn from_i64(v: i64) -> Self {
        Decimal {
            negative: v < 0,
            coefficient: BigUint::from(v.unsigned_abs()),
            exponent: 0,
        }
    }

    pub fn from_bigint_str(digits: &str, negative: bool) -> Result<Self, DecimalParseError> {
        let coefficient = BigUint::from_str(digits)
            .map_err(|_| DecimalParseError(digits.to_string()))?;
        Ok(Decimal {
            negative,
            coefficient,
            exponent: 0,
        })
    }

    pub fn from_bigint(v: &num_bigint::BigInt) -> Self {
        Decimal {
            negative: v.sign() == num_bigint::Sign::Minus,
            coefficient: v.magnitude().clone(),
            exponent: 0,
        }
    }

    /// Parses strict decimal text: optional sign, digits, optional `.digits`.
    /// No exponent ("e"/"E") notation is ever accepted.
    pub fn parse(s: &str) -> Result<Self, DecimalParseError> {
        let orig = s;
        let mut s = s.trim();
        if s.is_empty() {
            return Err(DecimalParseError(orig.to_string()));
        }
        if s.to_ascii_lowercase().contains('e') {
            return Err(DecimalParseError(orig.to_string()));
        }
        let negative = if let Some(rest) = s.strip_prefix('-') {
            s = rest;
            true
        } else if let Some(rest) = s.strip_prefix('+') {
            s = rest;
            false
        } else {
            false
        };
        if s.is_empty() {
            return Err(DecimalParseError(orig.to_string()));
        }
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalParseError(orig.to_string()));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DecimalParseError(orig.to_string()));
        }
        let int_part = if int_part.is_empty() { "0" } else { int_part };
        let digits = format!("{int_part}{frac_part}");
        let digits = if digits.is_empty() { "0" } else { &digits };
        let coefficient =
            BigUint::from_str(digits).map_err(|_| DecimalParseError(orig.to_string()))?;
        let exponent = -(frac_part.len() as i64);
        let mut d = Decimal {
            negative,
            coefficient,
            exponent,
        };
        d.normalize();
        Ok(d)
    }

    /// Strips trailing zero digits from the coefficient (raising the
    /// exponent to compensate) and clears the sign on zero.
    fn normalize(&mut self) {
        if self.coefficient == BigUint::from(0u32) {
            self.negative = false;
            self.exponent = 0;
            return;
        }
        let ten = BigUint::from(10u32);
        while self.exponent < 0 && &self.coefficient % &ten == BigUint::from(0u32) {
            self.coefficient /= &ten;
            self.exponent += 1;
        }
    }

    /// Normalized textual form: no trailing zeros, no exponent, `-0 -> 0`.
    pub fn to_normalized_string(&self) -> String {
        let digits = self.coefficient.to_str_radix(10);
        let sign = if self.negative { "-" } else { "" };
        if self.exponent >= 0 {
            let zeros = "0".repeat(self.exponent as usize);
            return format!("{sign}{digits}{zeros}");
        }
        let frac_len = (-self.exponent) as usize;
        if frac_len >= digits.len() {
            let pad = "0".repeat(frac_len - digits.len());
            format!("{sign}0.{pad}{digits}")
        } else {
            let split = digits.len() - frac_len;
            format!("{sign}{}.{}", &digits[..split], &digits[split..])
        }
    }

    fn aligned(a: &Decimal, b: &Decimal) -> (num_bigint::BigInt, num_bigint::BigInt, i64) {
        use num_bigint::BigInt;
        let exp = a.exponent.min(b.exponent);
        let scale = |d: &Decimal| -> BigInt {
            let mag = BigInt::from(d.coefficient.clone()) * BigInt::from(10u32).pow((d.exponent - exp) as u32);
            if d.negative {
                -mag
            } else {
                mag
            }
        };
        (scale(a), scale(b), exp)
    }

    pub fn add(&self, other: &Decimal) -> Decimal {
        let (a, b, exp) = Self::aligned(self, other);
        Self::from_bigint_exp(a + b, exp)
    }

    pub fn sub(&self, other: &Decimal) -> Decimal {
        let (a, b, exp) = Self::aligned(self, other);
        Self::from_bigint_exp(a - b, exp)
    }

    pub fn mul(&self, other: &Decimal) -> Decimal {
        let coefficient = &self.coefficient * &other.coefficient;
        let negative = self.negative != other.negative;
        let mut d = Decimal {
            negative,
            coefficient,
            exponent: self.exponent + other.exponent,
        };
        d.normalize();
        d
    }

    /// Divides with a fixed extra precision, matching spec's requirement
    /// that DECIMAL has a finite decimal expansion: non-terminating
    /// divisions are rounded to `scale` fractional digits (half-up).
    pub fn div(&self, other: &Decimal, scale: u32) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        use num_bigint::BigInt;
        let negative = self.negative != other.negative;
        let num = BigInt::from(self.coefficient.clone());
        let den = BigInt::from(other.coefficient.clone());
        // scale numerator so the quotient carries one extra digit for rounding
        let scaled_num = num * BigInt::from(10u32).pow(scale + 1);
        let mut quotient = &scaled_num / &den;
        // round half-up on the extra digit, then drop it
        let ten = BigInt::from(10);
        let last_digit = (&quotient % &ten).to_string().parse::<i64>().unwrap_or(0).abs();
        quotient /= &ten;
        if last_digit >= 5 {
            quotient += BigInt::from(1);
        }
        let exponent = self.exponent - other.exponent - scale as i64;
        let coefficient = quotient.to_biguint().unwrap_or_else(|| BigUint::from(0u32));
        let mut d = Decimal {
            negative,
            coefficient,
            exponent,
        };
        d.normalize();
        Some(d)
    }

    fn from_bigint_exp(value: num_bigint::BigInt, exponent: i64) -> Decimal {
        let negative = value.sign() == num_bigint::Sign::Minus;
        let coefficient = value.magnitude().clone();
        let mut d = Decimal {
            negative,
            coefficient,
            exponent,
        };
        d.normalize();
        d
    }

    pub fn cmp_value(&self, other: &Decimal) -> Ordering {
        let (a, b, _) = Self::aligned(self, other);
        a.cmp(&b)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_value(other) == Ordering::Equal
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_value(other))
    }
}
impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_value(other)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())
    }
}

impl FromStr for Decimal {
    type Err = DecimalParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::parse(s)
    }
}

impl TryFrom<String> for Decimal {
    type Error = DecimalParseError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Decimal::parse(&value)
    }
}

impl From<Decimal> for String {
    fn from(value: Decimal) -> Self {
        value.to_normalized_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_zeros() {
        assert_eq!(Decimal::parse("1.2300").unwrap().to_normalized_string(), "1.23");
        assert_eq!(Decimal::parse("1.000").unwrap().to_normalized_string(), "1");
        assert_eq!(Decimal::parse("-0.0").unwrap().to_normalized_string(), "0");
        assert_eq!(Decimal::parse(".5").unwrap().to_normalized_string(), "0.5");
    }

    #[test]
    fn rejects_exponent_notation() {
        assert!(Decimal::parse("1e10").is_err());
        assert!(Decimal::parse("1E-3").is_err());
    }

    #[test]
    fn addition_and_subtraction_align_scale() {
        let a = Decimal::parse("1.1").unwrap();
        let b = Decimal::parse("2.25").unwrap();
        assert_eq!(a.add(&b).to_normalized_string(), "3.35");
        assert_eq!(b.sub(&a).to_normalized_string(), "1.15");
    }

    #[test]
    fn ordering_across_scales() {
        let a = Decimal::parse("1.50").unwrap();
        let b = Decimal::parse("1.5").unwrap();
        assert_eq!(a.cmp_value(&b), Ordering::Equal);
        assert!(Decimal::parse("2").unwrap() > Decimal::parse("1.9").unwrap());
    }
}
