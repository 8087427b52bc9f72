//! Resource quantity arithmetic.
//!
//! Kubernetes reports quota usage as `Quantity` strings (`"500m"`, `"2Gi"`,
//! `"1e3"`). Aggregating usage across namespaces needs them as numbers, so
//! they are parsed into nano-units held in an `i128`, which covers every
//! suffix up to `Ei` without loss.
//!
//! Parsing rounds sub-nano fractions up, like the API server does.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Quantity parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix in quantity {0:?}")]
    UnknownSuffix(String),
    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// Notation a quantity was written in; sums keep the first operand's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    /// Powers of 1000 (`k`, `M`, `G`, ...) and plain numbers.
    #[default]
    DecimalSI,
    /// Powers of 1024 (`Ki`, `Mi`, `Gi`, ...).
    BinarySI,
}

/// A parsed quantity.
#[derive(Clone, Copy, Debug, Default)]
pub struct Amount {
    nanos: i128,
    format: Option<Format>,
}

enum Scale {
    Decimal(i32),
    Binary(u32),
}

fn suffix_scale(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        _ => {
            // Decimal exponent notation: 1e3, 5E-2
            let exp = suffix.strip_prefix(['e', 'E'])?;
            if exp.is_empty() {
                return None;
            }
            return exp.parse::<i32>().ok().map(Scale::Decimal);
        }
    };
    Some(scale)
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

impl Amount {
    /// The zero quantity.
    pub const fn zero() -> Self {
        Self {
            nanos: 0,
            format: None,
        }
    }

    /// Value in nano-units.
    pub const fn nanos(&self) -> i128 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Parse a Kubernetes `Quantity`.
    pub fn parse(quantity: &Quantity) -> Result<Self, QuantityError> {
        quantity.0.parse()
    }

    /// Sum of two quantities, keeping the notation of the first non-empty one.
    pub fn add(&self, other: &Amount) -> Amount {
        Amount {
            nanos: self.nanos.saturating_add(other.nanos),
            format: self.format.or(other.format),
        }
    }

    /// Render as a Kubernetes `Quantity`.
    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.to_string())
    }

    fn format_binary(&self, f: &mut fmt::Formatter<'_>) -> Option<fmt::Result> {
        if self.nanos % NANOS_PER_UNIT != 0 {
            return None;
        }
        let units = self.nanos / NANOS_PER_UNIT;
        for (power, suffix) in [(6, "Ei"), (5, "Pi"), (4, "Ti"), (3, "Gi"), (2, "Mi"), (1, "Ki")]
        {
            let base = 1024i128.pow(power);
            if units % base == 0 {
                return Some(write!(f, "{}{}", units / base, suffix));
            }
        }
        None
    }
}

impl FromStr for Amount {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let number_len = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(number_len);

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
            return Err(QuantityError::InvalidNumber(s.to_string()));
        }
        let digits = format!("{whole}{frac}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| QuantityError::OutOfRange(s.to_string()))?;
        let frac_digits =
            i32::try_from(frac.len()).map_err(|_| QuantityError::OutOfRange(s.to_string()))?;

        let scale = suffix_scale(suffix).ok_or_else(|| QuantityError::UnknownSuffix(s.to_string()))?;
        let out_of_range = || QuantityError::OutOfRange(s.to_string());
        let (format, mut value, exp10) = match scale {
            Scale::Decimal(exp) => (Format::DecimalSI, mantissa, exp),
            Scale::Binary(power) => {
                let factor = 1024i128.checked_pow(power).ok_or_else(out_of_range)?;
                let value = mantissa.checked_mul(factor).ok_or_else(out_of_range)?;
                (Format::BinarySI, value, 0)
            }
        };

        // value * 10^(exp10 + 9 - frac_digits) nanos
        let shift = exp10.saturating_add(9).saturating_sub(frac_digits);
        if shift >= 0 {
            let factor = u32::try_from(shift)
                .ok()
                .and_then(pow10)
                .ok_or_else(out_of_range)?;
            value = value.checked_mul(factor).ok_or_else(out_of_range)?;
        } else {
            let divisor = pow10(shift.unsigned_abs());
            value = match divisor {
                Some(d) => {
                    let rounded = value / d;
                    if value % d != 0 { rounded + 1 } else { rounded }
                }
                // Smaller than a nano-unit
                None => i128::from(value != 0),
            };
        }

        Ok(Amount {
            nanos: if negative { -value } else { value },
            format: Some(format),
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "0");
        }
        if self.format == Some(Format::BinarySI) {
            if let Some(result) = self.format_binary(f) {
                return result;
            }
        }
        if self.nanos % NANOS_PER_UNIT == 0 {
            let units = self.nanos / NANOS_PER_UNIT;
            for (power, suffix) in [(18, "E"), (15, "P"), (12, "T"), (9, "G"), (6, "M"), (3, "k")] {
                let base = 10i128.pow(power);
                if units % base == 0 {
                    return write!(f, "{}{}", units / base, suffix);
                }
            }
            return write!(f, "{}", units);
        }
        for (divisor, suffix) in [(1_000_000i128, "m"), (1_000, "u")] {
            if self.nanos % divisor == 0 {
                return write!(f, "{}{}", self.nanos / divisor, suffix);
            }
        }
        write!(f, "{}n", self.nanos)
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Amount {}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

/// Sum quantities, treating missing values as zero.
pub fn sum<'a, I>(quantities: I) -> Result<Amount, QuantityError>
where
    I: IntoIterator<Item = Option<&'a Quantity>>,
{
    quantities
        .into_iter()
        .flatten()
        .try_fold(Amount::zero(), |acc, q| Ok(acc.add(&Amount::parse(q)?)))
}
