//! Fixed-precision decimal arithmetic
//!
//! Contract arithmetic never touches floating point. A [`Decimal`] is a signed
//! 128-bit integer scaled by `10^DECIMAL_PLACES`; every operation that can
//! produce digits beyond that precision takes an explicit [`RoundingMode`].

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of fractional digits carried by every decimal
pub const DECIMAL_PLACES: u32 = 18;

const SCALE: u128 = 1_000_000_000_000_000_000;

/// Errors produced by decimal arithmetic
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecimalError {
    /// Result does not fit in the backing integer
    #[error("decimal overflow")]
    Overflow,
    /// Division or modulo by zero
    #[error("decimal division by zero")]
    DivisionByZero,
    /// Text could not be parsed as a decimal literal
    #[error("invalid decimal literal '{0}'")]
    Parse(String),
    /// Rounding precision outside `0..=DECIMAL_PLACES`
    #[error("rounding precision {0} is out of range (max {DECIMAL_PLACES})")]
    Precision(u32),
    /// Unknown rounding mode name
    #[error("unknown rounding mode '{0}'")]
    UnknownRoundingMode(String),
}

/// How digits beyond the target precision are discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundingMode {
    /// Round to nearest, ties to even (banker's rounding)
    HalfEven,
    /// Round to nearest, ties away from zero
    HalfUp,
    /// Truncate toward zero
    Down,
    /// Away from zero
    Up,
    /// Toward negative infinity
    Floor,
    /// Toward positive infinity
    Ceiling,
}

impl RoundingMode {
    /// Name used by contracts (`decimal_round(x, 2, 'half_up')`)
    pub fn name(self) -> &'static str {
        match self {
            RoundingMode::HalfEven => "half_even",
            RoundingMode::HalfUp => "half_up",
            RoundingMode::Down => "down",
            RoundingMode::Up => "up",
            RoundingMode::Floor => "floor",
            RoundingMode::Ceiling => "ceiling",
        }
    }
}

impl FromStr for RoundingMode {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "half_even" => RoundingMode::HalfEven,
            "half_up" => RoundingMode::HalfUp,
            "down" => RoundingMode::Down,
            "up" => RoundingMode::Up,
            "floor" => RoundingMode::Floor,
            "ceiling" => RoundingMode::Ceiling,
            other => return Err(DecimalError::UnknownRoundingMode(other.to_string())),
        })
    }
}

/// Decide whether a truncated magnitude moves one unit away from zero.
///
/// `remainder` and `divisor` describe the discarded fraction
/// (`0 < remainder < divisor`).
fn round_away(
    quotient: u128,
    remainder: u128,
    divisor: u128,
    negative: bool,
    mode: RoundingMode,
) -> bool {
    if remainder == 0 {
        return false;
    }
    // remainder < divisor, so comparing remainder against divisor - remainder
    // avoids doubling past u128::MAX
    let upper = divisor - remainder;
    match mode {
        RoundingMode::Down => false,
        RoundingMode::Up => true,
        RoundingMode::Floor => negative,
        RoundingMode::Ceiling => !negative,
        RoundingMode::HalfUp => remainder >= upper,
        RoundingMode::HalfEven => {
            remainder > upper || (remainder == upper && quotient % 2 == 1)
        }
    }
}

/// `(remainder * 10 / divisor, remainder * 10 % divisor)` for
/// `remainder < divisor`, without forming the product
fn times_ten_mod(remainder: u128, divisor: u128) -> (u128, u128) {
    let mut digit = 0;
    let mut acc = 0;
    for _ in 0..10 {
        // acc and remainder are both below divisor
        let room = divisor - remainder;
        if acc >= room {
            acc -= room;
            digit += 1;
        } else {
            acc += remainder;
        }
    }
    (digit, acc)
}

fn apply_sign(magnitude: u128, negative: bool) -> Result<i128, DecimalError> {
    if negative {
        if magnitude == i128::MIN.unsigned_abs() {
            Ok(i128::MIN)
        } else {
            i128::try_from(magnitude)
                .map(|v| -v)
                .map_err(|_| DecimalError::Overflow)
        }
    } else {
        i128::try_from(magnitude).map_err(|_| DecimalError::Overflow)
    }
}

/// Signed fixed-point decimal with [`DECIMAL_PLACES`] fractional digits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Decimal(i128);

impl Decimal {
    /// Zero
    pub const ZERO: Decimal = Decimal(0);
    /// One
    pub const ONE: Decimal = Decimal(SCALE as i128);

    /// Build from the raw scaled representation
    pub const fn from_raw(raw: i128) -> Self {
        Decimal(raw)
    }

    /// Raw scaled representation
    pub const fn raw(self) -> i128 {
        self.0
    }

    /// Exact conversion from an integer
    pub fn from_int(value: i128) -> Result<Self, DecimalError> {
        value
            .checked_mul(SCALE as i128)
            .map(Decimal)
            .ok_or(DecimalError::Overflow)
    }

    /// Parse a literal such as `-12.5` or `1_000.25`.
    ///
    /// Digits beyond the supported precision are rounded half-even.
    pub fn parse(text: &str) -> Result<Self, DecimalError> {
        let err = || DecimalError::Parse(text.to_string());
        let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
        let (negative, body) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let mut integral: u128 = 0;
        for digit in int_part.bytes() {
            integral = integral
                .checked_mul(10)
                .and_then(|v| v.checked_add(u128::from(digit - b'0')))
                .ok_or(DecimalError::Overflow)?;
        }

        let mut fraction: u128 = 0;
        let mut kept = 0u32;
        let mut dropped_first = None;
        let mut dropped_rest_nonzero = false;
        for digit in frac_part.bytes() {
            let d = u128::from(digit - b'0');
            if kept < DECIMAL_PLACES {
                fraction = fraction * 10 + d;
                kept += 1;
            } else if dropped_first.is_none() {
                dropped_first = Some(d);
            } else if d != 0 {
                dropped_rest_nonzero = true;
            }
        }
        fraction *= 10u128.pow(DECIMAL_PLACES - kept);

        let mut magnitude = integral
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(fraction))
            .ok_or(DecimalError::Overflow)?;

        if let Some(first) = dropped_first {
            let round_up = first > 5
                || (first == 5 && (dropped_rest_nonzero || magnitude % 2 == 1));
            if round_up {
                magnitude = magnitude.checked_add(1).ok_or(DecimalError::Overflow)?;
            }
        }

        apply_sign(magnitude, negative).map(Decimal)
    }

    /// True when the value is negative
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// True when the value has no fractional digits
    pub fn is_integer(self) -> bool {
        self.0 % SCALE as i128 == 0
    }

    /// Integral part, truncated toward zero
    pub fn trunc(self) -> i128 {
        self.0 / SCALE as i128
    }

    /// Absolute value
    pub fn abs(self) -> Result<Self, DecimalError> {
        self.0.checked_abs().map(Decimal).ok_or(DecimalError::Overflow)
    }

    /// Negation
    pub fn checked_neg(self) -> Result<Self, DecimalError> {
        self.0.checked_neg().map(Decimal).ok_or(DecimalError::Overflow)
    }

    /// Addition
    pub fn checked_add(self, other: Decimal) -> Result<Self, DecimalError> {
        self.0.checked_add(other.0).map(Decimal).ok_or(DecimalError::Overflow)
    }

    /// Subtraction
    pub fn checked_sub(self, other: Decimal) -> Result<Self, DecimalError> {
        self.0.checked_sub(other.0).map(Decimal).ok_or(DecimalError::Overflow)
    }

    /// Multiplication, rounding the product to the supported precision
    pub fn checked_mul(self, other: Decimal, mode: RoundingMode) -> Result<Self, DecimalError> {
        let negative = self.is_negative() != other.is_negative();
        let (a, b) = (self.0.unsigned_abs(), other.0.unsigned_abs());
        let (ai, af) = (a / SCALE, a % SCALE);
        let (bi, bf) = (b / SCALE, b % SCALE);

        // a * b / SCALE split so that no partial product needs more than 128 bits
        let overflow = || DecimalError::Overflow;
        let whole = ai
            .checked_mul(bi)
            .and_then(|v| v.checked_mul(SCALE))
            .ok_or_else(overflow)?;
        let cross = ai
            .checked_mul(bf)
            .and_then(|v| af.checked_mul(bi).and_then(|w| v.checked_add(w)))
            .ok_or_else(overflow)?;
        let low = af * bf;
        let (low_q, low_r) = (low / SCALE, low % SCALE);

        let mut magnitude = whole
            .checked_add(cross)
            .and_then(|v| v.checked_add(low_q))
            .ok_or_else(overflow)?;
        if round_away(magnitude, low_r, SCALE, negative, mode) {
            magnitude = magnitude.checked_add(1).ok_or_else(overflow)?;
        }
        apply_sign(magnitude, negative).map(Decimal)
    }

    /// Division, rounding the quotient to the supported precision
    pub fn checked_div(self, other: Decimal, mode: RoundingMode) -> Result<Self, DecimalError> {
        if other.0 == 0 {
            return Err(DecimalError::DivisionByZero);
        }
        let negative = self.is_negative() != other.is_negative();
        let (a, b) = (self.0.unsigned_abs(), other.0.unsigned_abs());

        let mut magnitude = a / b;
        let mut remainder = a % b;
        // long division for the fractional digits
        for _ in 0..DECIMAL_PLACES {
            let (digit, rest) = times_ten_mod(remainder, b);
            magnitude = magnitude
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(DecimalError::Overflow)?;
            remainder = rest;
        }
        if round_away(magnitude, remainder, b, negative, mode) {
            magnitude = magnitude.checked_add(1).ok_or(DecimalError::Overflow)?;
        }
        apply_sign(magnitude, negative).map(Decimal)
    }

    /// Round to `places` fractional digits
    pub fn round(self, places: u32, mode: RoundingMode) -> Result<Self, DecimalError> {
        if places > DECIMAL_PLACES {
            return Err(DecimalError::Precision(places));
        }
        let unit = 10u128.pow(DECIMAL_PLACES - places);
        let negative = self.is_negative();
        let magnitude = self.0.unsigned_abs();
        let mut quotient = magnitude / unit;
        if round_away(quotient, magnitude % unit, unit, negative, mode) {
            quotient += 1;
        }
        let rounded = quotient.checked_mul(unit).ok_or(DecimalError::Overflow)?;
        apply_sign(rounded, negative).map(Decimal)
    }

    /// Compare against an integer without converting it
    pub fn cmp_int(self, other: i128) -> Ordering {
        match Decimal::from_int(other) {
            Ok(d) => self.cmp(&d),
            // the integer is outside the decimal range, so its sign decides
            Err(_) if other > 0 => Ordering::Less,
            Err(_) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let sign = if self.is_negative() { "-" } else { "" };
        let integral = magnitude / SCALE;
        let fraction = magnitude % SCALE;
        if fraction == 0 {
            return write!(f, "{sign}{integral}");
        }
        let digits = format!("{:0width$}", fraction, width = DECIMAL_PLACES as usize);
        write!(f, "{sign}{integral}.{}", digits.trim_end_matches('0'))
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::parse(s)
    }
}
