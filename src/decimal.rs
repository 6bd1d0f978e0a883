//! Arbitrary-precision decimal arithmetic
//!
//! A [`Decimal`] is `mantissa × 10^exponent` over a `BigInt` mantissa. There
//! is no global precision setting: every operation that can produce more
//! digits than it was given takes a [`DecimalContext`] and rounds its result
//! to that many significant digits (half away from zero). Transcendental
//! functions compute with guard digits and round once at the end.
//!
//! Values built by [`Decimal::parse`] and the checked operations keep their
//! leading digit within `10^±MAX_EXPONENT`, which keeps the `i64` exponent
//! arithmetic inside every operation far from overflow.

use crate::format::render_digits;
use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::num::IntErrorKind;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on requested significant digits
pub const MAX_PRECISION: u32 = 1000;

/// Largest power of ten a value's leading digit may have, in either direction
pub const MAX_EXPONENT: i64 = 1_000_000_000_000_000;

/// Largest power of ten built while rescaling a mantissa
const MAX_SCALE_DIGITS: i64 = 100_000;

/// Guard digits used by transcendental functions
const GUARD_DIGITS: u32 = 10;

/// Integer exponents up to this size use repeated squaring
const POWI_LIMIT: u64 = 1_000_000;

/// Beyond this magnitude `exp` overflows
const EXP_LIMIT: f64 = 1e12;

/// Number of significant digits results are rounded to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecimalContext {
    precision: u32,
}

impl DecimalContext {
    pub fn new(precision: u32) -> Self {
        DecimalContext {
            precision: precision.clamp(1, MAX_PRECISION),
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Same context with `extra` more digits
    pub fn with_guard(&self, extra: u32) -> Self {
        DecimalContext {
            precision: self.precision + extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseDecimalError {
    #[error("Cannot parse '{0}' as a decimal")]
    Invalid(String),
    #[error("'{0}' is outside the decimal range")]
    OutOfRange(String),
}

/// Arbitrary-precision decimal number
///
/// Always normalized: the mantissa carries no trailing zeros and zero is
/// stored with exponent 0, so derived equality is numeric equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: BigInt,
    exponent: i64,
}

/// 10^n for shifts bounded by a mantissa's digit count or the working precision
fn pow10(n: u64) -> BigInt {
    BigInt::from(10u8).pow(n as u32)
}

/// 10^n for shifts taken from operand exponents; `None` past [`MAX_SCALE_DIGITS`]
fn scale(n: i64) -> Option<BigInt> {
    if !(0..=MAX_SCALE_DIGITS).contains(&n) {
        return None;
    }
    let n = u32::try_from(n).ok()?;
    Some(BigInt::from(10u8).pow(n))
}

/// Decimal digits in an integer (at least 1)
fn digit_count(n: &BigInt) -> i64 {
    if n.is_zero() {
        1
    } else {
        n.magnitude().to_string().len() as i64
    }
}

/// `term` no longer affects the first `precision + 2` digits of `sum`
fn negligible(term: &Decimal, sum: &Decimal, ctx: &DecimalContext) -> bool {
    term.is_zero()
        || (!sum.is_zero()
            && term.adjusted_exponent() < sum.adjusted_exponent() - ctx.precision as i64 - 2)
}

impl Decimal {
    fn from_parts(mut mantissa: BigInt, mut exponent: i64) -> Decimal {
        if mantissa.is_zero() {
            return Decimal::zero();
        }
        let ten = BigInt::from(10u8);
        loop {
            let (q, r) = mantissa.div_rem(&ten);
            if !r.is_zero() {
                break;
            }
            mantissa = q;
            exponent += 1;
        }
        Decimal { mantissa, exponent }
    }

    pub fn zero() -> Decimal {
        Decimal {
            mantissa: BigInt::zero(),
            exponent: 0,
        }
    }

    pub fn one() -> Decimal {
        Decimal::from_i64(1)
    }

    pub fn from_i64(n: i64) -> Decimal {
        Decimal::from_parts(BigInt::from(n), 0)
    }

    pub fn from_bigint(n: BigInt) -> Decimal {
        Decimal::from_parts(n, 0)
    }

    /// Exact decimal form of the double's shortest representation
    pub fn from_f64(value: f64) -> Option<Decimal> {
        if !value.is_finite() {
            return None;
        }
        Decimal::parse(&format!("{:e}", value))
    }

    /// Parse a literal such as `-12.5e-3`
    pub fn parse(text: &str) -> Option<Decimal> {
        Decimal::parse_literal(text).ok()
    }

    /// Parse a literal, telling malformed text apart from out-of-range values
    pub fn parse_literal(text: &str) -> Result<Decimal, ParseDecimalError> {
        let invalid = || ParseDecimalError::Invalid(text.to_string());
        let out_of_range = || ParseDecimalError::OutOfRange(text.to_string());

        let trimmed = text.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (number, exponent_text) = match body.find(['e', 'E']) {
            Some(i) => (&body[..i], Some(&body[i + 1..])),
            None => (body, None),
        };
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let digits = format!("{}{}", int_part, frac_part);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let mut mantissa = BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(invalid)?;
        if negative {
            mantissa = -mantissa;
        }

        let exponent = match exponent_text {
            Some(e) => e.parse::<i64>().map_err(|err| match err.kind() {
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => out_of_range(),
                _ => invalid(),
            })?,
            None => 0,
        };
        if mantissa.is_zero() {
            return Ok(Decimal::zero());
        }

        let exponent = i64::try_from(frac_part.len())
            .ok()
            .and_then(|shift| exponent.checked_sub(shift))
            .ok_or_else(out_of_range)?;
        let adjusted = exponent
            .checked_add(digit_count(&mantissa) - 1)
            .ok_or_else(out_of_range)?;
        if adjusted.abs() > MAX_EXPONENT {
            return Err(out_of_range());
        }
        Ok(Decimal::from_parts(mantissa, exponent))
    }

    /// The leading digit lies within `10^±MAX_EXPONENT`
    pub fn in_range(&self) -> bool {
        self.is_zero() || self.adjusted_exponent().abs() <= MAX_EXPONENT
    }

    fn checked(self) -> Option<Decimal> {
        self.in_range().then_some(self)
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    fn is_positive(&self) -> bool {
        self.mantissa.is_positive()
    }

    pub fn is_integer(&self) -> bool {
        self.exponent >= 0
    }

    fn digits(&self) -> i64 {
        digit_count(&self.mantissa)
    }

    /// Power of ten of the leading digit
    pub fn adjusted_exponent(&self) -> i64 {
        self.exponent + self.digits() - 1
    }

    pub fn to_f64(&self) -> f64 {
        format!("{}e{}", self.mantissa, self.exponent)
            .parse()
            .unwrap_or(f64::NAN)
    }

    /// Exact integer value, if this is an integer of manageable size
    fn to_bigint(&self) -> Option<BigInt> {
        if !self.is_integer() {
            return None;
        }
        Some(&self.mantissa * scale(self.exponent)?)
    }

    /// Parity of an integer value; `None` when not an integer
    pub fn is_odd_integer(&self) -> Option<bool> {
        match self.exponent.cmp(&0) {
            Ordering::Less => None,
            // A trailing zero makes it even
            Ordering::Greater => Some(false),
            Ordering::Equal => Some(self.mantissa.is_odd()),
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        if !self.is_integer() || self.adjusted_exponent() > 18 {
            return None;
        }
        self.to_bigint()?.to_i64()
    }

    /// Round to the context's significant digits
    pub fn round_to(&self, ctx: &DecimalContext) -> Decimal {
        let excess = self.digits() - ctx.precision as i64;
        if excess <= 0 {
            return self.clone();
        }
        let divisor = pow10(excess as u64);
        let (mut q, r) = self.mantissa.abs().div_rem(&divisor);
        if r * 2u32 >= divisor {
            q += 1u32;
        }
        if self.is_negative() {
            q = -q;
        }
        Decimal::from_parts(q, self.exponent + excess)
    }

    pub fn abs(&self) -> Decimal {
        Decimal {
            mantissa: self.mantissa.abs(),
            exponent: self.exponent,
        }
    }

    pub fn add(&self, other: &Decimal, ctx: &DecimalContext) -> Decimal {
        if self.is_zero() {
            return other.round_to(ctx);
        }
        if other.is_zero() {
            return self.round_to(ctx);
        }

        // An operand entirely below the rounding digit cannot change the result
        let gap = self.adjusted_exponent() - other.adjusted_exponent();
        let limit = ctx.precision as i64 + 2;
        if gap > limit {
            return self.round_to(ctx);
        }
        if -gap > limit {
            return other.round_to(ctx);
        }

        let exponent = self.exponent.min(other.exponent);
        let a = &self.mantissa * pow10((self.exponent - exponent) as u64);
        let b = &other.mantissa * pow10((other.exponent - exponent) as u64);
        Decimal::from_parts(a + b, exponent).round_to(ctx)
    }

    pub fn sub(&self, other: &Decimal, ctx: &DecimalContext) -> Decimal {
        self.add(&-other.clone(), ctx)
    }

    pub fn mul(&self, other: &Decimal, ctx: &DecimalContext) -> Decimal {
        Decimal::from_parts(&self.mantissa * &other.mantissa, self.exponent + other.exponent)
            .round_to(ctx)
    }

    /// Product, or `None` when it leaves the exponent range
    pub fn checked_mul(&self, other: &Decimal, ctx: &DecimalContext) -> Option<Decimal> {
        if self.is_zero() || other.is_zero() {
            return Some(Decimal::zero());
        }
        let exponent = self.exponent.checked_add(other.exponent)?;
        Decimal::from_parts(&self.mantissa * &other.mantissa, exponent)
            .round_to(ctx)
            .checked()
    }

    /// Quotient, or `None` when dividing by zero or leaving the exponent range
    pub fn div(&self, other: &Decimal, ctx: &DecimalContext) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        if self.is_zero() {
            return Some(Decimal::zero());
        }

        let shift = (ctx.precision as i64 + 2 + other.digits() - self.digits()).max(0);
        let numerator = &self.mantissa * pow10(shift as u64);
        let (q, r) = numerator.div_rem(&other.mantissa);
        let exponent = self
            .exponent
            .checked_sub(other.exponent)?
            .checked_sub(shift)?;

        // A sticky digit keeps inexact halves from rounding down
        let quotient = if r.is_zero() {
            Decimal::from_parts(q, exponent)
        } else {
            let sticky = if self.is_negative() != other.is_negative() { -1 } else { 1 };
            Decimal::from_parts(q * 10u32 + sticky, exponent - 1)
        };
        quotient.round_to(ctx).checked()
    }

    /// Truncated remainder (sign follows the dividend), `None` for a zero divisor
    ///
    /// Exact for any exponent gap: the dividend's power of ten is reduced
    /// modulo the divisor instead of being expanded.
    pub fn rem(&self, other: &Decimal, ctx: &DecimalContext) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        if self.is_zero() || self.abs() < other.abs() {
            return Some(self.round_to(ctx));
        }

        let divisor = other.mantissa.abs();
        let remainder = if self.exponent >= other.exponent {
            // |a| × 10^gap mod |b|, all at the divisor's exponent
            let gap = BigInt::from(self.exponent - other.exponent);
            let shifted = BigInt::from(10u8).modpow(&gap, &divisor);
            (self.mantissa.abs() % &divisor) * shifted % &divisor
        } else {
            // |b| ≤ |a| bounds this gap by the dividend's digit count
            let gap = other.exponent - self.exponent;
            self.mantissa.abs() % (&divisor * pow10(gap as u64))
        };
        let remainder = if self.is_negative() { -remainder } else { remainder };
        let exponent = self.exponent.min(other.exponent);
        Some(Decimal::from_parts(remainder, exponent).round_to(ctx))
    }

    fn to_integral(&self, toward: Ordering) -> Decimal {
        if self.is_integer() {
            return self.clone();
        }
        // |x| < 1
        if self.adjusted_exponent() < 0 {
            return match toward {
                Ordering::Less if self.is_negative() => Decimal::from_i64(-1),
                Ordering::Greater if self.is_positive() => Decimal::one(),
                _ => Decimal::zero(),
            };
        }
        let divisor = pow10((-self.exponent) as u64);
        let (mut q, r) = self.mantissa.div_rem(&divisor);
        match toward {
            Ordering::Less if r.is_negative() => q -= 1u32,
            Ordering::Greater if r.is_positive() => q += 1u32,
            _ => {}
        }
        Decimal::from_parts(q, 0)
    }

    pub fn floor(&self) -> Decimal {
        self.to_integral(Ordering::Less)
    }

    pub fn ceil(&self) -> Decimal {
        self.to_integral(Ordering::Greater)
    }

    /// Nearest integer, halves toward +infinity
    pub fn round_half_ceil(&self) -> Decimal {
        let half = Decimal::from_parts(BigInt::from(5u8), -1);
        let exact = DecimalContext::new(MAX_PRECISION).with_guard(self.digits().max(0) as u32);
        self.add(&half, &exact).floor()
    }

    /// `self^n` for an integer `n`; `None` for `0^negative`
    pub fn powi(&self, n: i64, ctx: &DecimalContext) -> Option<Decimal> {
        if n == 0 {
            return Some(Decimal::one());
        }
        if self.is_zero() {
            return if n < 0 { None } else { Some(Decimal::zero()) };
        }

        let wp = ctx.with_guard(GUARD_DIGITS + digit_count(&BigInt::from(n)) as u32);
        let mut base = self.clone();
        let mut remaining = n.unsigned_abs();
        let mut acc = Decimal::one();
        while remaining > 0 {
            if remaining & 1 == 1 {
                acc = acc.checked_mul(&base, &wp)?;
            }
            remaining >>= 1;
            if remaining > 0 {
                base = base.checked_mul(&base, &wp)?;
            }
        }
        if n < 0 {
            acc = Decimal::one().div(&acc, &wp)?;
        }
        Some(acc.round_to(ctx))
    }

    /// General power; `None` when undefined (`0^negative`, negative base with a
    /// fractional exponent) or overflowing
    pub fn pow(&self, exponent: &Decimal, ctx: &DecimalContext) -> Option<Decimal> {
        if let Some(n) = exponent.to_i64().filter(|n| n.unsigned_abs() <= POWI_LIMIT) {
            return self.powi(n, ctx);
        }
        if self.is_zero() {
            return if exponent.is_negative() { None } else { Some(Decimal::zero()) };
        }

        let negate = if self.is_negative() {
            exponent.is_odd_integer()?
        } else {
            false
        };

        // Past EXP_LIMIT the product overflows anyway, so 13 extra digits suffice
        let wp = ctx.with_guard(GUARD_DIGITS + exponent.adjusted_exponent().clamp(0, 13) as u32);
        let log = self.abs().ln(&wp)?;
        let result = exponent.mul(&log, &wp).exp(ctx)?;
        Some(if negate { -result } else { result })
    }

    /// Square root, `None` for negative input
    pub fn sqrt(&self, ctx: &DecimalContext) -> Option<Decimal> {
        if self.is_negative() {
            return None;
        }
        if self.is_zero() {
            return Some(Decimal::zero());
        }
        Some(self.integer_root(2, ctx))
    }

    /// Cube root (defined for negative input)
    pub fn cbrt(&self, ctx: &DecimalContext) -> Decimal {
        if self.is_zero() {
            return Decimal::zero();
        }
        let root = self.abs().integer_root(3, ctx);
        if self.is_negative() {
            -root
        } else {
            root
        }
    }

    /// k-th root of a positive value via an integer root of a scaled mantissa
    fn integer_root(&self, k: u32, ctx: &DecimalContext) -> Decimal {
        let k_i = k as i64;
        let wanted = ctx.precision as i64 + 2;
        let mut shift = (k_i * wanted - self.digits()).max(0);
        shift += (self.exponent - shift).rem_euclid(k_i);

        let scaled = &self.mantissa * pow10(shift as u64);
        let root = scaled.nth_root(k);
        let exponent = (self.exponent - shift).div_euclid(k_i);

        let result = if root.pow(k) == scaled {
            Decimal::from_parts(root, exponent)
        } else {
            Decimal::from_parts(root * 10u32 + 1u32, exponent - 1)
        };
        result.round_to(ctx)
    }

    /// e^self; `None` on overflow
    pub fn exp(&self, ctx: &DecimalContext) -> Option<Decimal> {
        if self.is_zero() {
            return Some(Decimal::one());
        }
        let magnitude = self.to_f64().abs();
        if magnitude > EXP_LIMIT {
            return if self.is_negative() { Some(Decimal::zero()) } else { None };
        }

        // Halve until |r| < 0.1, then square the series result back up
        let halvings = if magnitude > 0.1 {
            (magnitude / 0.1).log2().ceil() as u32
        } else {
            0
        };
        let wp = ctx.with_guard(GUARD_DIGITS + halvings / 3 + 1 + magnitude.log10().max(0.0) as u32);
        let half = Decimal::from_parts(BigInt::from(5u8), -1);

        let mut r = self.clone();
        for _ in 0..halvings {
            r = r.mul(&half, &wp);
        }

        let mut sum = Decimal::one();
        let mut term = Decimal::one();
        let mut n = 1i64;
        loop {
            term = term.mul(&r, &wp).div(&Decimal::from_i64(n), &wp)?;
            if negligible(&term, &sum, &wp) {
                break;
            }
            sum = sum.add(&term, &wp);
            n += 1;
        }

        for _ in 0..halvings {
            sum = sum.mul(&sum, &wp);
        }
        Some(sum.round_to(ctx))
    }

    /// Natural logarithm, `None` unless positive
    pub fn ln(&self, ctx: &DecimalContext) -> Option<Decimal> {
        if !self.is_positive() {
            return None;
        }
        if *self == Decimal::one() {
            return Some(Decimal::zero());
        }

        // self = m × 10^k with m in [1, 10)
        let k = self.adjusted_exponent();
        let wp = ctx.with_guard(GUARD_DIGITS + 2 + digit_count(&BigInt::from(k)) as u32);
        let m = Decimal {
            mantissa: self.mantissa.clone(),
            exponent: self.exponent - k,
        };

        let mut result = ln_near_one(&m, &wp)?;
        if k != 0 {
            let ln10 = ln_near_one(&Decimal::from_i64(10), &wp)?;
            result = result.add(&ln10.mul(&Decimal::from_i64(k), &wp), &wp);
        }
        Some(result.round_to(ctx))
    }

    pub fn log10(&self, ctx: &DecimalContext) -> Option<Decimal> {
        self.log_base(&Decimal::from_i64(10), ctx)
    }

    pub fn log2(&self, ctx: &DecimalContext) -> Option<Decimal> {
        self.log_base(&Decimal::from_i64(2), ctx)
    }

    fn log_base(&self, base: &Decimal, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = ctx.with_guard(GUARD_DIGITS);
        let result = self.ln(&wp)?.div(&base.ln(&wp)?, &wp)?;
        // Exact powers of the base come out as integers
        let rounded = result.round_to(ctx);
        let nearest = rounded.round_half_ceil();
        if rounded.sub(&nearest, &wp).abs().adjusted_exponent() < -(ctx.precision as i64) {
            return Some(nearest);
        }
        Some(rounded)
    }

    /// π to the context's precision (Machin's formula in fixed point)
    pub fn pi(ctx: &DecimalContext) -> Decimal {
        let wp = ctx.precision + GUARD_DIGITS;
        let scale = pow10(wp as u64);
        let pi = atan_inverse(5, &scale) * 16u32 - atan_inverse(239, &scale) * 4u32;
        Decimal::from_parts(pi, -(wp as i64)).round_to(ctx)
    }

    /// Reduce an angle into [-π, π]
    fn reduce_angle(&self, wp: &DecimalContext) -> Decimal {
        let two_pi = Decimal::pi(wp).mul(&Decimal::from_i64(2), wp);
        let turns = match self.div(&two_pi, wp) {
            Some(t) => t.round_half_ceil(),
            None => return self.clone(),
        };
        if turns.is_zero() {
            return self.clone();
        }
        self.sub(&turns.mul(&two_pi, wp), wp)
    }

    /// Working precision for reducing this angle; `None` when the integer
    /// part alone has more than [`MAX_PRECISION`] digits
    fn angle_context(&self, ctx: &DecimalContext) -> Option<DecimalContext> {
        let integer_digits = self.adjusted_exponent().max(0);
        if integer_digits > MAX_PRECISION as i64 {
            return None;
        }
        Some(ctx.with_guard(GUARD_DIGITS + integer_digits as u32))
    }

    /// Sine; `None` when the angle is too large to reduce
    pub fn sin(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = self.angle_context(ctx)?;
        Some(sin_series(&self.reduce_angle(&wp), &wp).round_to(ctx))
    }

    /// Cosine; `None` when the angle is too large to reduce
    pub fn cos(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = self.angle_context(ctx)?;
        Some(cos_series(&self.reduce_angle(&wp), &wp).round_to(ctx))
    }

    /// Tangent, `None` where the cosine vanishes or the angle is too large
    pub fn tan(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = self.angle_context(ctx)?;
        let r = self.reduce_angle(&wp);
        sin_series(&r, &wp)
            .div(&cos_series(&r, &wp), &wp)
            .map(|t| t.round_to(ctx))
    }

    pub fn atan(&self, ctx: &DecimalContext) -> Decimal {
        if self.is_zero() {
            return Decimal::zero();
        }
        let wp = ctx.with_guard(GUARD_DIGITS);
        let one = Decimal::one();

        // atan(x) = ±π/2 - atan(1/x) for |x| > 1
        if self.abs() > one {
            let half_pi = Decimal::pi(&wp).mul(&Decimal::from_parts(BigInt::from(5u8), -1), &wp);
            let inverse = match one.div(self, &wp) {
                Some(v) => v.atan(&wp),
                None => return Decimal::zero(),
            };
            let signed = if self.is_negative() { -half_pi } else { half_pi };
            return signed.sub(&inverse, &wp).round_to(ctx);
        }

        // atan(x) = 2 atan(x / (1 + sqrt(1 + x²))), three times
        let mut x = self.clone();
        for _ in 0..3 {
            let hyp = match one.add(&x.mul(&x, &wp), &wp).sqrt(&wp) {
                Some(h) => h,
                None => break,
            };
            x = match x.div(&one.add(&hyp, &wp), &wp) {
                Some(v) => v,
                None => break,
            };
        }

        let x2 = x.mul(&x, &wp);
        let mut power = x.clone();
        let mut sum = x;
        let mut n = 1i64;
        loop {
            power = -power.mul(&x2, &wp);
            n += 2;
            let term = match power.div(&Decimal::from_i64(n), &wp) {
                Some(t) => t,
                None => break,
            };
            if negligible(&term, &sum, &wp) {
                break;
            }
            sum = sum.add(&term, &wp);
        }
        sum.mul(&Decimal::from_i64(8), &wp).round_to(ctx)
    }

    /// Arcsine, `None` outside [-1, 1]
    pub fn asin(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let one = Decimal::one();
        match self.abs().cmp(&one) {
            Ordering::Greater => None,
            Ordering::Equal => {
                let wp = ctx.with_guard(GUARD_DIGITS);
                let half_pi = Decimal::pi(&wp).mul(&Decimal::from_parts(BigInt::from(5u8), -1), &wp);
                let result = if self.is_negative() { -half_pi } else { half_pi };
                Some(result.round_to(ctx))
            }
            Ordering::Less => {
                let wp = ctx.with_guard(GUARD_DIGITS);
                let cos = one.sub(&self.mul(self, &wp), &wp).sqrt(&wp)?;
                Some(self.div(&cos, &wp)?.atan(ctx))
            }
        }
    }

    /// Arccosine, `None` outside [-1, 1]
    pub fn acos(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = ctx.with_guard(GUARD_DIGITS);
        let half_pi = Decimal::pi(&wp).mul(&Decimal::from_parts(BigInt::from(5u8), -1), &wp);
        Some(half_pi.sub(&self.asin(&wp)?, &wp).round_to(ctx))
    }

    /// Hyperbolic sine; `None` on overflow
    pub fn sinh(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = ctx.with_guard(GUARD_DIGITS);
        // Series avoids cancellation near zero
        if self.abs() < Decimal::one() {
            return Some(sinh_series(self, &wp).round_to(ctx));
        }
        let e = self.exp(&wp)?;
        let inv = Decimal::one().div(&e, &wp)?;
        e.sub(&inv, &wp).div(&Decimal::from_i64(2), &wp).map(|v| v.round_to(ctx))
    }

    /// Hyperbolic cosine; `None` on overflow
    pub fn cosh(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let wp = ctx.with_guard(GUARD_DIGITS);
        let e = self.abs().exp(&wp)?;
        let inv = Decimal::one().div(&e, &wp)?;
        e.add(&inv, &wp).div(&Decimal::from_i64(2), &wp).map(|v| v.round_to(ctx))
    }

    pub fn tanh(&self, ctx: &DecimalContext) -> Decimal {
        let wp = ctx.with_guard(GUARD_DIGITS);
        let ratio = self
            .sinh(&wp)
            .zip(self.cosh(&wp))
            .and_then(|(s, c)| s.div(&c, &wp));
        match ratio {
            Some(v) => v.round_to(ctx),
            // Saturated
            None if self.is_negative() => Decimal::from_i64(-1),
            None => Decimal::one(),
        }
    }

    pub fn asinh(&self, ctx: &DecimalContext) -> Option<Decimal> {
        if self.is_zero() {
            return Some(Decimal::zero());
        }
        if let Some(tiny) = self.below_cubic_term(ctx) {
            return Some(tiny);
        }
        let wp = ctx.with_guard(GUARD_DIGITS + (-self.adjusted_exponent()).max(0) as u32);
        let x = self.abs();
        let root = x.mul(&x, &wp).add(&Decimal::one(), &wp).sqrt(&wp)?;
        let result = x.add(&root, &wp).ln(&wp)?;
        let result = if self.is_negative() { -result } else { result };
        Some(result.round_to(ctx))
    }

    /// Inverse hyperbolic cosine, `None` below 1
    pub fn acosh(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let one = Decimal::one();
        if *self < one {
            return None;
        }
        let wp = ctx.with_guard(GUARD_DIGITS);
        let root = self.mul(self, &wp).sub(&one, &wp).sqrt(&wp)?;
        Some(self.add(&root, &wp).ln(&wp)?.round_to(ctx))
    }

    /// Inverse hyperbolic tangent, `None` outside (-1, 1)
    pub fn atanh(&self, ctx: &DecimalContext) -> Option<Decimal> {
        let one = Decimal::one();
        if self.abs() >= one {
            return None;
        }
        if self.is_zero() {
            return Some(Decimal::zero());
        }
        if let Some(tiny) = self.below_cubic_term(ctx) {
            return Some(tiny);
        }
        let wp = ctx.with_guard(GUARD_DIGITS + (-self.adjusted_exponent()).max(0) as u32);
        let ratio = one.add(self, &wp).div(&one.sub(self, &wp), &wp)?;
        let half = Decimal::from_parts(BigInt::from(5u8), -1);
        Some(ratio.ln(&wp)?.mul(&half, &wp).round_to(ctx))
    }

    /// `self` rounded, when |self| is small enough that an odd series
    /// starting at `x` no longer moves past its first term
    fn below_cubic_term(&self, ctx: &DecimalContext) -> Option<Decimal> {
        (self.adjusted_exponent() < -(ctx.precision as i64) - 2).then(|| self.round_to(ctx))
    }

    /// Text with at most `digits` significant digits, trailing zeros dropped
    pub fn to_significant_string(&self, digits: u32) -> String {
        let rounded = self.round_to(&DecimalContext::new(digits));
        rounded.to_string()
    }
}

/// ln(m) for m in [1, 10]: square roots toward 1, then the atanh series
fn ln_near_one(m: &Decimal, wp: &DecimalContext) -> Option<Decimal> {
    // ten square roots bring 10 within 1% of 1
    let wp = wp.with_guard(4);
    let one = Decimal::one();
    let threshold = Decimal::from_parts(BigInt::one(), -2);

    let mut m = m.clone();
    let mut doublings = 0u32;
    while m.sub(&one, &wp).abs() > threshold {
        m = m.sqrt(&wp)?;
        doublings += 1;
    }

    // ln(m) = 2 atanh((m - 1) / (m + 1))
    let z = m.sub(&one, &wp).div(&m.add(&one, &wp), &wp)?;
    let z2 = z.mul(&z, &wp);
    let mut power = z.clone();
    let mut sum = z;
    let mut n = 1i64;
    loop {
        power = power.mul(&z2, &wp);
        n += 2;
        let term = power.div(&Decimal::from_i64(n), &wp)?;
        if negligible(&term, &sum, &wp) {
            break;
        }
        sum = sum.add(&term, &wp);
    }

    let scale = Decimal::from_bigint(BigInt::from(2u8).pow(doublings + 1));
    Some(sum.mul(&scale, &wp))
}

/// atan(1/n) scaled by `scale`, in integer fixed point
fn atan_inverse(n: u32, scale: &BigInt) -> BigInt {
    let n2 = BigInt::from(n) * BigInt::from(n);
    let mut power = scale / BigInt::from(n);
    let mut sum = power.clone();
    let mut k = 1u32;
    loop {
        power = &power / &n2;
        let term = &power / BigInt::from(2 * k + 1);
        if term.is_zero() {
            break;
        }
        if k % 2 == 1 {
            sum -= term;
        } else {
            sum += term;
        }
        k += 1;
    }
    sum
}

fn sin_series(r: &Decimal, wp: &DecimalContext) -> Decimal {
    odd_series(r, wp, true)
}

fn sinh_series(r: &Decimal, wp: &DecimalContext) -> Decimal {
    odd_series(r, wp, false)
}

/// x ± x³/3! + x⁵/5! ...
fn odd_series(r: &Decimal, wp: &DecimalContext, alternate: bool) -> Decimal {
    let r2 = r.mul(r, wp);
    let mut term = r.clone();
    let mut sum = r.clone();
    let mut n = 1i64;
    loop {
        let step = term.mul(&r2, wp);
        term = match step.div(&Decimal::from_i64((n + 1) * (n + 2)), wp) {
            Some(t) => t,
            None => break,
        };
        if alternate {
            term = -term;
        }
        n += 2;
        if negligible(&term, &sum, wp) {
            break;
        }
        sum = sum.add(&term, wp);
    }
    sum
}

/// 1 - x²/2! + x⁴/4! ...
fn cos_series(r: &Decimal, wp: &DecimalContext) -> Decimal {
    let r2 = r.mul(r, wp);
    let mut term = Decimal::one();
    let mut sum = Decimal::one();
    let mut n = 0i64;
    loop {
        let step = -term.mul(&r2, wp);
        term = match step.div(&Decimal::from_i64((n + 1) * (n + 2)), wp) {
            Some(t) => t,
            None => break,
        };
        n += 2;
        if negligible(&term, &sum, wp) {
            break;
        }
        sum = sum.add(&term, wp);
    }
    sum
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal {
            mantissa: -self.mantissa,
            exponent: self.exponent,
        }
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (sa, sb) = (self.mantissa.sign(), other.mantissa.sign());
        if sa != sb {
            return sa.cmp(&sb);
        }
        if sa == Sign::NoSign {
            return Ordering::Equal;
        }

        let by_magnitude = match self.adjusted_exponent().cmp(&other.adjusted_exponent()) {
            Ordering::Equal => {
                let exponent = self.exponent.min(other.exponent);
                let a = self.mantissa.abs() * pow10((self.exponent - exponent) as u64);
                let b = other.mantissa.abs() * pow10((other.exponent - exponent) as u64);
                a.cmp(&b)
            }
            ordering => ordering,
        };
        if sa == Sign::Minus {
            by_magnitude.reverse()
        } else {
            by_magnitude
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::parse_literal(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let digits = self.mantissa.magnitude().to_string();
        f.write_str(&render_digits(self.is_negative(), &digits, self.adjusted_exponent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ctx(p: u32) -> DecimalContext {
        DecimalContext::new(p)
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(d("12.50").to_string(), "12.5");
        assert_eq!(d("-0.001").to_string(), "-0.001");
        assert_eq!(d("1.5e3").to_string(), "1500");
        assert_eq!(d("1e21").to_string(), "1e+21");
        assert_eq!(d("0.000").to_string(), "0");
        assert!(Decimal::parse("1.2.3").is_none());
        assert!(Decimal::parse("").is_none());
        assert_eq!(Decimal::from_f64(0.1).unwrap(), d("0.1"));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(d("2.345").round_to(&ctx(3)), d("2.35"));
        assert_eq!(d("-2.345").round_to(&ctx(3)), d("-2.35"));
        assert_eq!(d("9.999").round_to(&ctx(2)), d("10"));
    }

    #[test]
    fn test_one_third_to_thirty_digits() {
        let third = Decimal::one().div(&Decimal::from_i64(3), &ctx(30)).unwrap();
        assert_eq!(third.to_significant_string(30), "0.333333333333333333333333333333");
    }

    #[test]
    fn test_arithmetic() {
        let c = ctx(20);
        assert_eq!(d("0.1").add(&d("0.2"), &c), d("0.3"));
        assert_eq!(d("5").sub(&d("7.5"), &c), d("-2.5"));
        assert_eq!(d("1.5").mul(&d("-4"), &c), d("-6"));
        assert_eq!(d("-7").rem(&d("3"), &c).unwrap(), d("-1"));
        assert_eq!(d("5.5").rem(&d("2"), &c).unwrap(), d("1.5"));
        assert!(d("1").div(&Decimal::zero(), &c).is_none());
        assert!(d("1").rem(&Decimal::zero(), &c).is_none());
        // far smaller addend disappears below the last digit
        assert_eq!(d("1").add(&d("1e-40"), &c), d("1"));
    }

    #[test]
    fn test_ordering() {
        assert!(d("-2") < d("-1.5"));
        assert!(d("0.01") < d("0.1"));
        assert!(d("100") > d("99.999"));
        assert_eq!(d("1.0").cmp(&d("1")), Ordering::Equal);
    }

    #[test]
    fn test_integral_parts() {
        assert_eq!(d("-1.5").floor(), d("-2"));
        assert_eq!(d("-1.5").ceil(), d("-1"));
        assert_eq!(d("0.25").ceil(), d("1"));
        assert_eq!(d("-0.25").floor(), d("-1"));
        assert_eq!(d("2.5").round_half_ceil(), d("3"));
        assert_eq!(d("-2.5").round_half_ceil(), d("-2"));
    }

    #[test]
    fn test_roots() {
        let c = ctx(30);
        assert_eq!(d("16").sqrt(&c).unwrap(), d("4"));
        assert_eq!(
            d("2").sqrt(&c).unwrap().to_string(),
            "1.41421356237309504880168872421"
        );
        assert!(d("-1").sqrt(&c).is_none());
        assert_eq!(d("-27").cbrt(&c), d("-3"));
        assert_eq!(d("0.001").cbrt(&c), d("0.1"));
    }

    #[test]
    fn test_pi_and_e() {
        let c = ctx(40);
        assert_eq!(
            Decimal::pi(&c).to_string(),
            "3.141592653589793238462643383279502884197"
        );
        assert_eq!(
            Decimal::one().exp(&c).unwrap().to_string(),
            "2.718281828459045235360287471352662497757"
        );
    }

    #[test]
    fn test_logarithms() {
        let c = ctx(30);
        assert_eq!(
            d("2").ln(&c).unwrap().to_string(),
            "0.693147180559945309417232121458"
        );
        assert_eq!(d("1000").log10(&c).unwrap(), d("3"));
        assert_eq!(d("1024").log2(&c).unwrap(), d("10"));
        assert!(Decimal::zero().ln(&c).is_none());
        assert!(d("-1").ln(&c).is_none());
    }

    #[test]
    fn test_powers() {
        let c = ctx(25);
        assert_eq!(d("2").powi(10, &c).unwrap(), d("1024"));
        assert_eq!(d("2").powi(-2, &c).unwrap(), d("0.25"));
        assert!(Decimal::zero().powi(-1, &c).is_none());
        let root2 = d("2").pow(&d("0.5"), &c).unwrap();
        assert_eq!(root2, d("2").sqrt(&c).unwrap());
        assert!(d("-8").pow(&d("0.5"), &c).is_none());
    }

    #[test]
    fn test_trig() {
        let c = ctx(25);
        let pi = Decimal::pi(&ctx(40));
        let half_pi = pi.mul(&d("0.5"), &ctx(40));
        assert_eq!(half_pi.sin(&c).unwrap(), Decimal::one());
        assert!(pi.sin(&c).unwrap().abs() < d("1e-24"));
        assert_eq!(Decimal::zero().cos(&c).unwrap(), Decimal::one());
        assert_eq!(d("1").atan(&c).mul(&d("4"), &c), Decimal::pi(&c));
        assert_eq!(d("1").asin(&c).unwrap(), half_pi.round_to(&c));
        assert!(d("1.5").asin(&c).is_none());
        assert_eq!(
            d("0.5").sin(&c).unwrap().to_string(),
            "0.4794255386042030002732879"
        );
    }

    #[test]
    fn test_hyperbolic() {
        let c = ctx(20);
        assert_eq!(Decimal::zero().sinh(&c).unwrap(), Decimal::zero());
        assert_eq!(Decimal::zero().cosh(&c).unwrap(), Decimal::one());
        assert_eq!(d("1").sinh(&c).unwrap().to_string(), "1.1752011936438014569");
        assert_eq!(d("1000000000000000").tanh(&c), Decimal::one());
        assert!(d("0.5").acosh(&c).is_none());
        assert!(d("1").atanh(&c).is_none());
        let x = d("0.75");
        let back = x.asinh(&c).unwrap().sinh(&c).unwrap();
        assert!(back.sub(&x, &c).abs() < d("1e-18"));
    }
    #[test]
    fn test_literal_range() {
        assert_eq!(
            Decimal::parse_literal("9e9223372036854775807"),
            Err(ParseDecimalError::OutOfRange("9e9223372036854775807".into()))
        );
        assert!(matches!(
            Decimal::parse_literal("1.5e-9223372036854775808"),
            Err(ParseDecimalError::OutOfRange(_))
        ));
        assert!(matches!(
            Decimal::parse_literal("1e99999999999999999999"),
            Err(ParseDecimalError::OutOfRange(_))
        ));
        assert!(matches!(Decimal::parse_literal("1e2x"), Err(ParseDecimalError::Invalid(_))));
        assert!(d("1e1000000000000000").in_range());
        assert!(Decimal::parse("1e1000000000000001").is_none());
    }

    #[test]
    fn test_checked_operations_stay_in_range() {
        let c = ctx(20);
        let big = d("5e900000000000000");
        assert!(big.checked_mul(&big, &c).is_none());
        assert_eq!(d("2e10").checked_mul(&d("3e5"), &c), Some(d("6e15")));
        assert!(big.div(&d("1e-900000000000000"), &c).is_none());
        assert!(d("1e1000000000000000").powi(2, &c).is_none());
        assert!(d("10").powi(999_999, &c).is_some());
    }

    #[test]
    fn test_remainder_with_wide_exponent_gap() {
        let c = ctx(20);
        assert_eq!(d("1e1000000000").rem(&d("3"), &c).unwrap(), d("1"));
        // 10^(10^9) ≡ 4 (mod 7)
        assert_eq!(d("-2e1000000000").rem(&d("7"), &c).unwrap(), d("-1"));
        assert_eq!(d("1e999999999999999").rem(&d("0.7"), &c).unwrap(), d("0.4"));
        assert_eq!(d("2.5").rem(&d("1e400000000"), &c).unwrap(), d("2.5"));
    }

    #[test]
    fn test_parity() {
        assert_eq!(d("1e1000000000").is_odd_integer(), Some(false));
        assert_eq!(d("7").is_odd_integer(), Some(true));
        assert_eq!(d("2.5").is_odd_integer(), None);
    }

    #[test]
    fn test_huge_angles_are_rejected() {
        let c = ctx(15);
        assert!(d("1e100000").sin(&c).is_none());
        assert!(d("-1e1001").cos(&c).is_none());
        assert!(d("1e100000").tan(&c).is_none());
        // 200-digit angle still reduces
        assert!(d("1e200").sin(&c).unwrap().abs() <= Decimal::one());
    }

    #[test]
    fn test_tiny_inverse_hyperbolic_arguments() {
        let c = ctx(15);
        assert_eq!(d("1e-100000").asinh(&c).unwrap(), d("1e-100000"));
        assert_eq!(d("-3e-900000000000000").atanh(&c).unwrap(), d("-3e-900000000000000"));
    }

    #[test]
    fn test_pow_with_huge_exponent() {
        let c = ctx(15);
        assert!(d("2").pow(&d("1e1000000000"), &c).is_none());
        assert_eq!(d("2").pow(&d("-1e1000000000"), &c).unwrap(), Decimal::zero());
        assert_eq!(d("1").pow(&d("1e1000000000"), &c).unwrap(), Decimal::one());
        assert_eq!(d("-1").pow(&d("1e1000000000"), &c).unwrap(), Decimal::one());
    }
}
