//! Result formatting to a number of significant digits
//!
//! Both evaluators share the same textual form: trailing zeros dropped,
//! plain notation for decimal exponents in `(-7, 21)`, exponential
//! notation (`1.5e+25`) outside it.

/// Largest exponent still written in plain notation
const PLAIN_EXP_MAX: i64 = 20;
/// Smallest exponent still written in plain notation
const PLAIN_EXP_MIN: i64 = -6;

/// Format a double to `precision` significant digits
pub fn format_f64(value: f64, precision: u32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let precision = precision.clamp(1, 100) as usize;
    // `{:e}` gives "d.ddddde-x"; split it into digits and exponent
    let sci = format!("{:.*e}", precision - 1, value.abs());
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i64 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();

    render_digits(value < 0.0, &digits, exponent)
}

/// Render `d1.d2d3... × 10^exponent` from its digit string
///
/// `digits` must start with a non-zero digit; trailing zeros are dropped.
pub fn render_digits(negative: bool, digits: &str, exponent: i64) -> String {
    let digits = digits.trim_end_matches('0');
    if digits.is_empty() {
        return "0".to_string();
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }

    if !(PLAIN_EXP_MIN..=PLAIN_EXP_MAX).contains(&exponent) {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if exponent >= 0 { '+' } else { '-' });
        out.push_str(&exponent.abs().to_string());
        return out;
    }

    if exponent < 0 {
        out.push_str("0.");
        for _ in 0..(-exponent - 1) {
            out.push('0');
        }
        out.push_str(digits);
        return out;
    }

    let int_len = exponent as usize + 1;
    if digits.len() <= int_len {
        out.push_str(digits);
        for _ in digits.len()..int_len {
            out.push('0');
        }
    } else {
        out.push_str(&digits[..int_len]);
        out.push('.');
        out.push_str(&digits[int_len..]);
    }
    out
}
