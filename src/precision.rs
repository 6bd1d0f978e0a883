//! Arbitrary-precision evaluator: [`Ast`] → [`Decimal`]
//!
//! Same tree walk and error taxonomy as [`crate::evaluator`], over
//! [`Decimal`]. The significant-digit count lives in the context and is
//! passed down as a [`DecimalContext`]; nothing process-wide is touched, so
//! evaluations at different precisions can run side by side.

use crate::ast::{Ast, BinaryOperator, NodeId, NodeKind, UnaryOperator};
use crate::builtins::{Builtin, Constant};
use crate::decimal::{Decimal, DecimalContext, ParseDecimalError};
use crate::error::{ErrorCode, EvalError, EvalResult, ExpressionError, ParseError};
use crate::evaluator::{self, check_arity, AngleMode, UserFunction, MAX_CALL_DEPTH, MAX_FACTORIAL};
use crate::parser::parse_with_functions;
use num_bigint::BigInt;
use std::collections::HashMap;

/// Decimal-valued counterpart of [`crate::evaluator::EvaluationContext`]
#[derive(Debug, Clone)]
pub struct PrecisionEvaluationContext {
    pub variables: HashMap<String, Decimal>,
    pub functions: HashMap<String, UserFunction>,
    pub angle_mode: AngleMode,
    /// Significant digits every result is rounded to
    pub precision: u32,
}

impl Default for PrecisionEvaluationContext {
    fn default() -> Self {
        PrecisionEvaluationContext::new(15)
    }
}

impl PrecisionEvaluationContext {
    pub fn new(precision: u32) -> Self {
        PrecisionEvaluationContext {
            variables: HashMap::new(),
            functions: HashMap::new(),
            angle_mode: AngleMode::Radians,
            precision,
        }
    }

    pub fn with_angle_mode(mut self, angle_mode: AngleMode) -> Self {
        self.angle_mode = angle_mode;
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Decimal) {
        self.variables.insert(name.into(), value);
    }

    /// Bind a double; non-finite values are skipped
    pub fn set_variable_f64(&mut self, name: impl Into<String>, value: f64) {
        if let Some(value) = Decimal::from_f64(value) {
            self.variables.insert(name.into(), value);
        }
    }

    pub fn define_function(&mut self, name: &str, params: &[&str], body: &str) -> Result<(), ParseError> {
        let names = self
            .functions
            .keys()
            .cloned()
            .chain(std::iter::once(name.to_string()));
        let body = parse_with_functions(body, names)?;
        self.functions.insert(
            name.to_string(),
            UserFunction {
                params: params.iter().map(|p| p.to_string()).collect(),
                body,
            },
        );
        Ok(())
    }

    pub fn decimal_context(&self) -> DecimalContext {
        DecimalContext::new(self.precision)
    }
}

struct Scope<'a> {
    variables: &'a HashMap<String, Decimal>,
    functions: &'a HashMap<String, UserFunction>,
    angle_mode: AngleMode,
    dc: DecimalContext,
    depth: usize,
}

/// Evaluate a parsed expression to the context's precision
pub fn evaluate_precision(ast: &Ast, ctx: &PrecisionEvaluationContext) -> EvalResult<Decimal> {
    let scope = Scope {
        variables: &ctx.variables,
        functions: &ctx.functions,
        angle_mode: ctx.angle_mode,
        dc: ctx.decimal_context(),
        depth: 0,
    };
    eval_node(ast, ast.root(), &scope)
}

pub fn evaluate_precision_str(
    expr: &str,
    ctx: &PrecisionEvaluationContext,
) -> Result<Decimal, ExpressionError> {
    let ast = parse_with_functions(expr, ctx.functions.keys())?;
    Ok(evaluate_precision(&ast, ctx)?)
}

fn eval_node(ast: &Ast, id: NodeId, scope: &Scope<'_>) -> EvalResult<Decimal> {
    let node = ast.node(id);
    let result = match &node.kind {
        NodeKind::Number { value, raw } => match Decimal::parse_literal(raw) {
            Ok(d) => Ok(d.round_to(&scope.dc)),
            Err(ParseDecimalError::OutOfRange(_)) => Err(EvalError::new(
                ErrorCode::CalcOverflow,
                format!("Number out of range: {}", raw),
            )),
            Err(ParseDecimalError::Invalid(_)) => Decimal::from_f64(*value)
                .map(|d| d.round_to(&scope.dc))
                .ok_or_else(|| EvalError::domain(format!("Invalid number: {}", raw))),
        },

        NodeKind::Constant(c) => Ok(constant(*c, &scope.dc)),

        NodeKind::Variable(name) => scope
            .variables
            .get(name)
            .map(|v| v.round_to(&scope.dc))
            .ok_or_else(|| {
                EvalError::new(
                    ErrorCode::EvalUndefinedVar,
                    format!("Undefined variable: {}", name),
                )
            }),

        NodeKind::UnaryOp { operator, operand } => {
            let value = eval_node(ast, *operand, scope)?;
            match operator {
                UnaryOperator::Plus => Ok(value),
                UnaryOperator::Minus => Ok(-value),
                UnaryOperator::Factorial => factorial(&value, &scope.dc),
            }
        }

        NodeKind::BinaryOp {
            operator,
            left,
            right,
        } => {
            let l = eval_node(ast, *left, scope)?;
            let r = eval_node(ast, *right, scope)?;
            apply_binary(*operator, &l, &r, &scope.dc)
        }

        NodeKind::FunctionCall { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval_node(ast, *arg, scope))
                .collect::<EvalResult<Vec<Decimal>>>()?;
            call_function(name, &values, scope)
        }

        NodeKind::Matrix { .. } => Err(EvalError::new(
            ErrorCode::EvalNotImplemented,
            "Matrix evaluation is not implemented",
        )),

        NodeKind::Complex { .. } => Err(EvalError::new(
            ErrorCode::EvalNotImplemented,
            "Complex evaluation is not implemented",
        )),
    };
    result.and_then(within_range).map_err(|e| e.at(node.position))
}

/// Every intermediate value keeps its exponent inside the decimal range
fn within_range(value: Decimal) -> EvalResult<Decimal> {
    if value.in_range() {
        Ok(value)
    } else {
        Err(overflow())
    }
}

/// Constant value at the requested precision
pub fn constant(c: Constant, dc: &DecimalContext) -> Decimal {
    match c {
        Constant::Pi => Decimal::pi(dc),
        Constant::Tau => Decimal::pi(&dc.with_guard(2)).mul(&Decimal::from_i64(2), dc),
        Constant::E => Decimal::one().exp(dc).unwrap_or_else(Decimal::one),
        Constant::Phi => {
            let wp = dc.with_guard(5);
            let root5 = Decimal::from_i64(5).sqrt(&wp).unwrap_or_else(Decimal::zero);
            let half = Decimal::from_i64(1).add(&root5, &wp);
            half.div(&Decimal::from_i64(2), dc).unwrap_or(half)
        }
    }
}

fn apply_binary(operator: BinaryOperator, l: &Decimal, r: &Decimal, dc: &DecimalContext) -> EvalResult<Decimal> {
    match operator {
        BinaryOperator::Add => Ok(l.add(r, dc)),
        BinaryOperator::Sub => Ok(l.sub(r, dc)),
        BinaryOperator::Mul => l.checked_mul(r, dc).ok_or_else(overflow),
        BinaryOperator::Div if r.is_zero() => Err(EvalError::div_zero("Division by zero")),
        BinaryOperator::Div => l.div(r, dc).ok_or_else(overflow),
        BinaryOperator::Mod => l
            .rem(r, dc)
            .ok_or_else(|| EvalError::div_zero("Modulo by zero")),
        BinaryOperator::Pow => power(l, r, dc),
    }
}

fn power(base: &Decimal, exponent: &Decimal, dc: &DecimalContext) -> EvalResult<Decimal> {
    base.pow(exponent, dc).ok_or_else(|| {
        if base.is_zero() && exponent.is_negative() {
            EvalError::div_zero("Zero raised to a negative power")
        } else if base.is_negative() && !exponent.is_integer() {
            EvalError::domain("Negative base with fractional exponent")
        } else {
            EvalError::new(ErrorCode::CalcOverflow, "Power result too large")
        }
    })
}

fn call_function(name: &str, args: &[Decimal], scope: &Scope<'_>) -> EvalResult<Decimal> {
    if let Some(builtin) = Builtin::from_name(name) {
        return call_builtin(builtin, args, scope.angle_mode, &scope.dc);
    }

    let function = scope.functions.get(name).ok_or_else(|| {
        EvalError::new(
            ErrorCode::ParseUnknownFunction,
            format!("Unknown function: {}", name),
        )
    })?;

    if scope.depth >= MAX_CALL_DEPTH {
        return Err(EvalError::new(
            ErrorCode::CalcOverflow,
            format!("Maximum call depth exceeded in {}", name),
        ));
    }

    let mut variables = scope.variables.clone();
    for (i, param) in function.params.iter().enumerate() {
        let value = args.get(i).cloned().unwrap_or_else(Decimal::zero);
        variables.insert(param.clone(), value);
    }
    let inner = Scope {
        variables: &variables,
        functions: scope.functions,
        angle_mode: scope.angle_mode,
        dc: scope.dc,
        depth: scope.depth + 1,
    };
    eval_node(&function.body, function.body.root(), &inner)
}

/// Apply a built-in to decimal arguments
pub fn call_builtin(
    builtin: Builtin,
    args: &[Decimal],
    angle_mode: AngleMode,
    dc: &DecimalContext,
) -> EvalResult<Decimal> {
    check_arity(builtin, args.len())?;
    let wp = dc.with_guard(10);

    let x = if builtin.is_angle_input() && angle_mode == AngleMode::Degrees {
        degrees_to_radians(&args[0], &wp)
    } else {
        args[0].clone()
    };

    let value = match builtin {
        Builtin::Sin => x.sin(dc).ok_or_else(|| angle_too_large(builtin))?,
        Builtin::Cos => x.cos(dc).ok_or_else(|| angle_too_large(builtin))?,
        Builtin::Tan => x.tan(dc).ok_or_else(|| {
            if x.sin(dc).is_none() {
                angle_too_large(builtin)
            } else {
                EvalError::domain("Tangent undefined at this angle")
            }
        })?,
        Builtin::Asin | Builtin::Acos | Builtin::Atan => {
            let radians = match builtin {
                Builtin::Asin => x.asin(&wp),
                Builtin::Acos => x.acos(&wp),
                _ => Some(x.atan(&wp)),
            }
            .ok_or_else(|| EvalError::domain(format!("{} argument out of range", builtin.name())))?;
            match angle_mode {
                AngleMode::Degrees => radians_to_degrees(&radians, &wp).round_to(dc),
                AngleMode::Radians => radians.round_to(dc),
            }
        }

        Builtin::Sinh => x.sinh(dc).ok_or_else(overflow)?,
        Builtin::Cosh => x.cosh(dc).ok_or_else(overflow)?,
        Builtin::Tanh => x.tanh(dc),
        Builtin::Asinh => x
            .asinh(dc)
            .ok_or_else(|| EvalError::domain("asinh argument out of range"))?,
        Builtin::Acosh => x
            .acosh(dc)
            .ok_or_else(|| EvalError::domain("acosh requires an argument of at least 1"))?,
        Builtin::Atanh => x
            .atanh(dc)
            .ok_or_else(|| EvalError::domain("atanh requires an argument between -1 and 1"))?,

        Builtin::Exp => x.exp(dc).ok_or_else(overflow)?,
        Builtin::Ln | Builtin::Log | Builtin::Log10 | Builtin::Log2 => {
            let result = match builtin {
                Builtin::Ln => x.ln(dc),
                Builtin::Log2 => x.log2(dc),
                _ => x.log10(dc),
            };
            result.ok_or_else(|| {
                EvalError::domain(format!("{} requires a positive argument", builtin.name()))
            })?
        }

        Builtin::Sqrt => x
            .sqrt(dc)
            .ok_or_else(|| EvalError::domain("Square root of negative number"))?,
        Builtin::Cbrt => x.cbrt(dc),
        Builtin::Pow => power(&x, &args[1], dc)?,
        Builtin::Root => nth_root(&x, &args[1], dc)?,

        Builtin::Abs => x.abs(),
        Builtin::Floor => x.floor(),
        Builtin::Ceil => x.ceil(),
        Builtin::Round => x.round_half_ceil(),
        Builtin::Min => args.iter().min().cloned().unwrap_or(x),
        Builtin::Max => args.iter().max().cloned().unwrap_or(x),
        Builtin::Factorial => factorial(&x, dc)?,
        Builtin::Gamma => gamma(&x, dc)?,
    };
    Ok(value)
}

fn overflow() -> EvalError {
    EvalError::new(ErrorCode::CalcOverflow, "Result too large")
}

fn angle_too_large(builtin: Builtin) -> EvalError {
    EvalError::domain(format!("{} argument too large", builtin.name()))
}

fn degrees_to_radians(x: &Decimal, wp: &DecimalContext) -> Decimal {
    let per_degree = Decimal::pi(wp)
        .div(&Decimal::from_i64(180), wp)
        .unwrap_or_else(Decimal::zero);
    x.mul(&per_degree, wp)
}

fn radians_to_degrees(x: &Decimal, wp: &DecimalContext) -> Decimal {
    x.mul(&Decimal::from_i64(180), wp)
        .div(&Decimal::pi(wp), wp)
        .unwrap_or_else(Decimal::zero)
}

fn nth_root(x: &Decimal, n: &Decimal, dc: &DecimalContext) -> EvalResult<Decimal> {
    if n.is_zero() {
        return Err(EvalError::domain("Root index cannot be zero"));
    }
    if x.is_negative() {
        if n.is_odd_integer() == Some(false) {
            return Err(EvalError::domain("Even root of negative number"));
        }
        return Ok(-nth_root(&x.abs(), n, dc)?);
    }

    match n.to_i64() {
        Some(2) => x
            .sqrt(dc)
            .ok_or_else(|| EvalError::domain("Square root of negative number")),
        Some(3) => Ok(x.cbrt(dc)),
        _ => {
            let wp = dc.with_guard(10);
            let inverse = Decimal::one().div(n, &wp).ok_or_else(overflow)?;
            power(x, &inverse, dc)
        }
    }
}

/// Exact n! rounded to the context; same limits as the double version
pub fn factorial(n: &Decimal, dc: &DecimalContext) -> EvalResult<Decimal> {
    if n.is_negative() {
        return Err(EvalError::new(
            ErrorCode::CalcFactorialNeg,
            "Factorial of negative number",
        ));
    }
    let whole = match n.to_i64() {
        Some(v) if n.is_integer() => v,
        _ if !n.is_integer() => {
            return Err(EvalError::domain("Factorial requires a non-negative integer"));
        }
        _ => i64::MAX,
    };
    if whole as f64 > MAX_FACTORIAL {
        return Err(EvalError::new(
            ErrorCode::CalcOverflow,
            "Factorial result too large",
        ));
    }
    let product = (2..=whole).fold(BigInt::from(1u8), |acc, k| acc * BigInt::from(k));
    Ok(Decimal::from_bigint(product).round_to(dc))
}

/// Gamma through the double-precision Lanczos approximation
///
/// Only about 15 digits are meaningful regardless of the context.
fn gamma(x: &Decimal, dc: &DecimalContext) -> EvalResult<Decimal> {
    let value = evaluator::gamma(x.to_f64())?;
    Decimal::from_f64(value)
        .map(|d| d.round_to(dc))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn eval(expr: &str, precision: u32) -> String {
        let ctx = PrecisionEvaluationContext::new(precision);
        evaluate_precision_str(expr, &ctx).unwrap().to_significant_string(precision)
    }

    fn code(expr: &str) -> ErrorCode {
        evaluate_precision_str(expr, &PrecisionEvaluationContext::new(20))
            .unwrap_err()
            .code()
            .expect("expected an evaluation error")
    }

    #[test]
    fn test_one_third() {
        assert_eq!(eval("1/3", 30), "0.333333333333333333333333333333");
    }

    #[test]
    fn test_exact_decimal_arithmetic() {
        assert_eq!(eval("0.1 + 0.2", 15), "0.3");
        assert_eq!(eval("2+3*4", 15), "14");
        assert_eq!(eval("-2^2", 15), "4");
        assert_eq!(eval("-7 % 3", 15), "-1");
        assert_eq!(eval("2^-2", 15), "0.25");
    }

    #[test]
    fn test_high_precision_functions() {
        assert_eq!(
            eval("sqrt(2)", 40),
            "1.414213562373095048801688724209698078570"
                .trim_end_matches('0')
        );
        assert_eq!(eval("pi", 30), "3.14159265358979323846264338328");
        assert_eq!(eval("e", 20), "2.7182818284590452354");
        assert_eq!(eval("log(1000)", 20), "3");
        assert_eq!(eval("root(-27, 3)", 20), "-3");
        assert_eq!(eval("phi^2 - phi", 20), "1");
    }

    #[test]
    fn test_angle_mode() {
        let ctx = PrecisionEvaluationContext::new(20).with_angle_mode(AngleMode::Degrees);
        assert_eq!(evaluate_precision_str("sin(90)", &ctx).unwrap(), Decimal::one());
        assert_eq!(
            evaluate_precision_str("asin(1)", &ctx).unwrap(),
            Decimal::from_i64(90)
        );
        let radians = PrecisionEvaluationContext::new(20);
        let near_zero = evaluate_precision_str("sin(pi)", &radians).unwrap();
        assert!(near_zero.abs() < Decimal::parse("1e-18").unwrap());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(code("1/0"), ErrorCode::CalcDivZero);
        assert_eq!(code("1%0"), ErrorCode::CalcDivZero);
        assert_eq!(code("sqrt(-1)"), ErrorCode::CalcDomain);
        assert_eq!(code("ln(0)"), ErrorCode::CalcDomain);
        assert_eq!(code("asin(2)"), ErrorCode::CalcDomain);
        assert_eq!(code("(-8)^0.5"), ErrorCode::CalcDomain);
        assert_eq!(code("root(-16, 4)"), ErrorCode::CalcDomain);
        assert_eq!(code("factorial(-3)"), ErrorCode::CalcFactorialNeg);
        assert_eq!(code("factorial(1.5)"), ErrorCode::CalcDomain);
        assert_eq!(code("171!"), ErrorCode::CalcOverflow);
        assert_eq!(code("y * 2"), ErrorCode::EvalUndefinedVar);
        assert_eq!(code("max()"), ErrorCode::CalcDomain);
    }

    #[test]
    fn test_factorial_is_exact() {
        assert_eq!(eval("25!", 30), "1.5511210043330985984e+25");
        assert_eq!(eval("factorial(5)", 10), "120");
    }

    #[test]
    fn test_gamma_uses_double_precision() {
        let result = evaluate_precision_str("gamma(5)", &PrecisionEvaluationContext::new(30)).unwrap();
        assert!((result.to_f64() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_variables_and_functions() {
        let mut ctx = PrecisionEvaluationContext::new(25);
        ctx.set_variable("x", "0.1".parse().unwrap());
        ctx.set_variable_f64("y", 2.5);
        ctx.define_function("f", &["a"], "a * x").unwrap();
        assert_eq!(evaluate_precision_str("f(3) + y", &ctx).unwrap().to_string(), "2.8");
        assert_eq!(ctx.variables["x"].to_string(), "0.1");
    }

    #[test]
    fn test_min_max_round() {
        assert_eq!(eval("max(1, 7.5, 3)", 10), "7.5");
        assert_eq!(eval("min(4, -2)", 10), "-2");
        assert_eq!(eval("round(-2.5)", 10), "-2");
        assert_eq!(eval("floor(-1.5) + ceil(1.2)", 10), "0");
    }

    #[test]
    fn test_independent_precisions_across_threads() {
        let handles: Vec<_> = [10u32, 40]
            .into_iter()
            .map(|p| thread::spawn(move || (p, eval("1/3", p))))
            .collect();
        for handle in handles {
            let (p, text) = handle.join().unwrap();
            assert_eq!(text.len(), p as usize + 2);
        }
    }

    #[test]
    fn test_extreme_exponents_fail_cleanly() {
        assert_eq!(
            code("1e5000000000000000000 * 1e5000000000000000000"),
            ErrorCode::CalcOverflow
        );
        assert_eq!(code("9e9223372036854775807"), ErrorCode::CalcOverflow);
        assert_eq!(code("1.5e-9223372036854775808"), ErrorCode::CalcOverflow);
        assert_eq!(code("5e900000000000000 * 5e900000000000000"), ErrorCode::CalcOverflow);
        assert_eq!(code("1e-900000000000000 / 1e900000000000000"), ErrorCode::CalcOverflow);
        assert_eq!(code("(1e900000000000000)^2"), ErrorCode::CalcOverflow);
        assert_eq!(code("sin(1e100000)"), ErrorCode::CalcDomain);
        assert_eq!(code("tan(1e100000)"), ErrorCode::CalcDomain);
        assert_eq!(code("root(-8, 1e1000000000)"), ErrorCode::CalcDomain);
    }

    #[test]
    fn test_wide_exponent_gaps_stay_exact() {
        assert_eq!(eval("1e1000000000 % 3", 20), "1");
        assert_eq!(eval("root(8, 1e1000000000)", 20), "1");
        assert_eq!(eval("1e900000000000000 / 1e900000000000000", 20), "1");
    }
}
