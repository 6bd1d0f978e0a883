//! Fixed-precision evaluator: [`Ast`] → `f64`
//!
//! Plain tree recursion. Built-ins dispatch through [`Builtin`]; names that
//! are not built-in fall through to the context's user-defined functions.
//! Every failure is an [`EvalError`] carrying an [`ErrorCode`] and the span
//! of the node that failed.

use crate::ast::{Ast, BinaryOperator, NodeId, NodeKind, UnaryOperator};
use crate::builtins::{Arity, Builtin};
use crate::error::{ErrorCode, EvalError, EvalResult, ExpressionError, ParseError};
use crate::parser::parse_with_functions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Nested user-function calls allowed before giving up
pub const MAX_CALL_DEPTH: usize = 256;

/// Largest n for which n! fits in a double
pub const MAX_FACTORIAL: f64 = 170.0;

/// How trig functions read and produce angles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleMode {
    Degrees,
    #[default]
    Radians,
}

/// A user-defined function: positional parameters and a parsed body
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunction {
    pub params: Vec<String>,
    pub body: Ast,
}

/// Variables, user functions and modes for one evaluation
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub variables: HashMap<String, f64>,
    pub functions: HashMap<String, UserFunction>,
    pub angle_mode: AngleMode,
    /// Significant digits for display; does not affect computation
    pub precision: u32,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        EvaluationContext {
            variables: HashMap::new(),
            functions: HashMap::new(),
            angle_mode: AngleMode::Radians,
            precision: 15,
        }
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        EvaluationContext::default()
    }

    pub fn with_angle_mode(mut self, angle_mode: AngleMode) -> Self {
        self.angle_mode = angle_mode;
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: f64) {
        self.variables.insert(name.into(), value);
    }

    /// Define `name(params...) = body`
    ///
    /// The body may call previously defined functions and `name` itself.
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

    /// Names to treat as callable when parsing against this context
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// Borrowed view of a context; function calls swap in their own variables
struct Scope<'a> {
    variables: &'a HashMap<String, f64>,
    functions: &'a HashMap<String, UserFunction>,
    angle_mode: AngleMode,
    depth: usize,
}

/// Evaluate a parsed expression
pub fn evaluate(ast: &Ast, ctx: &EvaluationContext) -> EvalResult<f64> {
    let scope = Scope {
        variables: &ctx.variables,
        functions: &ctx.functions,
        angle_mode: ctx.angle_mode,
        depth: 0,
    };
    eval_node(ast, ast.root(), &scope)
}

/// Parse and evaluate in one step, with the context's functions callable
pub fn evaluate_str(expr: &str, ctx: &EvaluationContext) -> Result<f64, ExpressionError> {
    let ast = parse_with_functions(expr, ctx.function_names())?;
    Ok(evaluate(&ast, ctx)?)
}

fn eval_node(ast: &Ast, id: NodeId, scope: &Scope<'_>) -> EvalResult<f64> {
    let node = ast.node(id);
    let result = match &node.kind {
        NodeKind::Number { value, .. } => Ok(*value),

        NodeKind::Constant(c) => Ok(c.value()),

        NodeKind::Variable(name) => scope.variables.get(name).copied().ok_or_else(|| {
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
                UnaryOperator::Factorial => factorial(value),
            }
        }

        NodeKind::BinaryOp {
            operator,
            left,
            right,
        } => {
            let l = eval_node(ast, *left, scope)?;
            let r = eval_node(ast, *right, scope)?;
            apply_binary(*operator, l, r)
        }

        NodeKind::FunctionCall { name, args } => {
            let values = args
                .iter()
                .map(|arg| eval_node(ast, *arg, scope))
                .collect::<EvalResult<Vec<f64>>>()?;
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
    result.map_err(|e| e.at(node.position))
}

fn apply_binary(operator: BinaryOperator, l: f64, r: f64) -> EvalResult<f64> {
    match operator {
        BinaryOperator::Add => Ok(l + r),
        BinaryOperator::Sub => Ok(l - r),
        BinaryOperator::Mul => Ok(l * r),
        BinaryOperator::Div => {
            if r == 0.0 {
                return Err(EvalError::div_zero("Division by zero"));
            }
            Ok(l / r)
        }
        BinaryOperator::Mod => {
            if r == 0.0 {
                return Err(EvalError::div_zero("Modulo by zero"));
            }
            // Sign follows the dividend
            Ok(l % r)
        }
        BinaryOperator::Pow => Ok(l.powf(r)),
    }
}

fn call_function(name: &str, args: &[f64], scope: &Scope<'_>) -> EvalResult<f64> {
    if let Some(builtin) = Builtin::from_name(name) {
        return call_builtin(builtin, args, scope.angle_mode);
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

    // Fresh variables: caller's copy plus positional parameters (missing → 0)
    let mut variables = scope.variables.clone();
    for (i, param) in function.params.iter().enumerate() {
        variables.insert(param.clone(), args.get(i).copied().unwrap_or(0.0));
    }
    let inner = Scope {
        variables: &variables,
        functions: scope.functions,
        angle_mode: scope.angle_mode,
        depth: scope.depth + 1,
    };
    eval_node(&function.body, function.body.root(), &inner)
}

/// Reject a call whose argument count does not fit the built-in
pub(crate) fn check_arity(builtin: Builtin, count: usize) -> EvalResult<()> {
    match builtin.arity() {
        Arity::Exact(n) if n != count => Err(EvalError::domain(format!(
            "{} expects {} argument{}, got {}",
            builtin.name(),
            n,
            if n == 1 { "" } else { "s" },
            count
        ))),
        Arity::Variadic if count == 0 => Err(EvalError::domain(format!(
            "{} expects at least one argument",
            builtin.name()
        ))),
        _ => Ok(()),
    }
}

/// Apply a built-in to already evaluated arguments
pub fn call_builtin(builtin: Builtin, args: &[f64], angle_mode: AngleMode) -> EvalResult<f64> {
    check_arity(builtin, args.len())?;
    let x = args[0];

    let to_radians = |v: f64| match angle_mode {
        AngleMode::Degrees => v * PI / 180.0,
        AngleMode::Radians => v,
    };
    let from_radians = |v: f64| match angle_mode {
        AngleMode::Degrees => v * 180.0 / PI,
        AngleMode::Radians => v,
    };

    match builtin {
        Builtin::Sin => Ok(to_radians(x).sin()),
        Builtin::Cos => Ok(to_radians(x).cos()),
        Builtin::Tan => Ok(to_radians(x).tan()),
        Builtin::Asin => Ok(from_radians(x.asin())),
        Builtin::Acos => Ok(from_radians(x.acos())),
        Builtin::Atan => Ok(from_radians(x.atan())),

        Builtin::Sinh => Ok(x.sinh()),
        Builtin::Cosh => Ok(x.cosh()),
        Builtin::Tanh => Ok(x.tanh()),
        Builtin::Asinh => Ok(x.asinh()),
        Builtin::Acosh => Ok(x.acosh()),
        Builtin::Atanh => Ok(x.atanh()),

        Builtin::Exp => Ok(x.exp()),
        Builtin::Ln | Builtin::Log | Builtin::Log10 | Builtin::Log2 => {
            if x <= 0.0 {
                return Err(EvalError::domain(format!(
                    "{} requires a positive argument",
                    builtin.name()
                )));
            }
            Ok(match builtin {
                Builtin::Ln => x.ln(),
                Builtin::Log2 => x.log2(),
                _ => x.log10(),
            })
        }

        Builtin::Sqrt => {
            if x < 0.0 {
                return Err(EvalError::domain("Square root of negative number"));
            }
            Ok(x.sqrt())
        }
        Builtin::Cbrt => Ok(x.cbrt()),
        Builtin::Pow => Ok(x.powf(args[1])),
        Builtin::Root => nth_root(x, args[1]),

        Builtin::Abs => Ok(x.abs()),
        Builtin::Floor => Ok(x.floor()),
        Builtin::Ceil => Ok(x.ceil()),
        Builtin::Round => Ok(round_half_up(x)),
        Builtin::Min => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        Builtin::Max => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Builtin::Factorial => factorial(x),
        Builtin::Gamma => gamma(x),
    }
}

/// Nearest integer, halves toward +infinity
fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

fn nth_root(x: f64, n: f64) -> EvalResult<f64> {
    if n == 0.0 {
        return Err(EvalError::domain("Root index cannot be zero"));
    }
    if x < 0.0 {
        if n % 2.0 == 0.0 {
            return Err(EvalError::domain("Even root of negative number"));
        }
        return Ok(-(-x).powf(1.0 / n));
    }
    Ok(x.powf(1.0 / n))
}

/// n! for non-negative integers up to [`MAX_FACTORIAL`]
pub fn factorial(n: f64) -> EvalResult<f64> {
    if n < 0.0 {
        return Err(EvalError::new(
            ErrorCode::CalcFactorialNeg,
            "Factorial of negative number",
        ));
    }
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(EvalError::domain("Factorial requires a non-negative integer"));
    }
    if n > MAX_FACTORIAL {
        return Err(EvalError::new(
            ErrorCode::CalcOverflow,
            "Factorial result too large",
        ));
    }
    Ok((2..=n as u32).fold(1.0, |acc, k| acc * k as f64))
}

/// Lanczos coefficients, g = 7
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFICIENTS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function; undefined at zero and negative integers
pub fn gamma(x: f64) -> EvalResult<f64> {
    if x <= 0.0 && x.fract() == 0.0 {
        return Err(EvalError::domain(
            "Gamma function undefined for non-positive integers",
        ));
    }
    Ok(lanczos_gamma(x))
}

/// Lanczos approximation with the reflection formula below 0.5
pub fn lanczos_gamma(x: f64) -> f64 {
    if x < 0.5 {
        return PI / ((PI * x).sin() * lanczos_gamma(1.0 - x));
    }
    let x = x - 1.0;
    let t = x + LANCZOS_G + 0.5;
    let series = LANCZOS_COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(LANCZOS_COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));
    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn eval(expr: &str) -> f64 {
        evaluate_str(expr, &EvaluationContext::new()).unwrap()
    }

    fn eval_in(expr: &str, mode: AngleMode) -> f64 {
        evaluate_str(expr, &EvaluationContext::new().with_angle_mode(mode)).unwrap()
    }

    fn code(expr: &str) -> ErrorCode {
        evaluate_str(expr, &EvaluationContext::new())
            .unwrap_err()
            .code()
            .expect("expected an evaluation error")
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2+3*4"), 14.0);
        assert_eq!(eval("(2+3)*4"), 20.0);
        assert_eq!(eval("2*3^2"), 18.0);
        assert_eq!(eval("2^3^2"), 512.0);
        assert_eq!(eval("10-4-3"), 3.0);
    }

    #[test]
    fn test_negative_base_power() {
        assert_eq!(eval("-2^2"), 4.0);
        assert_eq!(eval("-(2^2)"), -4.0);
    }

    #[test]
    fn test_division_and_modulo_by_zero() {
        assert_eq!(code("5/0"), ErrorCode::CalcDivZero);
        assert_eq!(code("5%0"), ErrorCode::CalcDivZero);
        assert_eq!(eval("-7%3"), -1.0);
    }

    #[test]
    fn test_angle_modes() {
        assert!(approx(eval_in("sin(90)", AngleMode::Degrees), 1.0));
        assert!(approx(eval_in("sin(pi/2)", AngleMode::Radians), 1.0));
        assert!(approx(eval_in("asin(1)", AngleMode::Degrees), 90.0));
        assert!(approx(eval_in("atan(1)", AngleMode::Radians), PI / 4.0));
        // Hyperbolic functions ignore the angle mode
        assert!(approx(eval_in("sinh(1)", AngleMode::Degrees), 1f64.sinh()));
    }

    #[test]
    fn test_constants() {
        assert!((eval("pi") - 3.141592653589793).abs() < 1e-14);
        assert!((eval("e") - 2.718281828459045).abs() < 1e-14);
        assert!(approx(eval("tau"), 2.0 * PI));
        assert!(approx(eval("phi^2 - phi"), 1.0));
    }

    #[test]
    fn test_domain_errors() {
        assert_eq!(code("sqrt(-1)"), ErrorCode::CalcDomain);
        assert_eq!(code("ln(0)"), ErrorCode::CalcDomain);
        assert_eq!(code("ln(-1)"), ErrorCode::CalcDomain);
        assert_eq!(code("log2(0)"), ErrorCode::CalcDomain);
        assert_eq!(code("root(-8, 2)"), ErrorCode::CalcDomain);
        assert_eq!(code("root(8, 0)"), ErrorCode::CalcDomain);
        assert_eq!(code("gamma(-2)"), ErrorCode::CalcDomain);
        assert_eq!(code("sqrt(1, 2)"), ErrorCode::CalcDomain);
    }

    #[test]
    fn test_factorial() {
        assert_eq!(eval("factorial(5)"), 120.0);
        assert_eq!(eval("5!"), 120.0);
        assert_eq!(eval("0!"), 1.0);
        assert_eq!(code("factorial(-1)"), ErrorCode::CalcFactorialNeg);
        assert_eq!(code("factorial(2.5)"), ErrorCode::CalcDomain);
        assert_eq!(code("factorial(171)"), ErrorCode::CalcOverflow);
        assert!(eval("factorial(170)").is_finite());
    }

    #[test]
    fn test_misc_builtins() {
        assert!(approx(eval("root(-27, 3)"), -3.0));
        assert!(approx(eval("root(16, 4)"), 2.0));
        assert_eq!(eval("cbrt(27)"), 3.0);
        assert_eq!(eval("pow(2, 10)"), 1024.0);
        assert_eq!(eval("max(1, 7, 3)"), 7.0);
        assert_eq!(eval("min(4, -2)"), -2.0);
        assert_eq!(eval("round(2.5)"), 3.0);
        assert_eq!(eval("round(-2.5)"), -2.0);
        assert_eq!(eval("round(0.49999999999999994)"), 0.0);
        assert_eq!(eval("round(-0.5)"), 0.0);
        assert_eq!(eval("round(4503599627370497)"), 4503599627370497.0);
        assert_eq!(eval("floor(-1.5) + ceil(1.2)"), 0.0);
        assert!(approx(eval("log(1000)"), 3.0));
        assert!(approx(eval("log2(8)"), 3.0));
        assert!(approx(eval("exp(ln(5))"), 5.0));
    }

    #[test]
    fn test_gamma() {
        assert!(approx(eval("gamma(5)"), 24.0));
        assert!(approx(eval("gamma(0.5)"), PI.sqrt()));
        assert!(approx(eval("gamma(-0.5)"), -2.0 * PI.sqrt()));
    }

    #[test]
    fn test_variables() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("x", 3.0);
        assert_eq!(evaluate_str("2x + 1", &ctx).unwrap(), 7.0);

        let err = evaluate_str("y + 1", &ctx).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EvalUndefinedVar));
        match err {
            ExpressionError::Eval(e) => assert_eq!(e.position, Some(crate::ast::Position::new(0, 1))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_user_functions_isolate_caller_state() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("x", 100.0);
        ctx.set_variable("k", 2.0);
        ctx.define_function("f", &["x", "y"], "x * k + y").unwrap();

        assert_eq!(evaluate_str("f(3, 1)", &ctx).unwrap(), 7.0);
        // Missing trailing argument defaults to 0
        assert_eq!(evaluate_str("f(3)", &ctx).unwrap(), 6.0);
        // Caller's x untouched
        assert_eq!(evaluate_str("x", &ctx).unwrap(), 100.0);
        assert_eq!(ctx.variables["x"], 100.0);
    }

    #[test]
    fn test_recursion_is_bounded() {
        let mut ctx = EvaluationContext::new();
        ctx.define_function("loop", &["n"], "loop(n + 1)").unwrap();
        let err = evaluate_str("loop(0)", &ctx).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::CalcOverflow));
    }

    #[test]
    fn test_unknown_function() {
        let ast = parse_with_functions("g(1)", ["g"]).unwrap();
        let err = evaluate(&ast, &EvaluationContext::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseUnknownFunction);
    }

    #[test]
    fn test_matrix_nodes_are_not_implemented() {
        use crate::ast::{AstBuilder, Position};
        let mut b = AstBuilder::new();
        let one = b.number(1.0, "1", Position::new(1, 2));
        let root = b.push(NodeKind::Matrix { rows: vec![vec![one]] }, Position::new(0, 3));
        let ast = b.finish(root);
        let err = evaluate(&ast, &EvaluationContext::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::EvalNotImplemented);
    }

    #[test]
    fn test_evaluate_parsed_ast() {
        let ast = parse("sqrt(16) + 2").unwrap();
        assert_eq!(evaluate(&ast, &EvaluationContext::new()).unwrap(), 6.0);
    }
}
