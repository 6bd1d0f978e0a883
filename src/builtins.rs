//! Built-in function and constant registry
//!
//! The tokenizer classifies identifiers against these tables, and both
//! evaluators dispatch on [`Builtin`]. Lookup is by lowercase name; the enum
//! keeps the set closed so every evaluator match is exhaustive.

use serde::{Deserialize, Serialize};

/// Built-in functions known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    // Trigonometric (angle-mode aware)
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,

    // Hyperbolic (radians only)
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,

    // Exponential / logarithmic
    Exp,
    Ln,
    Log,
    Log10,
    Log2,

    // Powers and roots
    Sqrt,
    Cbrt,
    Pow,
    Root,

    // Misc
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Factorial,
    Gamma,
}

/// Every built-in, in registry order
pub const ALL_BUILTINS: [Builtin; 29] = [
    Builtin::Sin,
    Builtin::Cos,
    Builtin::Tan,
    Builtin::Asin,
    Builtin::Acos,
    Builtin::Atan,
    Builtin::Sinh,
    Builtin::Cosh,
    Builtin::Tanh,
    Builtin::Asinh,
    Builtin::Acosh,
    Builtin::Atanh,
    Builtin::Exp,
    Builtin::Ln,
    Builtin::Log,
    Builtin::Log10,
    Builtin::Log2,
    Builtin::Sqrt,
    Builtin::Cbrt,
    Builtin::Pow,
    Builtin::Root,
    Builtin::Abs,
    Builtin::Floor,
    Builtin::Ceil,
    Builtin::Round,
    Builtin::Min,
    Builtin::Max,
    Builtin::Factorial,
    Builtin::Gamma,
];

/// How many arguments a built-in takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// At least one argument
    Variadic,
}

impl Builtin {
    /// Look up a built-in by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Builtin> {
        let lower = name.to_ascii_lowercase();
        ALL_BUILTINS.iter().copied().find(|b| b.name() == lower)
    }

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Sinh => "sinh",
            Builtin::Cosh => "cosh",
            Builtin::Tanh => "tanh",
            Builtin::Asinh => "asinh",
            Builtin::Acosh => "acosh",
            Builtin::Atanh => "atanh",
            Builtin::Exp => "exp",
            Builtin::Ln => "ln",
            Builtin::Log => "log",
            Builtin::Log10 => "log10",
            Builtin::Log2 => "log2",
            Builtin::Sqrt => "sqrt",
            Builtin::Cbrt => "cbrt",
            Builtin::Pow => "pow",
            Builtin::Root => "root",
            Builtin::Abs => "abs",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Factorial => "factorial",
            Builtin::Gamma => "gamma",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Builtin::Pow | Builtin::Root => Arity::Exact(2),
            Builtin::Min | Builtin::Max => Arity::Variadic,
            _ => Arity::Exact(1),
        }
    }

    /// Trig functions convert degrees at their own boundary
    pub fn is_angle_input(&self) -> bool {
        matches!(self, Builtin::Sin | Builtin::Cos | Builtin::Tan)
    }
}

/// Named mathematical constants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constant {
    Pi,
    E,
    Phi,
    Tau,
}

impl Constant {
    /// Look up a constant by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Constant> {
        match name.to_ascii_lowercase().as_str() {
            "pi" => Some(Constant::Pi),
            "e" => Some(Constant::E),
            "phi" => Some(Constant::Phi),
            "tau" => Some(Constant::Tau),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Constant::Pi => "pi",
            Constant::E => "e",
            Constant::Phi => "phi",
            Constant::Tau => "tau",
        }
    }

    /// Double-precision value
    pub fn value(&self) -> f64 {
        match self {
            Constant::Pi => std::f64::consts::PI,
            Constant::E => std::f64::consts::E,
            // (1 + sqrt(5)) / 2
            Constant::Phi => 1.618_033_988_749_895,
            Constant::Tau => std::f64::consts::TAU,
        }
    }
}
