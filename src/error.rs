//! Error types for parsing, evaluation and the worker protocol
//!
//! Parsing fails with a plain message. Evaluation failures carry a
//! discriminant [`ErrorCode`] so callers never need to match on message text.

use crate::ast::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Discriminant for evaluation-time failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    CalcDivZero,
    CalcDomain,
    CalcOverflow,
    CalcFactorialNeg,
    EvalUndefinedVar,
    EvalUnknownConstant,
    EvalUnknownOp,
    ParseUnknownFunction,
    EvalNotImplemented,
}

impl ErrorCode {
    /// Wire name of the code, e.g. `CALC_DIV_ZERO`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CalcDivZero => "CALC_DIV_ZERO",
            ErrorCode::CalcDomain => "CALC_DOMAIN",
            ErrorCode::CalcOverflow => "CALC_OVERFLOW",
            ErrorCode::CalcFactorialNeg => "CALC_FACTORIAL_NEG",
            ErrorCode::EvalUndefinedVar => "EVAL_UNDEFINED_VAR",
            ErrorCode::EvalUnknownConstant => "EVAL_UNKNOWN_CONSTANT",
            ErrorCode::EvalUnknownOp => "EVAL_UNKNOWN_OP",
            ErrorCode::ParseUnknownFunction => "PARSE_UNKNOWN_FUNCTION",
            ErrorCode::EvalNotImplemented => "EVAL_NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural parse failure (message only)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

/// Evaluation failure, localized to a single expression
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub code: ErrorCode,
    pub message: String,
    pub position: Option<Position>,
}

impl EvalError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        EvalError {
            code,
            message: message.into(),
            position: None,
        }
    }

    /// Attach a source span, keeping an existing one
    pub fn at(mut self, position: Position) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }

    pub fn div_zero(message: impl Into<String>) -> Self {
        EvalError::new(ErrorCode::CalcDivZero, message)
    }

    pub fn domain(message: impl Into<String>) -> Self {
        EvalError::new(ErrorCode::CalcDomain, message)
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Either failure an expression string can hit on its way to a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl ExpressionError {
    /// Evaluation code, if the failure happened past parsing
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ExpressionError::Parse(_) => None,
            ExpressionError::Eval(e) => Some(e.code),
        }
    }
}

/// Failures seen by a [`crate::client::WorkerClient`] caller
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The client was terminated while the request was in flight
    #[error("Worker terminated")]
    Terminated,
    /// The background context died; every pending request gets this
    #[error("Worker error: {0}")]
    WorkerFault(String),
    /// The worker answered with an `error` response
    #[error("{message}")]
    Worker {
        message: String,
        code: Option<ErrorCode>,
    },
    #[error("Failed to post request: {0}")]
    Transport(String),
    #[error("Malformed worker payload: {0}")]
    Decode(String),
}

impl ClientError {
    /// Evaluation code carried across the boundary, if any
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Worker { code, .. } => *code,
            _ => None,
        }
    }
}
