//! Wire types for the background worker
//!
//! Requests and responses are `{id, type, payload}` envelopes with opaque
//! JSON payloads; the typed payload structs below are what the worker and
//! the client actually read and write inside them.

use crate::error::{ErrorCode, EvalError, ExpressionError, ParseError};
use crate::evaluator::AngleMode;
use crate::matrix::{Matrix, MatrixError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Evaluate,
    Graph,
    Matrix,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Result,
    Error,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestType,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResponseType,
    #[serde(default)]
    pub payload: Value,
}

impl WorkerResponse {
    pub fn result(id: impl Into<String>, payload: Value) -> Self {
        WorkerResponse {
            id: id.into(),
            kind: ResponseType::Result,
            payload,
        }
    }

    pub fn progress(id: impl Into<String>, payload: Value) -> Self {
        WorkerResponse {
            id: id.into(),
            kind: ResponseType::Progress,
            payload,
        }
    }

    pub fn error(id: impl Into<String>, error: &ErrorPayload) -> Self {
        WorkerResponse {
            id: id.into(),
            kind: ResponseType::Error,
            payload: error.to_value(),
        }
    }

    /// Terminal responses settle their request
    pub fn is_terminal(&self) -> bool {
        self.kind != ResponseType::Progress
    }
}

/// Body of an `error` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorPayload {
            message: message.into(),
            code: None,
        }
    }

    /// Read an error payload, accepting a bare message string as well
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => ErrorPayload::new(message.clone()),
            other => serde_json::from_value(other.clone())
                .unwrap_or_else(|_| ErrorPayload::new(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

impl From<ParseError> for ErrorPayload {
    fn from(e: ParseError) -> Self {
        ErrorPayload::new(e.message)
    }
}

impl From<EvalError> for ErrorPayload {
    fn from(e: EvalError) -> Self {
        ErrorPayload {
            message: e.message,
            code: Some(e.code),
        }
    }
}

impl From<ExpressionError> for ErrorPayload {
    fn from(e: ExpressionError) -> Self {
        match e {
            ExpressionError::Parse(p) => p.into(),
            ExpressionError::Eval(e) => e.into(),
        }
    }
}

impl From<MatrixError> for ErrorPayload {
    fn from(e: MatrixError) -> Self {
        ErrorPayload::new(e.to_string())
    }
}

impl From<serde_json::Error> for ErrorPayload {
    fn from(e: serde_json::Error) -> Self {
        ErrorPayload::new(format!("Invalid payload: {}", e))
    }
}

// ============================================================================
// Options
// ============================================================================

fn default_precision() -> u32 {
    15
}

fn default_num_points() -> usize {
    500
}

/// Options shared by `evaluate` and `batch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOptions {
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub angle_mode: AngleMode,
    #[serde(default)]
    pub use_precision_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, f64>>,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        EvaluationOptions {
            precision: default_precision(),
            angle_mode: AngleMode::Radians,
            use_precision_mode: false,
            variables: None,
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub expression: String,
    #[serde(default)]
    pub options: EvaluationOptions,
}

/// `value` is `None` when the result is not a finite double
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResult {
    pub value: Option<f64>,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRequest {
    pub expression: String,
    pub x_min: f64,
    pub x_max: f64,
    #[serde(default = "default_num_points")]
    pub num_points: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle_mode: Option<AngleMode>,
}

impl GraphRequest {
    pub fn new(expression: impl Into<String>, x_min: f64, x_max: f64) -> Self {
        GraphRequest {
            expression: expression.into(),
            x_min,
            x_max,
            num_points: default_num_points(),
            variables: None,
            angle_mode: None,
        }
    }

    pub fn with_num_points(mut self, num_points: usize) -> Self {
        self.num_points = num_points;
        self
    }
}

/// A sample; `y: None` marks a break in the curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    pub x: f64,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResult {
    pub points: Vec<GraphPoint>,
    pub has_discontinuities: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphProgress {
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixOperation {
    Multiply,
    Add,
    Subtract,
    Inverse,
    Determinant,
    Solve,
}

impl MatrixOperation {
    pub fn name(&self) -> &'static str {
        match self {
            MatrixOperation::Multiply => "multiply",
            MatrixOperation::Add => "add",
            MatrixOperation::Subtract => "subtract",
            MatrixOperation::Inverse => "inverse",
            MatrixOperation::Determinant => "determinant",
            MatrixOperation::Solve => "solve",
        }
    }

    /// Number of matrices the operation consumes
    pub fn operand_count(&self) -> usize {
        match self {
            MatrixOperation::Multiply | MatrixOperation::Add | MatrixOperation::Subtract => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRequest {
    pub operation: MatrixOperation,
    pub matrices: Vec<Matrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constants: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixResultKind {
    Matrix,
    Scalar,
    Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixValue {
    Matrix(Matrix),
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixOutput {
    pub result: MatrixValue,
    #[serde(rename = "type")]
    pub kind: MatrixResultKind,
}

impl MatrixOutput {
    pub fn matrix(m: Matrix) -> Self {
        MatrixOutput {
            result: MatrixValue::Matrix(m),
            kind: MatrixResultKind::Matrix,
        }
    }

    pub fn scalar(v: f64) -> Self {
        MatrixOutput {
            result: MatrixValue::Scalar(v),
            kind: MatrixResultKind::Scalar,
        }
    }

    pub fn vector(v: Vec<f64>) -> Self {
        MatrixOutput {
            result: MatrixValue::Vector(v),
            kind: MatrixResultKind::Vector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub expressions: Vec<String>,
    #[serde(default)]
    pub options: EvaluationOptions,
}

/// One batch slot: a value or that expression's own error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    Value(EvaluateResult),
    Error { error: String },
}

impl BatchItem {
    pub fn value(&self) -> Option<f64> {
        match self {
            BatchItem::Value(r) => r.value,
            BatchItem::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            BatchItem::Value(_) => None,
            BatchItem::Error { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<BatchItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub progress: f64,
    pub completed: usize,
    pub total: usize,
}
