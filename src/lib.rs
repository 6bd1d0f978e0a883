//! Calc Engine - expression parsing and evaluation for Rust and WASM
//!
//! This crate provides:
//! - Tokenizer, parser and pretty-printer with a lossless round trip
//! - Validation with character-range error positions
//! - Fixed (`f64`) and arbitrary-precision decimal evaluation
//! - A background worker protocol (graph sampling, batches, matrices)
//!   with a message-passing client

use wasm_bindgen::prelude::*;

pub mod ast;
pub mod builtins;
pub mod client;
pub mod decimal;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod matrix;
pub mod parser;
pub mod precision;
pub mod printer;
pub mod protocol;
pub mod token;
pub mod validator;
pub mod wasm;
pub mod worker;

// Re-export main types for convenience
pub use ast::{Ast, Node, NodeId, NodeKind, Position};
pub use client::{PendingResponse, ThreadWorkerFactory, WorkerClient, WorkerFactory, WorkerTransport};
pub use decimal::{Decimal, DecimalContext};
pub use error::{ClientError, ErrorCode, EvalError, ExpressionError, ParseError};
pub use evaluator::{evaluate, evaluate_str, AngleMode, EvaluationContext};
pub use parser::parse;
pub use precision::{evaluate_precision, evaluate_precision_str, PrecisionEvaluationContext};
pub use printer::pretty_print;
pub use token::{tokenize, Token, TokenKind};
pub use validator::{validate, ValidationResult};
pub use worker::Worker;

/// Initialize the WASM module
/// Call this once when loading the module to set up panic hooks
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// Get the version of the calc-engine library
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
