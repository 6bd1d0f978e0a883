//! Background worker: runs one request at a time to completion
//!
//! [`Worker::handle`] turns a [`WorkerRequest`] into zero or more `progress`
//! responses followed by exactly one `result` or `error`. [`Worker::run`] is
//! the message loop used by the thread transport; a panic inside a handler
//! is reported as a [`WorkerEvent::Fault`] and ends the loop.

use crate::evaluator::{evaluate, EvaluationContext};
use crate::format::format_f64;
use crate::matrix::{DenseMatrixOps, Matrix, MatrixError, MatrixOperations};
use crate::parser::parse;
use crate::precision::{evaluate_precision, PrecisionEvaluationContext};
use crate::protocol::{
    BatchItem, BatchProgress, BatchRequest, BatchResult, ErrorPayload, EvaluateRequest,
    EvaluateResult, EvaluationOptions, GraphPoint, GraphProgress, GraphRequest, GraphResult,
    MatrixOperation, MatrixOutput, MatrixRequest, RequestType, WorkerRequest, WorkerResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, warn};

/// A jump larger than this between neighbouring samples breaks the curve
pub const DISCONTINUITY_THRESHOLD: f64 = 1000.0;

/// Largest accepted `numPoints` for one graph request
pub const MAX_GRAPH_POINTS: usize = 100_000;

/// Graph progress is reported this many times per sweep
const GRAPH_PROGRESS_STEPS: usize = 20;

/// What a worker sends back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(WorkerResponse),
    /// The worker context itself failed; it will not answer again
    Fault(String),
}

type HandlerResult<T> = Result<T, ErrorPayload>;

pub struct Worker {
    matrix_ops: Box<dyn MatrixOperations + Send>,
}

impl Default for Worker {
    fn default() -> Self {
        Worker::new(Box::new(DenseMatrixOps::new()))
    }
}

impl Worker {
    pub fn new(matrix_ops: Box<dyn MatrixOperations + Send>) -> Self {
        Worker { matrix_ops }
    }

    /// Process one request, emitting its responses in order
    pub fn handle(&mut self, request: WorkerRequest, emit: &mut dyn FnMut(WorkerResponse)) {
        let WorkerRequest { id, kind, payload } = request;
        debug!(id = %id, kind = ?kind, "handling request");

        let outcome = {
            let mut progress = |payload: Value| emit(WorkerResponse::progress(id.as_str(), payload));
            match kind {
                RequestType::Evaluate => {
                    decode::<EvaluateRequest>(payload).and_then(|req| encode(evaluate_expression(&req.expression, &req.options)?))
                }
                RequestType::Graph => {
                    decode::<GraphRequest>(payload).and_then(|req| encode(generate_graph(&req, &mut progress)?))
                }
                RequestType::Batch => {
                    decode::<BatchRequest>(payload).and_then(|req| encode(batch_evaluate(&req, &mut progress)?))
                }
                RequestType::Matrix => decode::<MatrixRequest>(payload)
                    .and_then(|req| encode(run_matrix(self.matrix_ops.as_ref(), &req)?)),
            }
        };

        match outcome {
            Ok(result) => emit(WorkerResponse::result(id, result)),
            Err(error) => {
                debug!(id = %id, message = %error.message, "request failed");
                emit(WorkerResponse::error(id, &error));
            }
        }
    }

    /// Serve requests until the channel closes, `stop` is raised, or a handler panics
    pub fn run(mut self, requests: Receiver<WorkerRequest>, events: Sender<WorkerEvent>, stop: Arc<AtomicBool>) {
        while let Ok(request) = requests.recv() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.handle(request, &mut |response| {
                    // Nothing is delivered after termination
                    if !stop.load(Ordering::SeqCst) {
                        let _ = events.send(WorkerEvent::Message(response));
                    }
                })
            }));
            if let Err(cause) = outcome {
                let message = panic_message(cause.as_ref());
                warn!(%message, "worker fault");
                let _ = events.send(WorkerEvent::Fault(message));
                break;
            }
        }
        debug!("worker loop finished");
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "Worker panicked".to_string()
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> HandlerResult<T> {
    Ok(serde_json::from_value(payload)?)
}

fn encode<T: Serialize>(result: T) -> HandlerResult<Value> {
    Ok(serde_json::to_value(result)?)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Evaluate one expression under `options`, fixed or arbitrary precision
pub fn evaluate_expression(expression: &str, options: &EvaluationOptions) -> HandlerResult<EvaluateResult> {
    let ast = parse(expression)?;

    if options.use_precision_mode {
        let mut ctx = PrecisionEvaluationContext::new(options.precision).with_angle_mode(options.angle_mode);
        for (name, value) in options.variables.iter().flatten() {
            ctx.set_variable_f64(name.as_str(), *value);
        }
        let value = evaluate_precision(&ast, &ctx)?;
        return Ok(EvaluateResult {
            value: finite(value.to_f64()),
            formatted: value.to_significant_string(options.precision),
        });
    }

    let mut ctx = EvaluationContext::new().with_angle_mode(options.angle_mode);
    ctx.precision = options.precision;
    for (name, value) in options.variables.iter().flatten() {
        ctx.set_variable(name.as_str(), *value);
    }
    let value = evaluate(&ast, &ctx)?;
    Ok(EvaluateResult {
        value: finite(value),
        formatted: format_f64(value, options.precision),
    })
}

/// Sample `expression` over `x` in `[x_min, x_max]`
///
/// A null point is inserted before any sample that jumps by more than
/// [`DISCONTINUITY_THRESHOLD`]; failed or non-finite samples become null
/// points and forget the previous value.
pub fn generate_graph(request: &GraphRequest, progress: &mut dyn FnMut(Value)) -> HandlerResult<GraphResult> {
    if request.num_points > MAX_GRAPH_POINTS {
        return Err(ErrorPayload::new(format!(
            "numPoints must be at most {}, got {}",
            MAX_GRAPH_POINTS, request.num_points
        )));
    }
    let ast = parse(&request.expression)?;

    let mut ctx = EvaluationContext::new();
    if let Some(mode) = request.angle_mode {
        ctx.angle_mode = mode;
    }
    for (name, value) in request.variables.iter().flatten() {
        ctx.set_variable(name.as_str(), *value);
    }

    let steps = request.num_points.max(1);
    let step = (request.x_max - request.x_min) / steps as f64;
    let report_every = (steps / GRAPH_PROGRESS_STEPS).max(1);

    let mut points = Vec::with_capacity(steps + 1);
    let mut prev_y: Option<f64> = None;
    let mut has_discontinuities = false;

    for i in 0..=steps {
        let x = request.x_min + i as f64 * step;
        ctx.set_variable("x", x);

        match evaluate(&ast, &ctx) {
            Ok(y) if y.is_finite() => {
                if prev_y.is_some_and(|p| (y - p).abs() > DISCONTINUITY_THRESHOLD) {
                    has_discontinuities = true;
                    points.push(GraphPoint { x, y: None });
                }
                points.push(GraphPoint { x, y: Some(y) });
                prev_y = Some(y);
            }
            _ => {
                has_discontinuities = true;
                points.push(GraphPoint { x, y: None });
                prev_y = None;
            }
        }

        if i % report_every == 0 {
            let percent = (i as f64 / steps as f64 * 100.0).round();
            progress(encode(GraphProgress { progress: percent })?);
        }
    }

    Ok(GraphResult {
        points,
        has_discontinuities,
    })
}

/// Evaluate each expression independently; failures stay in their own slot
pub fn batch_evaluate(request: &BatchRequest, progress: &mut dyn FnMut(Value)) -> HandlerResult<BatchResult> {
    let total = request.expressions.len();
    let mut results = Vec::with_capacity(total);

    for (i, expression) in request.expressions.iter().enumerate() {
        let item = match evaluate_expression(expression, &request.options) {
            Ok(result) => BatchItem::Value(result),
            Err(error) => BatchItem::Error { error: error.message },
        };
        results.push(item);

        let completed = i + 1;
        progress(encode(BatchProgress {
            progress: (completed as f64 / total as f64 * 100.0).round(),
            completed,
            total,
        })?);
    }

    Ok(BatchResult { results })
}

/// Run a matrix request against the given implementation
pub fn run_matrix(ops: &dyn MatrixOperations, request: &MatrixRequest) -> HandlerResult<MatrixOutput> {
    let operation = request.operation;
    let wanted = operation.operand_count();
    if request.matrices.len() < wanted {
        return Err(MatrixError::Operands {
            operation: operation.name(),
            expected: wanted,
            got: request.matrices.len(),
        }
        .into());
    }
    let first: &Matrix = &request.matrices[0];

    let output = match operation {
        MatrixOperation::Multiply => MatrixOutput::matrix(ops.multiply(first, &request.matrices[1])?),
        MatrixOperation::Add => MatrixOutput::matrix(ops.add(first, &request.matrices[1])?),
        MatrixOperation::Subtract => MatrixOutput::matrix(ops.subtract(first, &request.matrices[1])?),
        MatrixOperation::Inverse => MatrixOutput::matrix(ops.inverse(first)?),
        MatrixOperation::Determinant => MatrixOutput::scalar(ops.determinant(first)?),
        MatrixOperation::Solve => {
            let constants = request
                .constants
                .as_deref()
                .ok_or(MatrixError::MissingConstants)?;
            MatrixOutput::vector(ops.solve(first, constants)?)
        }
    };
    Ok(output)
}
