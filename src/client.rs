//! Foreground handle to a background [`Worker`]
//!
//! A [`WorkerClient`] creates its worker lazily through a [`WorkerFactory`],
//! posts every request immediately and hands back a [`PendingResponse`].
//! Responses are routed by request id on a router thread, so results for
//! different requests may arrive in any order.
//!
//! Each worker instance is a *generation* with its own pending table. When
//! the client is terminated, or the worker faults, that generation's pending
//! requests are rejected and the next request starts a fresh generation.
//! Request ids come from a per-client counter that is never reset.

use crate::error::ClientError;
use crate::matrix::{DenseMatrixOps, Matrix, MatrixOperations};
use crate::protocol::{
    BatchRequest, BatchResult, ErrorPayload, EvaluateRequest, EvaluateResult, EvaluationOptions,
    GraphRequest, GraphResult, MatrixOperation, MatrixOutput, MatrixRequest, RequestType,
    ResponseType, WorkerRequest, WorkerResponse,
};
use crate::worker::{Worker, WorkerEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Called with each `progress` payload of a request
pub type ProgressCallback = Box<dyn FnMut(Value) + Send>;

// ============================================================================
// Transport seam
// ============================================================================

/// Outbound half of a running worker
pub trait WorkerTransport: Send {
    fn post_message(&mut self, request: WorkerRequest) -> Result<(), ClientError>;

    /// Stop the worker; nothing it produces afterwards is delivered
    fn terminate(&mut self);
}

/// Starts workers that report back on `events`
pub trait WorkerFactory: Send + Sync {
    fn create(&self, events: Sender<WorkerEvent>) -> Result<Box<dyn WorkerTransport>, ClientError>;
}

type MatrixOpsBuilder = Arc<dyn Fn() -> Box<dyn MatrixOperations + Send> + Send + Sync>;

/// Runs each worker on its own OS thread
#[derive(Clone)]
pub struct ThreadWorkerFactory {
    matrix_ops: MatrixOpsBuilder,
}

impl Default for ThreadWorkerFactory {
    fn default() -> Self {
        ThreadWorkerFactory::new()
    }
}

impl ThreadWorkerFactory {
    pub fn new() -> Self {
        ThreadWorkerFactory {
            matrix_ops: Arc::new(|| Box::new(DenseMatrixOps::new())),
        }
    }

    /// Give every worker its own matrix implementation from `build`
    pub fn with_matrix_ops<F>(build: F) -> Self
    where
        F: Fn() -> Box<dyn MatrixOperations + Send> + Send + Sync + 'static,
    {
        ThreadWorkerFactory {
            matrix_ops: Arc::new(build),
        }
    }
}

impl WorkerFactory for ThreadWorkerFactory {
    fn create(&self, events: Sender<WorkerEvent>) -> Result<Box<dyn WorkerTransport>, ClientError> {
        let (requests, inbox) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker::new((self.matrix_ops)());

        let worker_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("calc-worker".into())
            .spawn(move || worker.run(inbox, events, worker_stop))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Box::new(ThreadTransport {
            requests: Some(requests),
            stop,
        }))
    }
}

struct ThreadTransport {
    requests: Option<Sender<WorkerRequest>>,
    stop: Arc<AtomicBool>,
}

impl WorkerTransport for ThreadTransport {
    fn post_message(&mut self, request: WorkerRequest) -> Result<(), ClientError> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| ClientError::Transport("worker is terminated".into()))?;
        requests
            .send(request)
            .map_err(|_| ClientError::Transport("worker has stopped".into()))
    }

    fn terminate(&mut self) {
        // The thread finishes its current request silently, then exits
        self.stop.store(true, Ordering::SeqCst);
        self.requests = None;
    }
}

impl Drop for ThreadTransport {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ============================================================================
// Pending responses
// ============================================================================

type Reply = Result<Value, ClientError>;

/// Handle to a request's eventual result
#[must_use]
pub struct PendingResponse<T> {
    receiver: Receiver<Reply>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PendingResponse<T> {
    fn new(receiver: Receiver<Reply>) -> Self {
        PendingResponse {
            receiver,
            _marker: PhantomData,
        }
    }

    fn failed(error: ClientError) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(Err(error));
        PendingResponse::new(rx)
    }

    fn settle(reply: Reply) -> Result<T, ClientError> {
        let value = reply?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Block until the request settles
    pub fn wait(self) -> Result<T, ClientError> {
        match self.receiver.recv() {
            Ok(reply) => Self::settle(reply),
            Err(_) => Err(ClientError::Terminated),
        }
    }

    /// Block for at most `timeout`; `None` if still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, ClientError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(reply) => Some(Self::settle(reply)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ClientError::Terminated)),
        }
    }

    /// Non-blocking check
    pub fn try_result(&self) -> Option<Result<T, ClientError>> {
        match self.receiver.try_recv() {
            Ok(reply) => Some(Self::settle(reply)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ClientError::Terminated)),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

struct PendingEntry {
    reply: Sender<Reply>,
    on_progress: Option<ProgressCallback>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingEntry>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn reject_all(pending: &PendingMap, error: &ClientError) -> usize {
    let drained: Vec<PendingEntry> = lock(pending).drain().map(|(_, entry)| entry).collect();
    let count = drained.len();
    for entry in drained {
        let _ = entry.reply.send(Err(error.clone()));
    }
    count
}

/// One worker instance and the requests waiting on it
struct Generation {
    transport: Box<dyn WorkerTransport>,
    pending: PendingMap,
    faulted: Arc<AtomicBool>,
}

pub struct WorkerClient {
    factory: Box<dyn WorkerFactory>,
    generation: Option<Generation>,
    next_id: u64,
}

impl Default for WorkerClient {
    fn default() -> Self {
        WorkerClient::new()
    }
}

impl WorkerClient {
    /// Client backed by worker threads
    pub fn new() -> Self {
        WorkerClient::with_factory(Box::new(ThreadWorkerFactory::new()))
    }

    pub fn with_factory(factory: Box<dyn WorkerFactory>) -> Self {
        WorkerClient {
            factory,
            generation: None,
            next_id: 0,
        }
    }

    /// Whether a live worker currently exists
    pub fn is_running(&self) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|g| !g.faulted.load(Ordering::SeqCst))
    }

    /// Requests still waiting for a terminal response
    pub fn pending_count(&self) -> usize {
        self.generation.as_ref().map_or(0, |g| lock(&g.pending).len())
    }

    fn ensure_worker(&mut self) -> Result<&mut Generation, ClientError> {
        if self
            .generation
            .as_ref()
            .is_some_and(|g| g.faulted.load(Ordering::SeqCst))
        {
            if let Some(mut dead) = self.generation.take() {
                dead.transport.terminate();
            }
        }

        if self.generation.is_none() {
            let (events_tx, events_rx) = mpsc::channel();
            let transport = self.factory.create(events_tx)?;
            let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
            let faulted = Arc::new(AtomicBool::new(false));

            let router_pending = Arc::clone(&pending);
            let router_faulted = Arc::clone(&faulted);
            thread::Builder::new()
                .name("calc-worker-router".into())
                .spawn(move || route(events_rx, router_pending, router_faulted))
                .map_err(|e| ClientError::Transport(e.to_string()))?;

            debug!("worker created");
            self.generation = Some(Generation {
                transport,
                pending,
                faulted,
            });
        }

        self.generation
            .as_mut()
            .ok_or_else(|| ClientError::Transport("worker unavailable".into()))
    }

    /// Post a raw request; the result is the worker's `result` payload
    pub fn send_request(
        &mut self,
        kind: RequestType,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<Value> {
        self.dispatch(kind, payload, on_progress)
    }

    fn dispatch<T: DeserializeOwned>(
        &mut self,
        kind: RequestType,
        payload: Value,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<T> {
        self.next_id += 1;
        let id = format!("req_{}", self.next_id);

        let generation = match self.ensure_worker() {
            Ok(g) => g,
            Err(e) => return PendingResponse::failed(e),
        };

        let (reply, receiver) = mpsc::channel();
        lock(&generation.pending).insert(id.clone(), PendingEntry { reply, on_progress });

        debug!(id = %id, kind = ?kind, "posting request");
        let request = WorkerRequest {
            id: id.clone(),
            kind,
            payload,
        };
        if let Err(e) = generation.transport.post_message(request) {
            warn!(id = %id, error = %e, "failed to post request");
            if let Some(entry) = lock(&generation.pending).remove(&id) {
                let _ = entry.reply.send(Err(e));
            }
        }
        PendingResponse::new(receiver)
    }

    fn typed<P: Serialize, T: DeserializeOwned>(
        &mut self,
        kind: RequestType,
        payload: &P,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<T> {
        match serde_json::to_value(payload) {
            Ok(value) => self.dispatch(kind, value, on_progress),
            Err(e) => PendingResponse::failed(ClientError::Decode(e.to_string())),
        }
    }

    pub fn evaluate(
        &mut self,
        expression: &str,
        options: EvaluationOptions,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<EvaluateResult> {
        let payload = EvaluateRequest {
            expression: expression.to_string(),
            options,
        };
        self.typed(RequestType::Evaluate, &payload, on_progress)
    }

    pub fn matrix_operation(
        &mut self,
        operation: MatrixOperation,
        matrices: Vec<Matrix>,
        constants: Option<Vec<f64>>,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<MatrixOutput> {
        let payload = MatrixRequest {
            operation,
            matrices,
            constants,
        };
        self.typed(RequestType::Matrix, &payload, on_progress)
    }

    pub fn generate_graph_data(
        &mut self,
        request: GraphRequest,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<GraphResult> {
        self.typed(RequestType::Graph, &request, on_progress)
    }

    pub fn batch_evaluate(
        &mut self,
        expressions: Vec<String>,
        options: EvaluationOptions,
        on_progress: Option<ProgressCallback>,
    ) -> PendingResponse<BatchResult> {
        let payload = BatchRequest { expressions, options };
        self.typed(RequestType::Batch, &payload, on_progress)
    }

    /// Stop the worker and reject everything in flight with [`ClientError::Terminated`]
    ///
    /// The client stays usable; the next request starts a new worker.
    pub fn terminate(&mut self) {
        if let Some(mut generation) = self.generation.take() {
            generation.transport.terminate();
            let rejected = reject_all(&generation.pending, &ClientError::Terminated);
            debug!(rejected, "worker terminated");
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Router loop for one generation
fn route(events: Receiver<WorkerEvent>, pending: PendingMap, faulted: Arc<AtomicBool>) {
    for event in events {
        match event {
            WorkerEvent::Message(response) => deliver(&pending, response),
            WorkerEvent::Fault(message) => {
                faulted.store(true, Ordering::SeqCst);
                let rejected = reject_all(&pending, &ClientError::WorkerFault(message.clone()));
                warn!(%message, rejected, "worker fault");
            }
        }
    }

    // The worker went away without a word
    if reject_all(&pending, &ClientError::WorkerFault("Worker exited".into())) > 0 {
        faulted.store(true, Ordering::SeqCst);
        warn!("worker exited with requests pending");
    }
}

fn deliver(pending: &PendingMap, response: WorkerResponse) {
    let WorkerResponse { id, kind, payload } = response;
    let mut map = lock(pending);

    match kind {
        ResponseType::Progress => {
            let callback = match map.get_mut(&id) {
                Some(entry) => entry.on_progress.take(),
                None => {
                    debug!(id = %id, "progress for unknown request");
                    return;
                }
            };
            // Unlocked while user code runs
            drop(map);
            if let Some(mut callback) = callback {
                callback(payload);
                if let Some(entry) = lock(pending).get_mut(&id) {
                    entry.on_progress = Some(callback);
                }
            }
        }
        ResponseType::Result | ResponseType::Error => {
            let Some(entry) = map.remove(&id) else {
                warn!(id = %id, "dropping response for unknown request");
                return;
            };
            drop(map);
            let reply = if kind == ResponseType::Result {
                Ok(payload)
            } else {
                let error = ErrorPayload::from_value(&payload);
                Err(ClientError::Worker {
                    message: error.message,
                    code: error.code,
                })
            };
            let _ = entry.reply.send(reply);
        }
    }
}
