//! The invocation orchestrator.
//!
//! Drives each invocation through its state machine, emitting every
//! transition to the [`InvocationSink`]:
//!
//! - sync: `running` → limiter (bounded wait) → execute → terminal
//! - async: `queued` → bounded queue → worker → job task → limiter →
//!   `running` → execute → terminal
//!
//! Workers never wait on the limiter themselves. Each dequeued job gets its
//! own task, so a function at its per-function ceiling only holds up its
//! own jobs. At most `queue_capacity` job tasks exist at once; past that the
//! workers stop dequeuing and the queue fills.
//!
//! Each record is owned by exactly one task until it is terminal.

use super::billing::BillingPolicy;
use super::dispatch::{DispatchConfig, DispatchRequest, DispatchResponse, InvocationMode};
use super::record::{Invocation, InvocationErrorKind};
use super::sink::InvocationSink;
use crate::build::ArtifactStore;
use crate::error::InvokeError;
use crate::function::{FunctionDefinition, ResourceBounds};
use crate::limiter::{Limiter, LimiterConfig, LimiterError, Permit};
use crate::sandbox::{ExecutionRequest, SandboxExecutor};
use crate::types::InvocationId;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// Orchestrator settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Concurrency ceilings
    pub limiter: LimiterConfig,
    /// Async queue and worker pool
    pub dispatch: DispatchConfig,
    /// Billing granularity
    pub billing: BillingPolicy,
    /// Absolute memory and timeout bounds, rechecked on every invocation
    pub bounds: ResourceBounds,
}

#[derive(Debug)]
struct Job {
    invocation: Invocation,
    request: ExecutionRequest,
}

#[derive(Debug)]
struct Shared {
    executor: Arc<dyn SandboxExecutor>,
    sink: Arc<dyn InvocationSink>,
    limiter: Limiter,
    billing: BillingPolicy,
}

impl Shared {
    async fn emit(&self, invocation: &Invocation) {
        if let Err(e) = self.sink.record(invocation.clone()).await {
            tracing::warn!(
                invocation_id = %invocation.id(),
                status = %invocation.status(),
                error = %e,
                "failed to record invocation"
            );
        }
    }

    async fn abort(&self, invocation: &mut Invocation, kind: InvocationErrorKind, message: String) {
        if let Err(e) = invocation.abort(kind, message) {
            tracing::error!(error = %e, "invocation state machine violated");
        }
        self.emit(invocation).await;
    }

    async fn reject(&self, mut invocation: Invocation, error: LimiterError) -> InvokeError {
        let kind = if error.is_closed() {
            InvocationErrorKind::Infrastructure
        } else {
            InvocationErrorKind::Overloaded
        };
        self.abort(&mut invocation, kind, error.to_string()).await;
        error.into()
    }

    async fn execute(
        &self,
        mut invocation: Invocation,
        request: ExecutionRequest,
        permit: Permit,
    ) -> Result<Invocation, InvokeError> {
        let memory_mb = request.memory_limit_mb;
        let executed = self.executor.execute(request).await;
        self.limiter.release(permit);

        match executed {
            Ok(result) => {
                if let Err(e) = invocation.complete(result, memory_mb, &self.billing) {
                    tracing::error!(error = %e, "invocation state machine violated");
                }
                self.emit(&invocation).await;
                tracing::info!(
                    invocation_id = %invocation.id(),
                    function_id = %invocation.function_id(),
                    version = invocation.function_version(),
                    status = %invocation.status(),
                    duration_ms = invocation.duration_ms(),
                    billed_duration_ms = invocation.billed_duration_ms(),
                    memory_used_mb = invocation.memory_used_mb(),
                    "invocation completed"
                );
                Ok(invocation)
            }
            Err(e) => {
                tracing::warn!(
                    invocation_id = %invocation.id(),
                    function_id = %invocation.function_id(),
                    error = %e,
                    "sandbox failed before running user code"
                );
                self.abort(&mut invocation, InvocationErrorKind::Infrastructure, e.to_string())
                    .await;
                Err(e.into())
            }
        }
    }

    async fn run_job(&self, job: Job) {
        let Job {
            mut invocation,
            request,
        } = job;
        let permit = match self.limiter.acquire_unbounded(&request.function_id).await {
            Ok(permit) => permit,
            Err(e) => {
                self.reject(invocation, e).await;
                return;
            }
        };
        if let Err(e) = invocation.start() {
            tracing::error!(error = %e, "invocation state machine violated");
            return;
        }
        self.emit(&invocation).await;
        // Failures are already recorded on the invocation.
        let _ = self.execute(invocation, request, permit).await;
    }
}

/// Pulls jobs off the queue and runs each on its own task.
async fn dispatch_worker(
    worker: usize,
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    outstanding: Arc<Semaphore>,
) {
    let mut jobs = JoinSet::new();
    loop {
        let Ok(slot) = Arc::clone(&outstanding).acquire_owned().await else {
            break;
        };
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else { break };
        while let Some(finished) = jobs.try_join_next() {
            log_job_panic(finished);
        }
        let shared = Arc::clone(&shared);
        jobs.spawn(async move {
            shared.run_job(job).await;
            drop(slot);
        });
    }
    while let Some(finished) = jobs.join_next().await {
        log_job_panic(finished);
    }
    tracing::debug!(worker, "dispatch worker stopped");
}

fn log_job_panic(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "async invocation task panicked");
    }
}

/// The public entry point for running functions.
///
/// Must be created inside a Tokio runtime: the async workers are spawned
/// on construction.
#[derive(Debug)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    store: Arc<ArtifactStore>,
    bounds: ResourceBounds,
    queue_capacity: usize,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl Orchestrator {
    /// Creates an orchestrator and starts its async workers.
    #[must_use]
    pub fn new(
        executor: Arc<dyn SandboxExecutor>,
        store: Arc<ArtifactStore>,
        sink: Arc<dyn InvocationSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let shared = Arc::new(Shared {
            executor,
            sink,
            limiter: Limiter::new(settings.limiter),
            billing: settings.billing,
        });

        let queue_capacity = settings.dispatch.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let outstanding = Arc::new(Semaphore::new(queue_capacity));
        let workers = (0..settings.dispatch.workers.max(1))
            .map(|worker| {
                tokio::spawn(dispatch_worker(
                    worker,
                    Arc::clone(&shared),
                    Arc::clone(&receiver),
                    Arc::clone(&outstanding),
                ))
            })
            .collect();

        Self {
            shared,
            store,
            bounds: settings.bounds,
            queue_capacity,
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            accepting: AtomicBool::new(true),
        }
    }

    /// Returns the concurrency limiter.
    #[must_use]
    pub fn limiter(&self) -> &Limiter {
        &self.shared.limiter
    }

    /// Returns the invocation sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn InvocationSink> {
        &self.shared.sink
    }

    /// Returns the billing policy.
    #[must_use]
    pub fn billing(&self) -> &BillingPolicy {
        &self.shared.billing
    }

    fn prepare(
        &self,
        definition: &FunctionDefinition,
        payload: Value,
    ) -> Result<ExecutionRequest, InvokeError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(InvokeError::shutting_down());
        }
        if !definition.is_invocable() {
            return Err(InvokeError::not_ready(
                definition.id.clone(),
                format!("status is {}", definition.status()),
            ));
        }
        let artifact = self
            .store
            .get(&definition.id, definition.version)
            .filter(|artifact| artifact.is_success())
            .ok_or_else(|| {
                InvokeError::not_ready(
                    definition.id.clone(),
                    format!("no successful build for version {}", definition.version),
                )
            })?;
        self.bounds
            .check_memory(definition.memory_mb)
            .and_then(|()| self.bounds.check_timeout(definition.timeout_ms))
            .map_err(|e| InvokeError::out_of_bounds(definition.id.clone(), e.to_string()))?;

        Ok(ExecutionRequest {
            invocation_id: InvocationId::new(),
            function_id: definition.id.clone(),
            artifact,
            payload,
            env: definition.env.clone(),
            memory_limit_mb: definition.memory_mb,
            timeout_ms: definition.timeout_ms,
        })
    }

    /// Invokes a function.
    ///
    /// Sync invocations return the terminal record; async ones return the
    /// `queued` record and finish in the background. Handler failures,
    /// timeouts and resource kills are recorded on the invocation, not
    /// returned as errors.
    ///
    /// # Errors
    ///
    /// - `NotReady` if the definition is not active or has no successful
    ///   build for its current version
    /// - `OutOfBounds` if its limits exceed the platform bounds
    /// - `Overloaded` if no slot freed up in time or the async queue is full
    /// - `Sandbox` if the sandbox failed before user code ran
    /// - `ShuttingDown` after [`Orchestrator::shutdown`]
    pub async fn invoke(
        &self,
        definition: &FunctionDefinition,
        payload: Value,
        mode: InvocationMode,
    ) -> Result<Invocation, InvokeError> {
        let request = self.prepare(definition, payload)?;
        let function_id = definition.id.clone();

        match mode {
            InvocationMode::Sync => {
                let invocation = Invocation::running(
                    request.invocation_id.clone(),
                    function_id.clone(),
                    definition.version,
                    request.payload.clone(),
                );
                self.shared.emit(&invocation).await;
                let permit = match self.shared.limiter.acquire(&function_id).await {
                    Ok(permit) => permit,
                    Err(e) => return Err(self.shared.reject(invocation, e).await),
                };
                self.shared.execute(invocation, request, permit).await
            }
            InvocationMode::Async => {
                let invocation = Invocation::queued(
                    request.invocation_id.clone(),
                    function_id,
                    definition.version,
                    request.payload.clone(),
                );
                self.shared.emit(&invocation).await;
                self.enqueue(Job {
                    invocation: invocation.clone(),
                    request,
                })
                .await?;
                tracing::debug!(invocation_id = %invocation.id(), "invocation queued");
                Ok(invocation)
            }
        }
    }

    async fn enqueue(&self, job: Job) -> Result<(), InvokeError> {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            let Job { mut invocation, .. } = job;
            self.shared
                .abort(
                    &mut invocation,
                    InvocationErrorKind::Infrastructure,
                    "orchestrator is shutting down".to_string(),
                )
                .await;
            return Err(InvokeError::shutting_down());
        };

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Job { mut invocation, .. })) => {
                let reason = format!("dispatch queue is full ({} pending)", self.queue_capacity);
                self.shared
                    .abort(&mut invocation, InvocationErrorKind::Overloaded, reason.clone())
                    .await;
                Err(InvokeError::overloaded(reason))
            }
            Err(TrySendError::Closed(Job { mut invocation, .. })) => {
                self.shared
                    .abort(
                        &mut invocation,
                        InvocationErrorKind::Infrastructure,
                        "orchestrator is shutting down".to_string(),
                    )
                    .await;
                Err(InvokeError::shutting_down())
            }
        }
    }

    /// Handles a dispatch API request for `definition`.
    ///
    /// # Errors
    ///
    /// Returns `FunctionMismatch` if the request names another function,
    /// otherwise the errors of [`Orchestrator::invoke`].
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        definition: &FunctionDefinition,
    ) -> Result<DispatchResponse, InvokeError> {
        if request.function_id != definition.id {
            return Err(InvokeError::function_mismatch(
                request.function_id,
                definition.id.clone(),
            ));
        }
        let mode = request.mode();
        let invocation = self.invoke(definition, request.payload, mode).await?;
        Ok(DispatchResponse::from_invocation(invocation))
    }

    /// Stops accepting invocations, finishes queued ones and joins the workers.
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let count = workers.len();
        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "dispatch worker panicked");
            }
        }
        self.shared.limiter.close();
        tracing::info!(workers = count, "orchestrator stopped");
    }

    /// Returns true until [`Orchestrator::shutdown`] is called.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}
