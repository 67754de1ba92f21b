//! Stub executor for development and testing.
//!
//! Does NOT run function code. Returns scripted outcomes after a fixed
//! delay, which makes orchestrator and limiter behavior deterministic.

use super::error::SandboxError;
use super::result::{ExecutionOutcome, ExecutionRequest, ExecutionResult};
use super::traits::{ExecutionFuture, SandboxExecutor};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Outcome(ExecutionOutcome),
    Error(SandboxError),
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A stub executor.
///
/// Scripted responses are consumed in order; once they run out, every
/// execution succeeds and echoes its payload as the output.
///
/// # Warning
///
/// Nothing is isolated or executed. Use [`super::ProcessSandbox`] to run
/// real functions.
#[derive(Debug, Clone, Default)]
pub struct StubExecutor {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    delay: Duration,
    counters: Arc<Counters>,
}

impl StubExecutor {
    /// Creates a stub that echoes payloads immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long each execution takes.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues an outcome for a future execution.
    #[must_use]
    pub fn then_outcome(self, outcome: ExecutionOutcome) -> Self {
        self.push(Scripted::Outcome(outcome));
        self
    }

    /// Queues an infrastructure failure for a future execution.
    #[must_use]
    pub fn then_error(self, error: SandboxError) -> Self {
        self.push(Scripted::Error(error));
        self
    }

    fn push(&self, scripted: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(scripted);
    }

    fn next(&self) -> Option<Scripted> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Returns how many executions have started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Returns the largest number of executions seen running at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

impl SandboxExecutor for StubExecutor {
    fn execute(&self, request: ExecutionRequest) -> ExecutionFuture {
        let scripted = self.next();
        let delay = self.delay;
        let counters = Arc::clone(&self.counters);

        Box::pin(async move {
            tracing::warn!(
                invocation_id = %request.invocation_id,
                "StubExecutor: NOT executing function code"
            );
            counters.calls.fetch_add(1, Ordering::SeqCst);
            let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(delay).await;
            counters.in_flight.fetch_sub(1, Ordering::SeqCst);

            let outcome = match scripted {
                Some(Scripted::Error(error)) => return Err(error),
                Some(Scripted::Outcome(outcome)) => outcome,
                None => ExecutionOutcome::Success {
                    output: request.payload,
                },
            };
            let duration_ms = match outcome {
                ExecutionOutcome::Timeout { timeout_ms } => timeout_ms,
                _ => u64::try_from(delay.as_millis())
                    .unwrap_or(u64::MAX)
                    .min(request.timeout_ms),
            };
            Ok(ExecutionResult::new(outcome, duration_ms))
        })
    }
}
