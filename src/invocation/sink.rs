//! Persistence boundary for invocation records.
//!
//! The orchestrator emits every state transition to an [`InvocationSink`]
//! in order. Storage itself is an external concern; the
//! [`InMemoryInvocationStore`] keeps records in process for tests, the CLI
//! and embedders that poll async invocations.

use super::record::{Invocation, InvocationStatus};
use crate::types::{FunctionId, InvocationId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Boxed future returned by [`InvocationSink::record`].
pub type SinkFuture = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'static>>;

/// Error raised by a sink that could not persist a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError {
    kind: Box<SinkErrorKind>,
}

/// Specific sink error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// The backing store rejected or lost the write
    Unavailable {
        /// Reason for the failure
        reason: String,
    },
}

impl SinkError {
    /// Creates a new SinkError with the given kind.
    #[must_use]
    pub fn new(kind: SinkErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &SinkErrorKind {
        &self.kind
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(SinkErrorKind::Unavailable {
            reason: reason.into(),
        })
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            SinkErrorKind::Unavailable { reason } => {
                write!(f, "invocation store unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for SinkError {}

/// Receives invocation state transitions.
///
/// Called once per transition, in transition order, for each invocation.
/// Implementations must not block; slow stores should buffer.
pub trait InvocationSink: Send + Sync + fmt::Debug {
    /// Persists a snapshot of the invocation.
    fn record(&self, invocation: Invocation) -> SinkFuture;
}

#[derive(Debug)]
struct Entry {
    latest: Invocation,
    history: Vec<InvocationStatus>,
}

#[derive(Debug, Default)]
struct Records {
    entries: HashMap<InvocationId, Entry>,
    // Terminal ids in completion order, only tracked when capped.
    finished: VecDeque<InvocationId>,
}

/// In-process invocation store.
///
/// Unbounded by default. [`InMemoryInvocationStore::with_capacity`] caps the
/// number of records kept; once over the cap, the oldest terminal records are
/// evicted. Records still queued or running are never evicted.
#[derive(Debug, Default)]
pub struct InMemoryInvocationStore {
    records: Mutex<Records>,
    capacity: Option<usize>,
    changed: Notify,
}

impl InMemoryInvocationStore {
    /// Creates an empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that keeps at most `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Returns the retention cap, if any.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, invocation: Invocation) {
        {
            let mut records = self.lock();
            let terminal = invocation.is_terminal();
            let id = invocation.id().clone();
            match records.entries.get_mut(&id) {
                Some(entry) => {
                    entry.history.push(invocation.status());
                    entry.latest = invocation;
                }
                None => {
                    records.entries.insert(
                        id.clone(),
                        Entry {
                            history: vec![invocation.status()],
                            latest: invocation,
                        },
                    );
                }
            }
            if let Some(capacity) = self.capacity {
                if terminal {
                    records.finished.push_back(id);
                }
                while records.entries.len() > capacity {
                    let Some(oldest) = records.finished.pop_front() else {
                        break;
                    };
                    records.entries.remove(&oldest);
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// Removes an invocation and returns its latest snapshot.
    pub fn remove(&self, id: &InvocationId) -> Option<Invocation> {
        let mut records = self.lock();
        let entry = records.entries.remove(id)?;
        records.finished.retain(|finished| finished != id);
        Some(entry.latest)
    }

    /// Returns the latest snapshot of an invocation.
    #[must_use]
    pub fn get(&self, id: &InvocationId) -> Option<Invocation> {
        self.lock()
            .entries
            .get(id)
            .map(|entry| entry.latest.clone())
    }

    /// Returns every status the invocation was recorded in, oldest first.
    #[must_use]
    pub fn history(&self, id: &InvocationId) -> Vec<InvocationStatus> {
        self.lock()
            .entries
            .get(id)
            .map(|entry| entry.history.clone())
            .unwrap_or_default()
    }

    /// Returns the latest snapshots of a function's invocations, oldest first.
    #[must_use]
    pub fn list_for_function(&self, function_id: &FunctionId) -> Vec<Invocation> {
        let mut found: Vec<Invocation> = self
            .lock()
            .entries
            .values()
            .filter(|entry| entry.latest.function_id() == function_id)
            .map(|entry| entry.latest.clone())
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found
    }

    /// Returns the number of invocations stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until the invocation reaches a terminal state.
    ///
    /// Returns `None` if it did not within `timeout`.
    pub async fn wait_for_terminal(
        &self,
        id: &InvocationId,
        timeout: Duration,
    ) -> Option<Invocation> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Registered before the check so a concurrent put is not missed.
            let changed = self.changed.notified();
            if let Some(invocation) = self.get(id).filter(Invocation::is_terminal) {
                return Some(invocation);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.get(id).filter(Invocation::is_terminal);
            }
        }
    }
}

impl InvocationSink for InMemoryInvocationStore {
    fn record(&self, invocation: Invocation) -> SinkFuture {
        self.put(invocation);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{BillingPolicy, InvocationErrorKind};
    use crate::sandbox::{ExecutionOutcome, ExecutionResult};
    use serde_json::json;
    use std::sync::Arc;

    fn queued(function_id: &FunctionId) -> Invocation {
        Invocation::queued(InvocationId::new(), function_id.clone(), 1, json!({}))
    }

    #[tokio::test]
    async fn records_history_in_order() {
        let store = InMemoryInvocationStore::new();
        let mut invocation = queued(&FunctionId::new());
        store.record(invocation.clone()).await.unwrap();
        invocation.start().unwrap();
        store.record(invocation.clone()).await.unwrap();
        invocation
            .complete(
                ExecutionResult::new(ExecutionOutcome::Success { output: json!(1) }, 5),
                128,
                &BillingPolicy::default(),
            )
            .unwrap();
        store.record(invocation.clone()).await.unwrap();

        assert_eq!(
            store.history(invocation.id()),
            vec![
                InvocationStatus::Queued,
                InvocationStatus::Running,
                InvocationStatus::Success
            ]
        );
        assert_eq!(store.get(invocation.id()), Some(invocation));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn lists_by_function() {
        let store = InMemoryInvocationStore::new();
        let mine = FunctionId::new();
        let other = FunctionId::new();
        store.record(queued(&mine)).await.unwrap();
        store.record(queued(&mine)).await.unwrap();
        store.record(queued(&other)).await.unwrap();

        let listed = store.list_for_function(&mine);
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id() < listed[1].id());
    }

    #[tokio::test]
    async fn wait_for_terminal_wakes_on_completion() {
        let store = Arc::new(InMemoryInvocationStore::new());
        let mut invocation = queued(&FunctionId::new());
        let id = invocation.id().clone();
        store.record(invocation.clone()).await.unwrap();

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            invocation
                .abort(InvocationErrorKind::Overloaded, "queue full")
                .unwrap();
            writer.record(invocation).await.unwrap();
        });

        let finished = store
            .wait_for_terminal(&id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(finished.status(), InvocationStatus::Error);
    }

    #[tokio::test]
    async fn wait_for_terminal_times_out() {
        let store = InMemoryInvocationStore::new();
        let invocation = queued(&FunctionId::new());
        store.record(invocation.clone()).await.unwrap();
        let waited = store
            .wait_for_terminal(invocation.id(), Duration::from_millis(20))
            .await;
        assert!(waited.is_none());
    }

    fn finished(function_id: &FunctionId) -> Invocation {
        let mut invocation = queued(function_id);
        invocation
            .abort(InvocationErrorKind::Execution, "done")
            .unwrap();
        invocation
    }

    #[tokio::test]
    async fn capped_store_evicts_oldest_terminal_records() {
        let store = InMemoryInvocationStore::with_capacity(2);
        let function_id = FunctionId::new();
        let pending = queued(&function_id);
        let first = finished(&function_id);
        let second = finished(&function_id);
        let third = finished(&function_id);

        store.record(pending.clone()).await.unwrap();
        store.record(first.clone()).await.unwrap();
        store.record(second.clone()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(first.id()).is_none());

        store.record(third.clone()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(second.id()).is_none());
        assert_eq!(store.get(pending.id()), Some(pending));
        assert_eq!(store.get(third.id()), Some(third));
    }

    #[tokio::test]
    async fn running_records_are_never_evicted() {
        let store = InMemoryInvocationStore::with_capacity(1);
        let function_id = FunctionId::new();
        let a = queued(&function_id);
        let b = queued(&function_id);
        store.record(a.clone()).await.unwrap();
        store.record(b.clone()).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get(a.id()).is_some());
        assert!(store.get(b.id()).is_some());
    }

    #[tokio::test]
    async fn remove_returns_latest_snapshot() {
        let store = InMemoryInvocationStore::with_capacity(8);
        let done = finished(&FunctionId::new());
        store.record(done.clone()).await.unwrap();

        assert_eq!(store.remove(done.id()), Some(done.clone()));
        assert!(store.is_empty());
        assert!(store.remove(done.id()).is_none());
    }

    #[test]
    fn sink_error_display() {
        let error = SinkError::unavailable("disk full");
        assert_eq!(error.to_string(), "invocation store unavailable: disk full");
    }
}
