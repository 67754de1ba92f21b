//! Concurrency limiter.
//!
//! Caps the number of sandboxes running at once, globally and per
//! function. A caller that cannot get a slot within the wait bound fails
//! with [`LimiterErrorKind::Overloaded`] instead of queueing forever.
//!
//! The per-function permit is taken before the global one so that a
//! function stuck behind its own ceiling never holds a global slot.

use crate::types::FunctionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Sandboxes allowed to run at once across all functions
    pub global_limit: usize,
    /// Sandboxes allowed to run at once for one function; 0 disables the ceiling
    pub per_function_limit: usize,
    /// How long `acquire` waits for a slot
    pub acquire_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            global_limit: 16,
            per_function_limit: 4,
            acquire_timeout_ms: 10_000,
        }
    }
}

impl LimiterConfig {
    /// Returns the acquisition wait bound.
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Errors from the limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterError {
    kind: Box<LimiterErrorKind>,
}

/// Specific limiter error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterErrorKind {
    /// No slot freed up within the wait bound
    Overloaded {
        /// The function that asked for a slot
        function_id: FunctionId,
        /// How long it waited
        waited_ms: u64,
    },
    /// The limiter was closed for shutdown
    Closed,
}

impl LimiterError {
    /// Creates a new LimiterError with the given kind.
    #[must_use]
    pub fn new(kind: LimiterErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &LimiterErrorKind {
        &self.kind
    }

    /// Creates an overloaded error.
    #[must_use]
    pub fn overloaded(function_id: FunctionId, waited_ms: u64) -> Self {
        Self::new(LimiterErrorKind::Overloaded {
            function_id,
            waited_ms,
        })
    }

    /// Creates a closed error.
    #[must_use]
    pub fn closed() -> Self {
        Self::new(LimiterErrorKind::Closed)
    }

    /// Returns true if no slot was granted in time.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        matches!(*self.kind, LimiterErrorKind::Overloaded { .. })
    }

    /// Returns true if the limiter is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.kind, LimiterErrorKind::Closed)
    }
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            LimiterErrorKind::Overloaded {
                function_id,
                waited_ms,
            } => write!(
                f,
                "no execution slot for function '{function_id}' within {waited_ms}ms; retry later or raise concurrency limits"
            ),
            LimiterErrorKind::Closed => {
                write!(f, "limiter is closed; the platform is shutting down")
            }
        }
    }
}

impl std::error::Error for LimiterError {}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterSnapshot {
    /// Permits currently held
    pub in_flight: usize,
    /// Global ceiling
    pub capacity: usize,
    /// Global slots free right now
    pub available: usize,
    /// Functions with a tracked per-function semaphore
    pub tracked_functions: usize,
    /// Permits granted since start
    pub granted: u64,
    /// Acquisitions that timed out
    pub rejected: u64,
}

#[derive(Debug)]
struct Inner {
    config: LimiterConfig,
    global: Arc<Semaphore>,
    functions: Mutex<HashMap<FunctionId, Arc<Semaphore>>>,
    in_flight: AtomicUsize,
    granted: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicBool,
}

/// The concurrency limiter. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<Inner>,
}

/// A running slot. Released on drop.
#[derive(Debug)]
pub struct Permit {
    function_id: FunctionId,
    _function: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
    inner: Arc<Inner>,
}

impl Permit {
    /// Returns the function holding this slot.
    #[must_use]
    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Limiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                global: Arc::new(Semaphore::new(config.global_limit)),
                functions: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                granted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    fn functions(&self) -> MutexGuard<'_, HashMap<FunctionId, Arc<Semaphore>>> {
        self.inner
            .functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn function_semaphore(
        &self,
        function_id: &FunctionId,
    ) -> Result<Option<Arc<Semaphore>>, LimiterError> {
        let mut functions = self.functions();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LimiterError::closed());
        }
        let limit = self.inner.config.per_function_limit;
        if limit == 0 {
            return Ok(None);
        }
        let semaphore = functions
            .entry(function_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();
        Ok(Some(semaphore))
    }

    /// Acquires a slot, waiting at most the configured bound.
    ///
    /// # Errors
    ///
    /// Returns `LimiterError::Overloaded` if no slot frees up in time, or
    /// `LimiterError::Closed` after [`Limiter::close`].
    pub async fn acquire(&self, function_id: &FunctionId) -> Result<Permit, LimiterError> {
        let started = Instant::now();
        let bound = self.inner.config.acquire_timeout();
        match tokio::time::timeout(bound, self.acquire_unbounded(function_id)).await {
            Ok(permit) => permit,
            Err(_) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(
                    function_id = %function_id,
                    waited_ms,
                    "limiter rejected acquisition"
                );
                Err(LimiterError::overloaded(function_id.clone(), waited_ms))
            }
        }
    }

    /// Acquires a slot, waiting as long as it takes.
    ///
    /// Used by background workers, which are already bounded by the
    /// dispatch queue.
    ///
    /// # Errors
    ///
    /// Returns `LimiterError::Closed` after [`Limiter::close`].
    pub async fn acquire_unbounded(
        &self,
        function_id: &FunctionId,
    ) -> Result<Permit, LimiterError> {
        let function = match self.function_semaphore(function_id)? {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| LimiterError::closed())?,
            ),
            None => None,
        };
        let global = Arc::clone(&self.inner.global)
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::closed())?;

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        self.inner.granted.fetch_add(1, Ordering::Relaxed);
        Ok(Permit {
            function_id: function_id.clone(),
            _function: function,
            _global: global,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Releases a slot. Equivalent to dropping the permit.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Drops the per-function state of an idle function.
    ///
    /// Returns true if state was removed. A function with permits in use
    /// keeps its semaphore.
    pub fn forget_function(&self, function_id: &FunctionId) -> bool {
        let limit = self.inner.config.per_function_limit;
        let mut functions = self.functions();
        let idle = functions
            .get(function_id)
            .is_some_and(|s| Arc::strong_count(s) == 1 && s.available_permits() == limit);
        if idle {
            functions.remove(function_id);
        }
        idle
    }

    /// Fails every waiting and future acquisition with `Closed`.
    ///
    /// Permits already granted stay valid until dropped.
    pub fn close(&self) {
        let functions = self.functions();
        self.inner.closed.store(true, Ordering::Release);
        self.inner.global.close();
        for semaphore in functions.values() {
            semaphore.close();
        }
    }

    /// Returns true after [`Limiter::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the current counters.
    #[must_use]
    pub fn snapshot(&self) -> LimiterSnapshot {
        LimiterSnapshot {
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
            capacity: self.inner.config.global_limit,
            available: self.inner.global.available_permits(),
            tracked_functions: self.functions().len(),
            granted: self.inner.granted.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
        }
    }
}
