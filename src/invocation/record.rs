//! The invocation record and its state machine.
//!
//! ```text
//! queued ──start──▶ running ──complete──▶ success | error
//!    │                 │
//!    └──────abort──────┴────────────────▶ error
//! ```
//!
//! Terminal records are immutable; every further transition fails.

use super::billing::BillingPolicy;
use crate::sandbox::{ExecutionOutcome, ExecutionResult, ResourceKind};
use crate::types::{FunctionId, InvocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// Accepted for background execution
    Queued,
    /// Executing in a sandbox
    Running,
    /// The handler returned a value
    Success,
    /// The invocation failed
    Error,
}

impl InvocationStatus {
    /// Returns true for `success` and `error`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Why an invocation ended in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    /// The handler threw or exited abnormally
    Execution,
    /// The deadline passed
    Timeout,
    /// A resource ceiling was hit
    ResourceLimit,
    /// No execution slot was available
    Overloaded,
    /// The sandbox could not be created
    Infrastructure,
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::ResourceLimit => "resource_limit",
            Self::Overloaded => "overloaded",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}

/// An illegal state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// The invocation
    pub invocation_id: InvocationId,
    /// Its current status
    pub from: InvocationStatus,
    /// The status that was requested
    pub to: InvocationStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invocation '{}' cannot move from {} to {}",
            self.invocation_id, self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}

/// One execution attempt of a function against a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    id: InvocationId,
    function_id: FunctionId,
    function_version: u64,
    status: InvocationStatus,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<Value>,
    #[serde(default)]
    logs: String,
    #[serde(default)]
    logs_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<InvocationErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<ResourceKind>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    billed_duration_ms: u64,
    #[serde(default)]
    gb_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_used_mb: Option<u32>,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl Invocation {
    fn with_status(
        id: InvocationId,
        function_id: FunctionId,
        function_version: u64,
        payload: Value,
        status: InvocationStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            function_id,
            function_version,
            status,
            payload,
            response: None,
            logs: String::new(),
            logs_truncated: false,
            error: None,
            error_kind: None,
            resource: None,
            duration_ms: 0,
            billed_duration_ms: 0,
            gb_seconds: 0.0,
            memory_used_mb: None,
            created_at: now,
            started_at: (status == InvocationStatus::Running).then_some(now),
            completed_at: None,
        }
    }

    /// Creates an async invocation in `queued`.
    #[must_use]
    pub fn queued(
        id: InvocationId,
        function_id: FunctionId,
        function_version: u64,
        payload: Value,
    ) -> Self {
        Self::with_status(id, function_id, function_version, payload, InvocationStatus::Queued)
    }

    /// Creates a sync invocation directly in `running`.
    #[must_use]
    pub fn running(
        id: InvocationId,
        function_id: FunctionId,
        function_version: u64,
        payload: Value,
    ) -> Self {
        Self::with_status(id, function_id, function_version, payload, InvocationStatus::Running)
    }

    fn illegal(&self, to: InvocationStatus) -> TransitionError {
        TransitionError {
            invocation_id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    /// Moves `queued` to `running`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` from any other state.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != InvocationStatus::Queued {
            return Err(self.illegal(InvocationStatus::Running));
        }
        self.status = InvocationStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Moves `running` to its terminal state from an execution result.
    ///
    /// `memory_mb` is the ceiling the invocation ran under; it is billed in
    /// GB-seconds against the rounded duration.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` unless the invocation is `running`.
    pub fn complete(
        &mut self,
        result: ExecutionResult,
        memory_mb: u32,
        billing: &BillingPolicy,
    ) -> Result<(), TransitionError> {
        let to = if result.success() {
            InvocationStatus::Success
        } else {
            InvocationStatus::Error
        };
        if self.status != InvocationStatus::Running {
            return Err(self.illegal(to));
        }

        self.error = result.error();
        match result.outcome {
            ExecutionOutcome::Success { output } => self.response = Some(output),
            ExecutionOutcome::ExecutionError { .. } => {
                self.error_kind = Some(InvocationErrorKind::Execution);
            }
            ExecutionOutcome::Timeout { .. } => {
                self.error_kind = Some(InvocationErrorKind::Timeout);
            }
            ExecutionOutcome::ResourceLimit { resource, .. } => {
                self.error_kind = Some(InvocationErrorKind::ResourceLimit);
                self.resource = Some(resource);
            }
        }
        self.logs = result.logs;
        self.logs_truncated = result.logs_truncated;
        self.duration_ms = result.duration_ms;
        self.billed_duration_ms = billing.billed_duration_ms(result.duration_ms);
        self.gb_seconds = BillingPolicy::gb_seconds(memory_mb, self.billed_duration_ms);
        self.memory_used_mb = result.memory_used_mb;
        self.status = to;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Ends a non-terminal invocation in `error` without running it.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the invocation is already terminal.
    pub fn abort(
        &mut self,
        kind: InvocationErrorKind,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.illegal(InvocationStatus::Error));
        }
        self.status = InvocationStatus::Error;
        self.error = Some(message.into());
        self.error_kind = Some(kind);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn id(&self) -> &InvocationId {
        &self.id
    }

    /// Returns the function id.
    #[must_use]
    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }

    /// Returns the function version that was executed.
    #[must_use]
    pub fn function_version(&self) -> u64 {
        self.function_version
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> InvocationStatus {
        self.status
    }

    /// Returns true once the invocation reached `success` or `error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the request payload.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the handler's output on success.
    #[must_use]
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Returns the captured logs.
    #[must_use]
    pub fn logs(&self) -> &str {
        &self.logs
    }

    /// Returns true if logs were truncated.
    #[must_use]
    pub fn logs_truncated(&self) -> bool {
        self.logs_truncated
    }

    /// Returns the error message.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns what kind of failure ended the invocation.
    #[must_use]
    pub fn error_kind(&self) -> Option<InvocationErrorKind> {
        self.error_kind
    }

    /// Returns the exhausted resource for `resource_limit` errors.
    #[must_use]
    pub fn resource(&self) -> Option<ResourceKind> {
        self.resource
    }

    /// Returns the execution duration.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Returns the billed duration.
    #[must_use]
    pub fn billed_duration_ms(&self) -> u64 {
        self.billed_duration_ms
    }

    /// Returns the billed memory-time in GB-seconds.
    #[must_use]
    pub fn gb_seconds(&self) -> f64 {
        self.gb_seconds
    }

    /// Returns the best-effort peak memory.
    #[must_use]
    pub fn memory_used_mb(&self) -> Option<u32> {
        self.memory_used_mb
    }

    /// Returns when the invocation was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when execution started.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the invocation reached its terminal state.
    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued() -> Invocation {
        Invocation::queued(InvocationId::new(), FunctionId::new(), 1, json!({"input": 41}))
    }

    fn succeeded(duration_ms: u64) -> ExecutionResult {
        ExecutionResult::new(ExecutionOutcome::Success { output: json!(42) }, duration_ms)
    }

    #[test]
    fn queued_runs_to_success() {
        let mut invocation = queued();
        assert!(invocation.started_at().is_none());
        invocation.start().unwrap();
        assert_eq!(invocation.status(), InvocationStatus::Running);

        invocation.complete(succeeded(37), 128, &BillingPolicy::default()).unwrap();

        assert_eq!(invocation.status(), InvocationStatus::Success);
        assert_eq!(invocation.response(), Some(&json!(42)));
        assert_eq!(invocation.duration_ms(), 37);
        assert_eq!(invocation.billed_duration_ms(), 100);
        assert!((invocation.gb_seconds() - 0.0125).abs() < 1e-9);
        assert!(invocation.completed_at().is_some());
        assert!(invocation.error_kind().is_none());
    }

    #[test]
    fn sync_invocation_starts_running() {
        let invocation =
            Invocation::running(InvocationId::new(), FunctionId::new(), 3, json!(null));
        assert_eq!(invocation.status(), InvocationStatus::Running);
        assert!(invocation.started_at().is_some());
        assert!(invocation.completed_at().is_none());
    }

    #[test]
    fn cannot_complete_a_queued_invocation() {
        let mut invocation = queued();
        let err = invocation
            .complete(succeeded(1), 128, &BillingPolicy::default())
            .unwrap_err();
        assert_eq!(err.from, InvocationStatus::Queued);
        assert!(invocation.completed_at().is_none());
    }

    #[test]
    fn terminal_records_are_immutable() {
        let mut invocation = queued();
        invocation.start().unwrap();
        invocation.complete(succeeded(1), 128, &BillingPolicy::default()).unwrap();
        let frozen = invocation.clone();

        assert!(invocation.start().is_err());
        assert!(invocation.abort(InvocationErrorKind::Overloaded, "late").is_err());
        assert!(invocation.complete(succeeded(5), 128, &BillingPolicy::default()).is_err());
        assert_eq!(invocation, frozen);
    }

    #[test]
    fn timeout_is_recorded_with_kind() {
        let mut invocation =
            Invocation::running(InvocationId::new(), FunctionId::new(), 1, json!({}));
        let result = ExecutionResult::new(ExecutionOutcome::Timeout { timeout_ms: 1000 }, 1000);

        invocation.complete(result, 128, &BillingPolicy::default()).unwrap();

        assert_eq!(invocation.status(), InvocationStatus::Error);
        assert_eq!(invocation.error(), Some("execution timed out after 1000ms"));
        assert_eq!(invocation.error_kind(), Some(InvocationErrorKind::Timeout));
        assert_eq!(invocation.billed_duration_ms(), 1000);
    }

    #[test]
    fn resource_limit_records_resource() {
        let mut invocation =
            Invocation::running(InvocationId::new(), FunctionId::new(), 1, json!({}));
        let result = ExecutionResult::new(ExecutionOutcome::out_of_memory(128), 40);

        invocation.complete(result, 128, &BillingPolicy::default()).unwrap();

        assert_eq!(invocation.error_kind(), Some(InvocationErrorKind::ResourceLimit));
        assert_eq!(invocation.resource(), Some(ResourceKind::Memory));
    }

    #[test]
    fn abort_from_queued() {
        let mut invocation = queued();
        invocation
            .abort(InvocationErrorKind::Overloaded, "dispatch queue is full")
            .unwrap();
        assert_eq!(invocation.status(), InvocationStatus::Error);
        assert_eq!(invocation.error_kind(), Some(InvocationErrorKind::Overloaded));
        assert_eq!(invocation.billed_duration_ms(), 0);
        assert_eq!(invocation.gb_seconds(), 0.0);
        assert!(invocation.completed_at().is_some());
    }

    #[test]
    fn serializes_with_lowercase_status() {
        let json = serde_json::to_value(queued()).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json.get("completed_at").is_none());
        let back: Invocation = serde_json::from_value(json).unwrap();
        assert_eq!(back.status(), InvocationStatus::Queued);
    }

    #[test]
    fn transition_error_display() {
        let invocation = queued();
        let err = invocation.illegal(InvocationStatus::Success);
        assert!(err.to_string().contains("cannot move from queued to success"));
    }
}
