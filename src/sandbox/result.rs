//! Execution requests and results.

use crate::build::BuildArtifact;
use crate::types::{FunctionId, InvocationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything the executor needs for one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The invocation being executed
    pub invocation_id: InvocationId,
    /// The function being executed
    pub function_id: FunctionId,
    /// The artifact to run; shared with concurrent invocations
    pub artifact: Arc<BuildArtifact>,
    /// Input passed to the handler
    pub payload: Value,
    /// Function environment variables
    pub env: BTreeMap<String, String>,
    /// Memory ceiling
    pub memory_limit_mb: u32,
    /// Wall-clock deadline
    pub timeout_ms: u64,
}

/// The resource a sandbox exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Memory ceiling (OOM kill, allocation failure)
    Memory,
    /// CPU-seconds rlimit
    Cpu,
    /// File size rlimit
    FileSize,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Cpu => write!(f, "cpu"),
            Self::FileSize => write!(f, "file_size"),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The handler returned a value
    Success {
        /// The handler's return value
        output: Value,
    },
    /// The handler threw or the process exited abnormally
    ExecutionError {
        /// Error message as reported by the runtime
        message: String,
        /// Stack trace, if the runtime reported one
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    /// The deadline passed and the sandbox was killed
    Timeout {
        /// The deadline that was exceeded
        timeout_ms: u64,
    },
    /// A resource ceiling was hit and the sandbox was killed
    ResourceLimit {
        /// Which ceiling
        resource: ResourceKind,
        /// Human-readable description
        message: String,
    },
}

impl ExecutionOutcome {
    /// Creates an execution error without a stack.
    #[must_use]
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::ExecutionError {
            message: message.into(),
            stack: None,
        }
    }

    /// Creates a memory limit outcome.
    #[must_use]
    pub fn out_of_memory(limit_mb: u32) -> Self {
        Self::ResourceLimit {
            resource: ResourceKind::Memory,
            message: format!("memory limit of {limit_mb}MB exceeded"),
        }
    }

    /// Returns true if the handler returned a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the error text shown to callers, if the execution failed.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::ExecutionError { message, .. } | Self::ResourceLimit { message, .. } => {
                Some(message.clone())
            }
            Self::Timeout { timeout_ms } => {
                Some(format!("execution timed out after {timeout_ms}ms"))
            }
        }
    }
}

/// The structured result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// How the execution ended
    pub outcome: ExecutionOutcome,
    /// Combined stdout and stderr, possibly truncated
    pub logs: String,
    /// Whether log bytes were discarded
    pub logs_truncated: bool,
    /// Wall-clock time from launch to completion; the timeout on timeout
    pub duration_ms: u64,
    /// Peak resident memory, when it could be sampled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_mb: Option<u32>,
    /// Exit code of the runtime process, if it exited normally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Creates a result with no logs.
    #[must_use]
    pub fn new(outcome: ExecutionOutcome, duration_ms: u64) -> Self {
        Self {
            outcome,
            logs: String::new(),
            logs_truncated: false,
            duration_ms,
            memory_used_mb: None,
            exit_code: None,
        }
    }

    /// Returns true if the handler returned a value.
    #[must_use]
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Returns the handler output on success.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            ExecutionOutcome::Success { output } => Some(output),
            _ => None,
        }
    }

    /// Returns the error text on failure.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.outcome.error_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timeout_message() {
        let outcome = ExecutionOutcome::Timeout { timeout_ms: 1000 };
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("execution timed out after 1000ms")
        );
    }

    #[test]
    fn success_exposes_output() {
        let result = ExecutionResult::new(ExecutionOutcome::Success { output: json!(42) }, 12);
        assert!(result.success());
        assert_eq!(result.output(), Some(&json!(42)));
        assert!(result.error().is_none());
    }

    #[test]
    fn out_of_memory_is_a_resource_limit() {
        let outcome = ExecutionOutcome::out_of_memory(128);
        assert!(matches!(
            outcome,
            ExecutionOutcome::ResourceLimit {
                resource: ResourceKind::Memory,
                ..
            }
        ));
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("memory limit of 128MB exceeded")
        );
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(ExecutionOutcome::execution_error("boom")).unwrap();
        assert_eq!(json["kind"], "execution_error");
        assert_eq!(json["message"], "boom");
        assert!(json.get("stack").is_none());
    }
}
