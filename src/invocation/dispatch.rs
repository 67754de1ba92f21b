//! Dispatch wire types and queue settings.

use super::record::{Invocation, InvocationStatus};
use crate::types::{FunctionId, InvocationId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Settings for the async worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Async invocations that may wait for a worker
    pub queue_capacity: usize,
    /// Background workers draining the queue
    pub workers: usize,
    /// Records kept by the built-in store before the oldest finished ones are evicted
    pub retained_records: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 8,
            retained_records: 10_000,
        }
    }
}

/// Whether the caller waits for the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationMode {
    /// Block until the invocation is terminal
    Sync,
    /// Acknowledge with a queued record and run in the background
    Async,
}

impl InvocationMode {
    /// Maps the wire `async` flag to a mode.
    #[must_use]
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async {
            Self::Async
        } else {
            Self::Sync
        }
    }
}

/// An invocation request as received from the dispatch API.
///
/// ```json
/// {"functionId": "fn_01h455vb4pex5vsknk084sn02q", "payload": {"input": 41}, "async": false}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    /// The function to invoke
    pub function_id: FunctionId,
    /// Input passed to the handler
    #[serde(default)]
    pub payload: Value,
    /// Run in the background
    #[serde(default, rename = "async")]
    pub is_async: bool,
}

impl DispatchRequest {
    /// Creates a sync request.
    #[must_use]
    pub fn new(function_id: FunctionId, payload: Value) -> Self {
        Self {
            function_id,
            payload,
            is_async: false,
        }
    }

    /// Marks the request async.
    #[must_use]
    pub fn in_background(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Returns the requested mode.
    #[must_use]
    pub fn mode(&self) -> InvocationMode {
        InvocationMode::from_async_flag(self.is_async)
    }
}

/// The dispatch API's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DispatchResponse {
    /// Sync: the terminal invocation
    Completed(Invocation),
    /// Async: an acknowledgment
    #[serde(rename_all = "camelCase")]
    Queued {
        /// Id to re-fetch the invocation by
        invocation_id: InvocationId,
        /// Always `queued`
        status: InvocationStatus,
    },
}

impl DispatchResponse {
    /// Builds the response for an invocation returned by the orchestrator.
    #[must_use]
    pub fn from_invocation(invocation: Invocation) -> Self {
        if invocation.status() == InvocationStatus::Queued {
            Self::Queued {
                invocation_id: invocation.id().clone(),
                status: InvocationStatus::Queued,
            }
        } else {
            Self::Completed(invocation)
        }
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn invocation_id(&self) -> &InvocationId {
        match self {
            Self::Completed(invocation) => invocation.id(),
            Self::Queued { invocation_id, .. } => invocation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_and_async_keyword() {
        let id = FunctionId::new();
        let raw = json!({"functionId": id.to_string(), "payload": {"input": 41}, "async": true});
        let request: DispatchRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.function_id, id);
        assert_eq!(request.mode(), InvocationMode::Async);
    }

    #[test]
    fn request_defaults_to_sync() {
        let id = FunctionId::new();
        let request: DispatchRequest =
            serde_json::from_value(json!({"functionId": id.to_string()})).unwrap();
        assert_eq!(request.mode(), InvocationMode::Sync);
        assert_eq!(request.payload, Value::Null);
    }

    #[test]
    fn queued_response_shape() {
        let invocation = Invocation::queued(InvocationId::new(), FunctionId::new(), 1, json!({}));
        let id = invocation.id().clone();
        let response = DispatchResponse::from_invocation(invocation);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"invocationId": id.to_string(), "status": "queued"})
        );
    }

    #[test]
    fn running_record_is_completed_response() {
        let invocation = Invocation::running(InvocationId::new(), FunctionId::new(), 1, json!({}));
        let response = DispatchResponse::from_invocation(invocation.clone());
        assert_eq!(response.invocation_id(), invocation.id());
        assert!(matches!(response, DispatchResponse::Completed(_)));
    }
}
