//! Invocation orchestration.
//!
//! [`Orchestrator::invoke`] is the public entry point for running a
//! function. It owns the [`Invocation`] state machine, billing, the bounded
//! async dispatch queue, and emission of every transition to an
//! [`InvocationSink`].

mod billing;
mod dispatch;
mod orchestrator;
mod record;
mod sink;

pub use billing::BillingPolicy;
pub use dispatch::{DispatchConfig, DispatchRequest, DispatchResponse, InvocationMode};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use record::{Invocation, InvocationErrorKind, InvocationStatus, TransitionError};
pub use sink::{InMemoryInvocationStore, InvocationSink, SinkError, SinkErrorKind, SinkFuture};
