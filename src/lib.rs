//! # fnbox: single-node function execution runtime
//!
//! Turns user-submitted source code into resource-bounded, time-bounded
//! invocations and reports uniform, structured results regardless of the
//! source language.
//!
//! ## Architecture
//!
//! - **Runtime Registry**: maps runtime ids (`node20`, `python311`, `go121`) to templates
//! - **Build Service**: syntax-checks or compiles source into immutable artifacts
//! - **Sandbox Executor**: runs one invocation in an isolated, limited child process
//! - **Concurrency Limiter**: bounds simultaneously running sandboxes
//! - **Invocation Orchestrator**: state machine, sync/async dispatch, billing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fnbox::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let platform = Platform::builder().launch().await?;
//!     let spec = FunctionSpec::new(
//!         "add-one",
//!         "tenant-1",
//!         RuntimeId::parse("python311")?,
//!         "handler",
//!         "def handler(event):\n    return event['input'] + 1\n",
//!     );
//!     let function = platform.deploy(spec).await?;
//!     let invocation = platform
//!         .invoke(&function, serde_json::json!({"input": 41}), InvocationMode::Sync)
//!         .await?;
//!     println!("{:?}", invocation.response());
//!     platform.shutdown().await;
//!     Ok(())
//! }
//! ```

#[cfg(not(unix))]
compile_error!("fnbox supervises POSIX process groups and only builds on unix targets");

pub mod build;
pub mod child;
pub mod config;
pub mod error;
pub mod function;
pub mod invocation;
pub mod limiter;
pub mod logging;
pub mod platform;
pub mod runtime;
pub mod sandbox;
pub mod types;

#[cfg(test)]
mod testing;

pub use platform::{Platform, PlatformBuilder};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::build::{ArtifactStore, BuildArtifact, BuildRequest, BuildService, BuildStatus};
    pub use crate::config::PlatformConfig;
    pub use crate::error::{DeployError, InvokeError, PlatformError};
    pub use crate::function::{
        FunctionDefinition, FunctionSpec, FunctionStatus, FunctionUpdate, ResourceBounds,
    };
    pub use crate::invocation::{
        BillingPolicy, DispatchRequest, DispatchResponse, InMemoryInvocationStore, Invocation,
        InvocationErrorKind, InvocationMode, InvocationSink, InvocationStatus, Orchestrator,
    };
    pub use crate::limiter::{Limiter, LimiterConfig};
    pub use crate::logging::{init_logging, LogLevel, LoggingConfig};
    pub use crate::platform::{Platform, PlatformBuilder};
    pub use crate::runtime::{RuntimeRegistry, RuntimeTemplate};
    pub use crate::sandbox::{
        ExecutionOutcome, ExecutionResult, ProcessSandbox, SandboxConfig, SandboxExecutor,
        StubExecutor,
    };
    pub use crate::types::{FunctionId, InvocationId, RuntimeId};
}
