//! Sandbox executor trait.

use super::error::SandboxError;
use super::result::{ExecutionRequest, ExecutionResult};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

/// The result type for executor futures.
pub type ExecutionFuture =
    Pin<Box<dyn Future<Output = Result<ExecutionResult, SandboxError>> + Send + 'static>>;

/// The result type for one-time preparation futures.
pub type PrepareFuture = Pin<Box<dyn Future<Output = Result<(), SandboxError>> + Send + 'static>>;

/// Runs one invocation of a build artifact in isolation.
///
/// Implementations must tear down everything they created for the
/// invocation before the returned future resolves, on every path.
///
/// # Errors
///
/// The future resolves to `Err` only if the sandbox could not be created or
/// supervised. Failures of the user's code are reported through
/// [`super::ExecutionOutcome`].
///
/// # Example
///
/// ```rust,ignore
/// use fnbox::sandbox::{ProcessSandbox, SandboxConfig, SandboxExecutor};
///
/// let sandbox = ProcessSandbox::new(SandboxConfig::default());
/// let result = sandbox.execute(request).await?;
/// println!("{:?} in {}ms", result.outcome, result.duration_ms);
/// ```
pub trait SandboxExecutor: Send + Sync + Debug {
    /// Executes one request.
    fn execute(&self, request: ExecutionRequest) -> ExecutionFuture;

    /// Prepares host-wide state once at startup.
    ///
    /// The default does nothing.
    fn prepare(&self) -> PrepareFuture {
        Box::pin(async { Ok(()) })
    }
}
