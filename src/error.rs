//! Facade-level error types for fnbox.
//!
//! Component errors (`RuntimeError`, `BuildError`, `SandboxError`,
//! `LimiterError`, `FunctionError`) live next to their components. The types
//! here are what callers of [`crate::Platform`] and
//! [`crate::invocation::Orchestrator`] see.
//!
//! Execution failures of user code are not errors: they are recorded on the
//! terminal [`crate::invocation::Invocation`]. Only failures that happen
//! before any user code runs propagate as [`InvokeError`].

use crate::build::{BuildError, BuildErrorKind};
use crate::function::FunctionError;
use crate::limiter::LimiterError;
use crate::sandbox::SandboxError;
use crate::types::{FunctionId, RuntimeId};
use std::fmt;

/// Errors raised while configuring or launching the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError {
    kind: Box<PlatformErrorKind>,
}

/// Specific platform error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// A configuration value was missing or inconsistent
    Configuration {
        /// The offending setting
        field: String,
        /// Why it was rejected
        reason: String,
    },
    /// Host preparation failed
    LaunchFailed {
        /// Reason for the failure
        reason: String,
    },
}

impl PlatformError {
    /// Creates a new PlatformError with the given kind.
    #[must_use]
    pub fn new(kind: PlatformErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &PlatformErrorKind {
        &self.kind
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::Configuration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates a launch failed error.
    #[must_use]
    pub fn launch_failed(reason: impl Into<String>) -> Self {
        Self::new(PlatformErrorKind::LaunchFailed {
            reason: reason.into(),
        })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(*self.kind, PlatformErrorKind::Configuration { .. })
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            PlatformErrorKind::Configuration { field, reason } => {
                write!(f, "invalid configuration for '{field}': {reason}")
            }
            PlatformErrorKind::LaunchFailed { reason } => {
                write!(f, "failed to launch platform: {reason}")
            }
        }
    }
}

impl std::error::Error for PlatformError {}

/// Errors returned by deploy and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployError {
    kind: Box<DeployErrorKind>,
}

/// Specific deploy error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// The function definition failed validation
    Invalid(FunctionError),
    /// The runtime is not registered
    UnsupportedRuntime {
        /// The requested runtime
        runtime: RuntimeId,
    },
    /// The source failed its syntax check or compilation
    BuildFailed {
        /// The function that was being built
        function_id: FunctionId,
        /// Build output describing the problem
        diagnostic: String,
    },
    /// The build could not run at all (missing toolchain, I/O)
    Infrastructure {
        /// Reason for the failure
        reason: String,
    },
}

impl DeployError {
    /// Creates a new DeployError with the given kind.
    #[must_use]
    pub fn new(kind: DeployErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &DeployErrorKind {
        &self.kind
    }

    /// Creates an unsupported runtime error.
    #[must_use]
    pub fn unsupported_runtime(runtime: RuntimeId) -> Self {
        Self::new(DeployErrorKind::UnsupportedRuntime { runtime })
    }

    /// Creates a build failed error.
    #[must_use]
    pub fn build_failed(function_id: FunctionId, diagnostic: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::BuildFailed {
            function_id,
            diagnostic: diagnostic.into(),
        })
    }

    /// Creates an infrastructure error.
    #[must_use]
    pub fn infrastructure(reason: impl Into<String>) -> Self {
        Self::new(DeployErrorKind::Infrastructure {
            reason: reason.into(),
        })
    }

    /// Returns true if the user's source was rejected.
    #[must_use]
    pub fn is_build_failure(&self) -> bool {
        matches!(*self.kind, DeployErrorKind::BuildFailed { .. })
    }

    /// Returns the build diagnostic, if this is a build failure.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self.kind.as_ref() {
            DeployErrorKind::BuildFailed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    /// Returns true if the runtime was not recognized.
    #[must_use]
    pub fn is_unsupported_runtime(&self) -> bool {
        matches!(*self.kind, DeployErrorKind::UnsupportedRuntime { .. })
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            DeployErrorKind::Invalid(e) => write!(f, "invalid function definition: {e}"),
            DeployErrorKind::UnsupportedRuntime { runtime } => write!(
                f,
                "runtime '{runtime}' is not supported; list available runtimes with `fnbox runtimes`"
            ),
            DeployErrorKind::BuildFailed {
                function_id,
                diagnostic,
            } => write!(
                f,
                "build failed for function '{function_id}'; fix the source and redeploy:\n{diagnostic}"
            ),
            DeployErrorKind::Infrastructure { reason } => {
                write!(f, "build could not run: {reason}")
            }
        }
    }
}

impl std::error::Error for DeployError {}

impl From<FunctionError> for DeployError {
    fn from(error: FunctionError) -> Self {
        Self::new(DeployErrorKind::Invalid(error))
    }
}

impl From<BuildError> for DeployError {
    fn from(error: BuildError) -> Self {
        match error.kind() {
            BuildErrorKind::UnsupportedRuntime { runtime } => {
                Self::unsupported_runtime(runtime.clone())
            }
            _ => Self::infrastructure(error.to_string()),
        }
    }
}

/// Errors that propagate out of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeError {
    kind: Box<InvokeErrorKind>,
}

/// Specific invoke error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeErrorKind {
    /// The function has no successful build for its current version
    NotReady {
        /// The function that was invoked
        function_id: FunctionId,
        /// Why it cannot run
        reason: String,
    },
    /// Memory or timeout outside the platform-wide bounds
    OutOfBounds {
        /// The function that was invoked
        function_id: FunctionId,
        /// Which bound was violated
        reason: String,
    },
    /// A dispatch request named a different function than the definition supplied
    FunctionMismatch {
        /// The function id in the request
        requested: FunctionId,
        /// The id of the definition supplied
        supplied: FunctionId,
    },
    /// No capacity was available within the wait bound, or the async queue is full
    Overloaded {
        /// What was saturated
        reason: String,
    },
    /// The sandbox could not be created before user code ran
    Sandbox(SandboxError),
    /// The orchestrator is shutting down
    ShuttingDown,
}

impl InvokeError {
    /// Creates a new InvokeError with the given kind.
    #[must_use]
    pub fn new(kind: InvokeErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &InvokeErrorKind {
        &self.kind
    }

    /// Creates a not ready error.
    #[must_use]
    pub fn not_ready(function_id: FunctionId, reason: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::NotReady {
            function_id,
            reason: reason.into(),
        })
    }

    /// Creates an out of bounds error.
    #[must_use]
    pub fn out_of_bounds(function_id: FunctionId, reason: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::OutOfBounds {
            function_id,
            reason: reason.into(),
        })
    }

    /// Creates a function mismatch error.
    #[must_use]
    pub fn function_mismatch(requested: FunctionId, supplied: FunctionId) -> Self {
        Self::new(InvokeErrorKind::FunctionMismatch {
            requested,
            supplied,
        })
    }

    /// Creates an overloaded error.
    #[must_use]
    pub fn overloaded(reason: impl Into<String>) -> Self {
        Self::new(InvokeErrorKind::Overloaded {
            reason: reason.into(),
        })
    }

    /// Creates a shutting down error.
    #[must_use]
    pub fn shutting_down() -> Self {
        Self::new(InvokeErrorKind::ShuttingDown)
    }

    /// Returns true if the function was not invocable.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(*self.kind, InvokeErrorKind::NotReady { .. })
    }

    /// Returns true if capacity was exhausted.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        matches!(*self.kind, InvokeErrorKind::Overloaded { .. })
    }

    /// Returns true if the sandbox failed before user code ran.
    #[must_use]
    pub fn is_sandbox(&self) -> bool {
        matches!(*self.kind, InvokeErrorKind::Sandbox(_))
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            InvokeErrorKind::NotReady {
                function_id,
                reason,
            } => write!(
                f,
                "function '{function_id}' is not ready: {reason}; deploy a version that builds successfully"
            ),
            InvokeErrorKind::OutOfBounds {
                function_id,
                reason,
            } => write!(f, "function '{function_id}' exceeds platform limits: {reason}"),
            InvokeErrorKind::FunctionMismatch {
                requested,
                supplied,
            } => write!(
                f,
                "dispatch requested function '{requested}' but definition '{supplied}' was supplied"
            ),
            InvokeErrorKind::Overloaded { reason } => {
                write!(f, "platform overloaded: {reason}; retry later")
            }
            InvokeErrorKind::Sandbox(e) => write!(f, "sandbox unavailable: {e}"),
            InvokeErrorKind::ShuttingDown => {
                write!(f, "orchestrator is shutting down; no new invocations accepted")
            }
        }
    }
}

impl std::error::Error for InvokeError {}

impl From<SandboxError> for InvokeError {
    fn from(error: SandboxError) -> Self {
        Self::new(InvokeErrorKind::Sandbox(error))
    }
}

impl From<LimiterError> for InvokeError {
    fn from(error: LimiterError) -> Self {
        if error.is_closed() {
            Self::shutting_down()
        } else {
            Self::overloaded(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_configuration_display() {
        let error = PlatformError::configuration("limits.max_memory_mb", "must be >= min");
        assert!(error.is_configuration());
        assert_eq!(
            error.to_string(),
            "invalid configuration for 'limits.max_memory_mb': must be >= min"
        );
    }

    #[test]
    fn deploy_build_failed_exposes_diagnostic() {
        let error = DeployError::build_failed(FunctionId::new(), "SyntaxError: invalid syntax");
        assert!(error.is_build_failure());
        assert_eq!(error.diagnostic(), Some("SyntaxError: invalid syntax"));
        assert!(error.to_string().contains("fix the source"));
    }

    #[test]
    fn deploy_unsupported_runtime_display() {
        let error = DeployError::unsupported_runtime(RuntimeId::parse("cobol85").unwrap());
        assert!(error.is_unsupported_runtime());
        assert!(error.diagnostic().is_none());
        assert!(error.to_string().contains("'cobol85'"));
    }

    #[test]
    fn build_errors_convert_by_kind() {
        let runtime = RuntimeId::parse("cobol85").unwrap();
        let error: DeployError = BuildError::unsupported_runtime(runtime).into();
        assert!(error.is_unsupported_runtime());

        let error: DeployError = BuildError::io("writing the source file", "disk full").into();
        assert!(matches!(error.kind(), DeployErrorKind::Infrastructure { .. }));
    }

    #[test]
    fn invoke_not_ready_display() {
        let id = FunctionId::new();
        let error = InvokeError::not_ready(id.clone(), "status is building");
        assert!(error.is_not_ready());
        assert!(error.to_string().contains(&id.to_string()));
    }

    #[test]
    fn limiter_overloaded_maps_to_overloaded() {
        let error: InvokeError = LimiterError::overloaded(FunctionId::new(), 250).into();
        assert!(error.is_overloaded());
    }

    #[test]
    fn limiter_closed_maps_to_shutting_down() {
        let error: InvokeError = LimiterError::closed().into();
        assert_eq!(error.kind(), &InvokeErrorKind::ShuttingDown);
    }

    #[test]
    fn sandbox_error_converts() {
        let error: InvokeError = SandboxError::spawn_failed("node", "not found").into();
        assert!(error.is_sandbox());
    }

    #[test]
    fn errors_are_small() {
        assert_eq!(
            std::mem::size_of::<InvokeError>(),
            std::mem::size_of::<usize>()
        );
    }
}
