//! Sandbox error types.
//!
//! These cover failures of the executor itself. Anything the user's code
//! does wrong is an [`super::ExecutionOutcome`], not an error.

use std::fmt;

/// Errors raised when a sandbox cannot be created or supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxError {
    kind: Box<SandboxErrorKind>,
}

/// Specific sandbox error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxErrorKind {
    /// The scratch directory or payload file could not be prepared
    WorkspaceFailed {
        /// Reason for the failure
        reason: String,
    },
    /// The runtime process could not be started
    SpawnFailed {
        /// Program that failed to start
        program: String,
        /// Reason for the failure
        reason: String,
    },
    /// Required hardening could not be installed on this host
    Hardening {
        /// Reason for the failure
        reason: String,
    },
    /// The artifact is a failed build or has no runnable handle
    ArtifactUnavailable,
    /// Supervision of the child failed
    Internal {
        /// Reason for the failure
        reason: String,
    },
}

impl SandboxError {
    /// Creates a new SandboxError with the given kind.
    #[must_use]
    pub fn new(kind: SandboxErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &SandboxErrorKind {
        &self.kind
    }

    /// Creates a workspace error.
    #[must_use]
    pub fn workspace_failed(reason: impl fmt::Display) -> Self {
        Self::new(SandboxErrorKind::WorkspaceFailed {
            reason: reason.to_string(),
        })
    }

    /// Creates a spawn error.
    #[must_use]
    pub fn spawn_failed(program: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::new(SandboxErrorKind::SpawnFailed {
            program: program.into(),
            reason: reason.to_string(),
        })
    }

    /// Creates a hardening error.
    #[must_use]
    pub fn hardening(reason: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::Hardening {
            reason: reason.into(),
        })
    }

    /// Creates an artifact unavailable error.
    #[must_use]
    pub fn artifact_unavailable() -> Self {
        Self::new(SandboxErrorKind::ArtifactUnavailable)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(reason: impl fmt::Display) -> Self {
        Self::new(SandboxErrorKind::Internal {
            reason: reason.to_string(),
        })
    }

    /// Returns true if the runtime process could not be started.
    #[must_use]
    pub fn is_spawn_failed(&self) -> bool {
        matches!(*self.kind, SandboxErrorKind::SpawnFailed { .. })
    }

    /// Returns true if hardening was required but unavailable.
    #[must_use]
    pub fn is_hardening(&self) -> bool {
        matches!(*self.kind, SandboxErrorKind::Hardening { .. })
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            SandboxErrorKind::WorkspaceFailed { reason } => {
                write!(f, "failed to prepare sandbox workspace: {reason}")
            }
            SandboxErrorKind::SpawnFailed { program, reason } => {
                write!(
                    f,
                    "failed to start '{program}': {reason}; check that the runtime toolchain is installed"
                )
            }
            SandboxErrorKind::Hardening { reason } => {
                write!(
                    f,
                    "sandbox hardening unavailable: {reason}; set sandbox.require_hardening = false to run without it"
                )
            }
            SandboxErrorKind::ArtifactUnavailable => {
                write!(f, "artifact has no runnable handle; redeploy the function")
            }
            SandboxErrorKind::Internal { reason } => {
                write!(f, "sandbox supervision failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SandboxError {}
