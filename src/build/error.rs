//! Build service error types.
//!
//! A build that rejects the user's source is not an error: it produces a
//! failed [`BuildArtifact`](super::BuildArtifact). These errors mean the
//! build could not be attempted at all.

use crate::types::RuntimeId;
use std::fmt;
use std::path::PathBuf;

/// Errors that prevent a build from running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    kind: Box<BuildErrorKind>,
}

/// Specific build error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildErrorKind {
    /// The runtime is not registered
    UnsupportedRuntime {
        /// The requested runtime
        runtime: RuntimeId,
    },
    /// The runtime's toolchain could not be executed
    ToolchainUnavailable {
        /// The runtime being built for
        runtime: RuntimeId,
        /// The executable that failed to start
        toolchain: PathBuf,
        /// The spawn error
        reason: String,
    },
    /// Filesystem work around the build failed
    Io {
        /// What was being done
        operation: String,
        /// The I/O error
        reason: String,
    },
}

impl BuildError {
    /// Creates a new BuildError with the given kind.
    #[must_use]
    pub fn new(kind: BuildErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &BuildErrorKind {
        &self.kind
    }

    /// Creates an unsupported runtime error.
    #[must_use]
    pub fn unsupported_runtime(runtime: RuntimeId) -> Self {
        Self::new(BuildErrorKind::UnsupportedRuntime { runtime })
    }

    /// Creates a toolchain unavailable error.
    #[must_use]
    pub fn toolchain_unavailable(
        runtime: RuntimeId,
        toolchain: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(BuildErrorKind::ToolchainUnavailable {
            runtime,
            toolchain: toolchain.into(),
            reason: reason.into(),
        })
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::new(BuildErrorKind::Io {
            operation: operation.into(),
            reason: reason.to_string(),
        })
    }

    /// Returns true if the runtime is unknown.
    #[must_use]
    pub fn is_unsupported_runtime(&self) -> bool {
        matches!(*self.kind, BuildErrorKind::UnsupportedRuntime { .. })
    }

    /// Returns true if the toolchain is missing.
    #[must_use]
    pub fn is_toolchain_unavailable(&self) -> bool {
        matches!(*self.kind, BuildErrorKind::ToolchainUnavailable { .. })
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            BuildErrorKind::UnsupportedRuntime { runtime } => {
                write!(f, "runtime '{runtime}' is not supported")
            }
            BuildErrorKind::ToolchainUnavailable {
                runtime,
                toolchain,
                reason,
            } => write!(
                f,
                "toolchain '{}' for runtime '{runtime}' could not be started: {reason}; \
                 install it or set runtimes.{runtime}.toolchain",
                toolchain.display()
            ),
            BuildErrorKind::Io { operation, reason } => {
                write!(f, "I/O error during {operation}: {reason}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toolchain_unavailable_display_has_hint() {
        let error = BuildError::toolchain_unavailable(
            RuntimeId::parse("go121").unwrap(),
            "go",
            "No such file or directory",
        );
        assert!(error.is_toolchain_unavailable());
        let message = error.to_string();
        assert!(message.contains("runtimes.go121.toolchain"));
    }

    #[test]
    fn io_display() {
        let error = BuildError::io("writing source", "disk full");
        assert_eq!(error.to_string(), "I/O error during writing source: disk full");
        assert!(!error.is_unsupported_runtime());
    }
}
