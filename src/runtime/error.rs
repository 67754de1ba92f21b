//! Runtime registry error types.

use crate::types::RuntimeId;
use std::fmt;

/// Errors raised while registering or resolving runtimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    kind: Box<RuntimeErrorKind>,
}

/// Specific runtime error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// No template is registered under the identifier
    NotSupported {
        /// The unknown runtime
        runtime: RuntimeId,
    },
    /// A template with the same identifier is already registered
    Duplicate {
        /// The conflicting runtime
        runtime: RuntimeId,
    },
    /// A template failed validation
    InvalidTemplate {
        /// The runtime being registered
        runtime: RuntimeId,
        /// What was wrong
        reason: String,
    },
}

impl RuntimeError {
    /// Creates a new RuntimeError with the given kind.
    #[must_use]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.kind
    }

    /// Creates a not supported error.
    #[must_use]
    pub fn not_supported(runtime: RuntimeId) -> Self {
        Self::new(RuntimeErrorKind::NotSupported { runtime })
    }

    /// Creates a duplicate registration error.
    #[must_use]
    pub fn duplicate(runtime: RuntimeId) -> Self {
        Self::new(RuntimeErrorKind::Duplicate { runtime })
    }

    /// Creates an invalid template error.
    #[must_use]
    pub fn invalid_template(runtime: RuntimeId, reason: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::InvalidTemplate {
            runtime,
            reason: reason.into(),
        })
    }

    /// Returns true if the runtime is unknown.
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(*self.kind, RuntimeErrorKind::NotSupported { .. })
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            RuntimeErrorKind::NotSupported { runtime } => {
                write!(f, "runtime '{runtime}' is not supported")
            }
            RuntimeErrorKind::Duplicate { runtime } => write!(
                f,
                "runtime '{runtime}' is already registered; choose a different identifier"
            ),
            RuntimeErrorKind::InvalidTemplate { runtime, reason } => {
                write!(f, "invalid template for runtime '{runtime}': {reason}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> RuntimeId {
        RuntimeId::parse("ruby33").unwrap()
    }

    #[test]
    fn not_supported_display() {
        let error = RuntimeError::not_supported(id());
        assert!(error.is_not_supported());
        assert_eq!(error.to_string(), "runtime 'ruby33' is not supported");
    }

    #[test]
    fn duplicate_is_not_not_supported() {
        let error = RuntimeError::duplicate(id());
        assert!(!error.is_not_supported());
        assert!(error.to_string().contains("already registered"));
    }
}
