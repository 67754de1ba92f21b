//! Function definitions: the deployable unit of user code.
//!
//! A [`FunctionDefinition`] is created from a [`FunctionSpec`] on deploy and
//! replaced by a new version on update. Definitions are plain data owned by
//! the caller; the platform only borrows them for the duration of a dispatch.

use crate::build::BuildArtifact;
use crate::runtime::RuntimeLimits;
use crate::types::{FunctionId, RuntimeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment variable prefix reserved for the handler protocol.
pub const RESERVED_ENV_PREFIX: &str = "FNBOX_";

const MAX_NAME_LEN: usize = 64;
const MAX_HANDLER_LEN: usize = 128;

/// Platform-wide absolute limits on function resources.
///
/// These are enforced on every deploy, update and invocation regardless of
/// any per-plan quota the caller has already checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBounds {
    /// Smallest memory ceiling a function may request.
    pub min_memory_mb: u32,
    /// Largest memory ceiling a function may request.
    pub max_memory_mb: u32,
    /// Shortest timeout a function may request.
    pub min_timeout_ms: u64,
    /// Longest timeout a function may request.
    pub max_timeout_ms: u64,
}

impl Default for ResourceBounds {
    fn default() -> Self {
        Self {
            min_memory_mb: 128,
            max_memory_mb: 1024,
            min_timeout_ms: 1_000,
            max_timeout_ms: 300_000,
        }
    }
}

impl ResourceBounds {
    /// Checks a memory ceiling against the bounds.
    ///
    /// # Errors
    ///
    /// Returns `FunctionError::OutOfBounds` if the value is outside the range.
    pub fn check_memory(&self, memory_mb: u32) -> Result<(), FunctionError> {
        if memory_mb < self.min_memory_mb || memory_mb > self.max_memory_mb {
            return Err(FunctionError::out_of_bounds(
                "memory_mb",
                u64::from(memory_mb),
                u64::from(self.min_memory_mb),
                u64::from(self.max_memory_mb),
            ));
        }
        Ok(())
    }

    /// Checks a timeout against the bounds.
    ///
    /// # Errors
    ///
    /// Returns `FunctionError::OutOfBounds` if the value is outside the range.
    pub fn check_timeout(&self, timeout_ms: u64) -> Result<(), FunctionError> {
        if timeout_ms < self.min_timeout_ms || timeout_ms > self.max_timeout_ms {
            return Err(FunctionError::out_of_bounds(
                "timeout_ms",
                timeout_ms,
                self.min_timeout_ms,
                self.max_timeout_ms,
            ));
        }
        Ok(())
    }

    /// Clamps a runtime default into range.
    #[must_use]
    pub fn clamp(&self, limits: RuntimeLimits) -> RuntimeLimits {
        RuntimeLimits {
            memory_mb: limits.memory_mb.clamp(self.min_memory_mb, self.max_memory_mb),
            timeout_ms: limits.timeout_ms.clamp(self.min_timeout_ms, self.max_timeout_ms),
        }
    }

    /// Returns a description of the first inconsistency, if any.
    #[must_use]
    pub fn inconsistency(&self) -> Option<(&'static str, String)> {
        if self.min_memory_mb == 0 {
            return Some(("limits.min_memory_mb", "must be greater than zero".into()));
        }
        if self.min_memory_mb > self.max_memory_mb {
            return Some((
                "limits.max_memory_mb",
                format!("{} is below min_memory_mb {}", self.max_memory_mb, self.min_memory_mb),
            ));
        }
        if self.min_timeout_ms == 0 {
            return Some(("limits.min_timeout_ms", "must be greater than zero".into()));
        }
        if self.min_timeout_ms > self.max_timeout_ms {
            return Some((
                "limits.max_timeout_ms",
                format!(
                    "{} is below min_timeout_ms {}",
                    self.max_timeout_ms, self.min_timeout_ms
                ),
            ));
        }
        None
    }
}

/// Lifecycle status of a function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionStatus {
    /// A build for the current version is pending or failed
    Building,
    /// The current version has a successful build and accepts invocations
    Active,
    /// Soft-deleted; no further invocations accepted
    Deleted,
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Active => write!(f, "active"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// What a tenant submits to deploy a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Human-readable name, unique per owner by convention
    pub name: String,
    /// Owning tenant or user
    pub owner: String,
    /// Runtime the source is written for
    pub runtime: RuntimeId,
    /// Entry point, e.g. `handler` or `index.handler`
    pub handler: String,
    /// Source code
    pub source: String,
    /// Environment variables injected into every invocation
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Memory ceiling; the runtime default when omitted
    #[serde(default)]
    pub memory_mb: Option<u32>,
    /// Wall-clock timeout; the runtime default when omitted
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl FunctionSpec {
    /// Creates a spec with no environment and runtime-default limits.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        runtime: RuntimeId,
        handler: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            runtime,
            handler: handler.into(),
            source: source.into(),
            env: BTreeMap::new(),
            memory_mb: None,
            timeout_ms: None,
        }
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the memory ceiling.
    #[must_use]
    pub fn with_memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A code or configuration change to an existing function.
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionUpdate {
    /// Replacement source code
    pub source: Option<String>,
    /// Replacement entry point
    pub handler: Option<String>,
    /// Replacement environment (replaces the whole map)
    pub env: Option<BTreeMap<String, String>>,
    /// Replacement memory ceiling
    pub memory_mb: Option<u32>,
    /// Replacement timeout
    pub timeout_ms: Option<u64>,
}

impl FunctionUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the source code.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Replaces the entry point.
    #[must_use]
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Replaces the environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Replaces the memory ceiling.
    #[must_use]
    pub fn with_memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    /// Replaces the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// One version of a deployable unit of user code.
///
/// Memory and timeout are always within the [`ResourceBounds`] the
/// definition was created or updated against. The status is only ever
/// `Active` after [`activate`](Self::activate) accepted a successful build
/// of the current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Stable identifier across versions
    pub id: FunctionId,
    /// Human-readable name
    pub name: String,
    /// Owning tenant or user
    pub owner: String,
    /// Runtime the source is written for
    pub runtime: RuntimeId,
    /// Entry point
    pub handler: String,
    /// Source code of this version
    pub source: String,
    /// Injected environment variables
    pub env: BTreeMap<String, String>,
    /// Memory ceiling in MB
    pub memory_mb: u32,
    /// Wall-clock timeout in ms
    pub timeout_ms: u64,
    /// Starts at 1 and increases by one per update
    pub version: u64,
    status: FunctionStatus,
    /// When version 1 was created
    pub created_at: DateTime<Utc>,
    /// When this version was created
    pub updated_at: DateTime<Utc>,
}

impl FunctionDefinition {
    /// Validates a spec and creates version 1 in `building`.
    ///
    /// Limits omitted from the spec are taken from `defaults`, clamped into
    /// `bounds`.
    ///
    /// # Errors
    ///
    /// Returns a `FunctionError` describing the first invalid field.
    pub fn create(
        spec: FunctionSpec,
        bounds: &ResourceBounds,
        defaults: RuntimeLimits,
    ) -> Result<Self, FunctionError> {
        validate_name(&spec.name)?;
        if spec.owner.trim().is_empty() {
            return Err(FunctionError::invalid_name(spec.owner, "owner cannot be empty"));
        }
        validate_handler(&spec.handler)?;
        validate_env(&spec.env)?;

        let defaults = bounds.clamp(defaults);
        let memory_mb = spec.memory_mb.unwrap_or(defaults.memory_mb);
        let timeout_ms = spec.timeout_ms.unwrap_or(defaults.timeout_ms);
        bounds.check_memory(memory_mb)?;
        bounds.check_timeout(timeout_ms)?;

        let now = Utc::now();
        Ok(Self {
            id: FunctionId::new(),
            name: spec.name,
            owner: spec.owner,
            runtime: spec.runtime,
            handler: spec.handler,
            source: spec.source,
            env: spec.env,
            memory_mb,
            timeout_ms,
            version: 1,
            status: FunctionStatus::Building,
            created_at: now,
            updated_at: now,
        })
    }

    /// Produces the next version with `update` applied, in `building`.
    ///
    /// `self` is left untouched, so a failed build of the new version leaves
    /// the current one serving.
    ///
    /// # Errors
    ///
    /// Returns `FunctionError::Deleted` for a deleted function, or a
    /// validation error for the first invalid field.
    pub fn with_update(
        &self,
        update: FunctionUpdate,
        bounds: &ResourceBounds,
    ) -> Result<Self, FunctionError> {
        if self.status == FunctionStatus::Deleted {
            return Err(FunctionError::deleted(self.id.clone()));
        }

        let mut next = self.clone();
        if let Some(source) = update.source {
            next.source = source;
        }
        if let Some(handler) = update.handler {
            validate_handler(&handler)?;
            next.handler = handler;
        }
        if let Some(env) = update.env {
            validate_env(&env)?;
            next.env = env;
        }
        if let Some(memory_mb) = update.memory_mb {
            bounds.check_memory(memory_mb)?;
            next.memory_mb = memory_mb;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            bounds.check_timeout(timeout_ms)?;
            next.timeout_ms = timeout_ms;
        }

        next.version = self.version + 1;
        next.status = FunctionStatus::Building;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Marks the definition active given a successful build of this version.
    ///
    /// # Errors
    ///
    /// Returns `FunctionError::ArtifactMismatch` if the artifact belongs to
    /// another function or version, `BuildNotSuccessful` if the build failed,
    /// and `Deleted` if the function was deleted.
    pub fn activate(&mut self, artifact: &BuildArtifact) -> Result<(), FunctionError> {
        if self.status == FunctionStatus::Deleted {
            return Err(FunctionError::deleted(self.id.clone()));
        }
        if artifact.function_id() != &self.id || artifact.version() != self.version {
            return Err(FunctionError::new(FunctionErrorKind::ArtifactMismatch {
                function_id: self.id.clone(),
                expected_version: self.version,
                artifact_version: artifact.version(),
            }));
        }
        if !artifact.is_success() {
            return Err(FunctionError::new(FunctionErrorKind::BuildNotSuccessful {
                function_id: self.id.clone(),
                version: self.version,
            }));
        }
        self.status = FunctionStatus::Active;
        Ok(())
    }

    /// Soft-deletes the definition. Idempotent.
    pub fn delete(&mut self) {
        self.status = FunctionStatus::Deleted;
        self.updated_at = Utc::now();
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub fn status(&self) -> FunctionStatus {
        self.status
    }

    /// Returns true if the definition accepts invocations.
    #[must_use]
    pub fn is_invocable(&self) -> bool {
        self.status == FunctionStatus::Active
    }

    /// Returns the function name the runtime should call.
    ///
    /// For `index.handler` this is `handler`; the module part is implied by
    /// the runtime's source file.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        entry_point(&self.handler)
    }
}

/// Returns the last dotted segment of a handler string.
#[must_use]
pub fn entry_point(handler: &str) -> &str {
    handler.rsplit('.').next().unwrap_or(handler)
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn validate_name(name: &str) -> Result<(), FunctionError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FunctionError::invalid_name(
            name,
            format!("must be 1-{MAX_NAME_LEN} characters"),
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(FunctionError::invalid_name(
            name,
            "must start with a letter or digit",
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
    {
        return Err(FunctionError::invalid_name(
            name,
            format!("contains '{c}'; use letters, digits, '-' or '_'"),
        ));
    }
    Ok(())
}

fn validate_handler(handler: &str) -> Result<(), FunctionError> {
    if handler.len() > MAX_HANDLER_LEN {
        return Err(FunctionError::invalid_handler(handler));
    }
    let segments: Vec<&str> = handler.split('.').collect();
    if segments.len() > 2 || !segments.iter().all(|s| is_identifier(s)) {
        return Err(FunctionError::invalid_handler(handler));
    }
    Ok(())
}

fn validate_env(env: &BTreeMap<String, String>) -> Result<(), FunctionError> {
    for (key, value) in env {
        if key.is_empty()
            || key.contains('=')
            || key.contains('\0')
            || key.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(FunctionError::invalid_env(key, "not a valid variable name"));
        }
        if key.starts_with(RESERVED_ENV_PREFIX) {
            return Err(FunctionError::invalid_env(
                key,
                format!("the {RESERVED_ENV_PREFIX} prefix is reserved"),
            ));
        }
        if value.contains('\0') {
            return Err(FunctionError::invalid_env(key, "value contains a NUL byte"));
        }
    }
    Ok(())
}

/// Validation and lifecycle errors for function definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionError {
    kind: Box<FunctionErrorKind>,
}

/// Specific function error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionErrorKind {
    /// Name or owner is malformed
    InvalidName {
        /// The rejected value
        value: String,
        /// Why it was rejected
        reason: String,
    },
    /// Handler is not `name` or `module.name`
    InvalidHandler {
        /// The rejected handler
        handler: String,
    },
    /// An environment variable is malformed or reserved
    InvalidEnv {
        /// The offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },
    /// A resource value is outside the platform-wide bounds
    OutOfBounds {
        /// Which field
        field: &'static str,
        /// The requested value
        value: u64,
        /// Inclusive minimum
        min: u64,
        /// Inclusive maximum
        max: u64,
    },
    /// The artifact is for a different function or version
    ArtifactMismatch {
        /// The function being activated
        function_id: FunctionId,
        /// The definition's version
        expected_version: u64,
        /// The artifact's version
        artifact_version: u64,
    },
    /// The artifact records a failed build
    BuildNotSuccessful {
        /// The function being activated
        function_id: FunctionId,
        /// The version whose build failed
        version: u64,
    },
    /// The function has been deleted
    Deleted {
        /// The deleted function
        function_id: FunctionId,
    },
}

impl FunctionError {
    /// Creates a new FunctionError with the given kind.
    #[must_use]
    pub fn new(kind: FunctionErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// Returns a reference to the error kind.
    #[must_use]
    pub fn kind(&self) -> &FunctionErrorKind {
        &self.kind
    }

    /// Creates an invalid name error.
    #[must_use]
    pub fn invalid_name(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(FunctionErrorKind::InvalidName {
            value: value.into(),
            reason: reason.into(),
        })
    }

    /// Creates an invalid handler error.
    #[must_use]
    pub fn invalid_handler(handler: impl Into<String>) -> Self {
        Self::new(FunctionErrorKind::InvalidHandler {
            handler: handler.into(),
        })
    }

    /// Creates an invalid env error.
    #[must_use]
    pub fn invalid_env(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(FunctionErrorKind::InvalidEnv {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Creates an out of bounds error.
    #[must_use]
    pub fn out_of_bounds(field: &'static str, value: u64, min: u64, max: u64) -> Self {
        Self::new(FunctionErrorKind::OutOfBounds {
            field,
            value,
            min,
            max,
        })
    }

    /// Creates a deleted error.
    #[must_use]
    pub fn deleted(function_id: FunctionId) -> Self {
        Self::new(FunctionErrorKind::Deleted { function_id })
    }

    /// Returns true if a resource value was out of bounds.
    #[must_use]
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(*self.kind, FunctionErrorKind::OutOfBounds { .. })
    }

    /// Returns true if the function has been deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(*self.kind, FunctionErrorKind::Deleted { .. })
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.as_ref() {
            FunctionErrorKind::InvalidName { value, reason } => {
                write!(f, "invalid name '{value}': {reason}")
            }
            FunctionErrorKind::InvalidHandler { handler } => write!(
                f,
                "invalid handler '{handler}'; use 'name' or 'module.name' with identifier characters"
            ),
            FunctionErrorKind::InvalidEnv { key, reason } => {
                write!(f, "invalid environment variable '{key}': {reason}")
            }
            FunctionErrorKind::OutOfBounds {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} {value} is outside the allowed range {min}..={max}"),
            FunctionErrorKind::ArtifactMismatch {
                function_id,
                expected_version,
                artifact_version,
            } => write!(
                f,
                "artifact version {artifact_version} does not belong to function '{function_id}' version {expected_version}"
            ),
            FunctionErrorKind::BuildNotSuccessful {
                function_id,
                version,
            } => write!(
                f,
                "function '{function_id}' version {version} has no successful build"
            ),
            FunctionErrorKind::Deleted { function_id } => {
                write!(f, "function '{function_id}' has been deleted")
            }
        }
    }
}

impl std::error::Error for FunctionError {}
