//! Build artifacts.
//!
//! A [`BuildArtifact`] is immutable once created and shared behind an
//! `Arc` by every invocation of its version. The directory it points at is
//! deleted only after the artifact has been retired by the store *and* the
//! last invocation holding it has finished.

use crate::runtime::{LaunchSpec, MemoryEnforcement, NetworkPolicy, OomMatcher};
use crate::types::{FunctionId, RuntimeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A 64-bit digest of everything that determines a build's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeHash(u64);

impl CodeHash {
    /// Computes a hash from source code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        Self::from_parts(&[code])
    }

    /// Computes a hash over several inputs, in order.
    #[must_use]
    pub fn from_parts(parts: &[&str]) -> Self {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        for part in parts {
            part.hash(&mut hasher);
        }
        Self(hasher.finish())
    }
}

impl fmt::Display for CodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// The artifact can be invoked
    Success,
    /// The source was rejected; see the diagnostic
    Failure,
}

/// An artifact directory on disk.
///
/// Removed on drop once retired.
#[derive(Debug)]
pub struct ArtifactDir {
    path: PathBuf,
    retired: AtomicBool,
}

impl ArtifactDir {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            retired: AtomicBool::new(false),
        }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the directory for deletion when the last reference drops.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Returns true if the directory has been retired.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "artifact directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove retired artifact directory"
            ),
        }
    }
}

/// The runnable part of a successful artifact.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub(crate) dir: Arc<ArtifactDir>,
    pub(crate) launch: LaunchSpec,
    pub(crate) entry_point: String,
    pub(crate) network: NetworkPolicy,
    pub(crate) memory_enforcement: MemoryEnforcement,
    pub(crate) oom: OomMatcher,
}

impl ArtifactHandle {
    /// Returns the artifact directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the resolved launch command.
    #[must_use]
    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Returns the handler entry point passed to the bootstrap.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Returns the network policy for invocations.
    #[must_use]
    pub fn network(&self) -> NetworkPolicy {
        self.network
    }

    /// Returns how the memory ceiling is enforced.
    #[must_use]
    pub fn memory_enforcement(&self) -> MemoryEnforcement {
        self.memory_enforcement
    }

    /// Returns the OOM markers for classifying failures.
    #[must_use]
    pub fn oom(&self) -> &OomMatcher {
        &self.oom
    }

    pub(crate) fn retire(&self) {
        self.dir.retire();
    }
}

/// The validated, runnable representation of one function version.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub(crate) function_id: FunctionId,
    pub(crate) version: u64,
    pub(crate) runtime: RuntimeId,
    pub(crate) status: BuildStatus,
    pub(crate) diagnostic: Option<String>,
    pub(crate) handle: Option<ArtifactHandle>,
    pub(crate) source_hash: CodeHash,
    pub(crate) built_at: DateTime<Utc>,
    pub(crate) build_duration_ms: u64,
}

impl BuildArtifact {
    /// Creates a failed artifact carrying a diagnostic.
    #[must_use]
    pub fn failure(
        function_id: FunctionId,
        version: u64,
        runtime: RuntimeId,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            function_id,
            version,
            runtime,
            status: BuildStatus::Failure,
            diagnostic: Some(diagnostic.into()),
            handle: None,
            source_hash: CodeHash::from_code(""),
            built_at: Utc::now(),
            build_duration_ms: 0,
        }
    }

    /// Returns the function this artifact was built for.
    #[must_use]
    pub fn function_id(&self) -> &FunctionId {
        &self.function_id
    }

    /// Returns the function version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the runtime.
    #[must_use]
    pub fn runtime(&self) -> &RuntimeId {
        &self.runtime
    }

    /// Returns the build status.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// Returns true if the build succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success && self.handle.is_some()
    }

    /// Returns the failure diagnostic.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Returns the runnable handle of a successful build.
    #[must_use]
    pub fn handle(&self) -> Option<&ArtifactHandle> {
        self.handle.as_ref()
    }

    /// Returns the digest of the build inputs.
    #[must_use]
    pub fn source_hash(&self) -> CodeHash {
        self.source_hash
    }

    /// Returns when the build finished.
    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Returns how long the build took.
    #[must_use]
    pub fn build_duration_ms(&self) -> u64 {
        self.build_duration_ms
    }

    /// Returns true if both artifacts describe the same build.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.function_id == other.function_id
            && self.version == other.version
            && self.runtime == other.runtime
            && self.status == other.status
            && self.source_hash == other.source_hash
            && self.diagnostic == other.diagnostic
    }

    /// Returns a serializable summary for display.
    #[must_use]
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            function_id: self.function_id.clone(),
            version: self.version,
            runtime: self.runtime.clone(),
            status: self.status,
            diagnostic: self.diagnostic.clone(),
            dir: self.handle.as_ref().map(|h| h.dir().to_path_buf()),
            source_hash: self.source_hash.to_string(),
            built_at: self.built_at,
            build_duration_ms: self.build_duration_ms,
        }
    }
}

/// A serializable view of a [`BuildArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// The function
    pub function_id: FunctionId,
    /// The version
    pub version: u64,
    /// The runtime
    pub runtime: RuntimeId,
    /// Build status
    pub status: BuildStatus,
    /// Failure diagnostic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Artifact directory of a successful build
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Hex digest of the build inputs
    pub source_hash: String,
    /// When the build finished
    pub built_at: DateTime<Utc>,
    /// How long the build took
    pub build_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_hash_is_deterministic() {
        assert_eq!(CodeHash::from_code("x"), CodeHash::from_code("x"));
        assert_ne!(CodeHash::from_code("x"), CodeHash::from_code("y"));
    }

    #[test]
    fn code_hash_parts_are_ordered() {
        assert_ne!(
            CodeHash::from_parts(&["a", "b"]),
            CodeHash::from_parts(&["b", "a"])
        );
    }

    #[test]
    fn code_hash_display_is_16_hex_digits() {
        let shown = CodeHash::from_code("fn").to_string();
        assert_eq!(shown.len(), 16);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn failure_artifact_is_not_success() {
        let artifact = BuildArtifact::failure(
            FunctionId::new(),
            3,
            RuntimeId::parse("python311").unwrap(),
            "SyntaxError",
        );
        assert!(!artifact.is_success());
        assert_eq!(artifact.status(), BuildStatus::Failure);
        assert_eq!(artifact.diagnostic(), Some("SyntaxError"));
        assert!(artifact.handle().is_none());
    }

    #[test]
    fn retired_dir_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("v1-abc");
        std::fs::create_dir(&path).unwrap();

        let dir = ArtifactDir::new(path.clone());
        drop(dir);
        assert!(path.exists(), "unretired dirs are kept");

        let dir = Arc::new(ArtifactDir::new(path.clone()));
        let in_flight = Arc::clone(&dir);
        dir.retire();
        drop(dir);
        assert!(path.exists(), "kept while an invocation holds it");
        drop(in_flight);
        assert!(!path.exists());
    }

    #[test]
    fn summary_serializes_status() {
        let artifact = BuildArtifact::failure(
            FunctionId::new(),
            1,
            RuntimeId::parse("node20").unwrap(),
            "bad",
        );
        let json = serde_json::to_value(artifact.summary()).unwrap();
        assert_eq!(json["status"], "failure");
        assert!(json.get("dir").is_none());
    }
}
