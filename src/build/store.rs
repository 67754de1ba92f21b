//! The authoritative artifact store.
//!
//! Holds at most one successful artifact per (function id, version). Failed
//! builds are never stored. Superseded artifacts are retired, not mutated:
//! invocations that already hold an `Arc` keep running against them.

use super::artifact::{BuildArtifact, CodeHash};
use crate::types::FunctionId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Versions = BTreeMap<u64, Arc<BuildArtifact>>;

/// Thread-safe map of authoritative artifacts.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: Mutex<HashMap<FunctionId, Versions>>,
}

impl ArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FunctionId, Versions>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the authoritative artifact for a version.
    #[must_use]
    pub fn get(&self, function_id: &FunctionId, version: u64) -> Option<Arc<BuildArtifact>> {
        self.lock()
            .get(function_id)
            .and_then(|versions| versions.get(&version))
            .cloned()
    }

    /// Returns the stored artifact if it was built from the same inputs.
    #[must_use]
    pub fn lookup(
        &self,
        function_id: &FunctionId,
        version: u64,
        source_hash: CodeHash,
    ) -> Option<Arc<BuildArtifact>> {
        self.get(function_id, version)
            .filter(|artifact| artifact.source_hash() == source_hash)
    }

    /// Makes `artifact` authoritative for its version and returns the stored copy.
    ///
    /// If an artifact from identical inputs is already stored, that one is
    /// kept and returned. A different artifact for the same version replaces
    /// it and the old one is retired. Failed artifacts are returned unstored.
    pub fn insert(&self, artifact: BuildArtifact) -> Arc<BuildArtifact> {
        let artifact = Arc::new(artifact);
        if !artifact.is_success() {
            return artifact;
        }

        let mut inner = self.lock();
        let versions = inner.entry(artifact.function_id().clone()).or_default();
        if let Some(existing) = versions.get(&artifact.version()) {
            if existing.source_hash() == artifact.source_hash() {
                return Arc::clone(existing);
            }
            retire(existing);
        }
        versions.insert(artifact.version(), Arc::clone(&artifact));
        artifact
    }

    /// Retires every version of a function older than `current_version`.
    ///
    /// Returns the number of artifacts retired.
    pub fn supersede(&self, function_id: &FunctionId, current_version: u64) -> usize {
        let mut inner = self.lock();
        let Some(versions) = inner.get_mut(function_id) else {
            return 0;
        };
        let current = versions.split_off(&current_version);
        let old = std::mem::replace(versions, current);
        old.values().for_each(retire);
        old.len()
    }

    /// Retires every version of a function.
    ///
    /// Returns the number of artifacts retired.
    pub fn remove_function(&self, function_id: &FunctionId) -> usize {
        let removed = self.lock().remove(function_id).unwrap_or_default();
        removed.values().for_each(retire);
        removed.len()
    }

    /// Returns the number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn retire(artifact: &Arc<BuildArtifact>) {
    if let Some(handle) = artifact.handle() {
        handle.retire();
    }
    tracing::debug!(
        function_id = %artifact.function_id(),
        version = artifact.version(),
        "artifact retired"
    );
}
