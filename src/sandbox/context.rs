//! The live state of one sandboxed invocation.

use super::error::SandboxError;
use crate::child;
use crate::types::InvocationId;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PAYLOAD_FILE: &str = "payload.json";
const RESULT_FILE: &str = "result.json";

/// Scratch directory plus the process group of one invocation.
///
/// Owned by a single execution and never shared. Dropping it kills the
/// group if it is still attached and removes the scratch directory.
#[derive(Debug)]
pub struct ExecutionContext {
    scratch: TempDir,
    pgid: Option<u32>,
}

impl ExecutionContext {
    /// Creates the scratch directory under `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::WorkspaceFailed` if the directory cannot be
    /// created.
    pub fn create(work_dir: &Path, invocation_id: &InvocationId) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(work_dir).map_err(SandboxError::workspace_failed)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{invocation_id}-"))
            .tempdir_in(work_dir)
            .map_err(SandboxError::workspace_failed)?;
        Ok(Self {
            scratch,
            pgid: None,
        })
    }

    /// Returns the scratch directory, also the child's HOME and cwd.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.scratch.path()
    }

    /// Where the payload is written for the bootstrap.
    #[must_use]
    pub fn payload_path(&self) -> PathBuf {
        self.path().join(PAYLOAD_FILE)
    }

    /// Where the bootstrap writes its envelope.
    #[must_use]
    pub fn result_path(&self) -> PathBuf {
        self.path().join(RESULT_FILE)
    }

    /// Records the process group to tear down.
    pub fn attach(&mut self, pgid: u32) {
        self.pgid = Some(pgid);
    }

    /// Kills the process group. Safe to call more than once.
    pub fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            child::kill_group(pgid);
        }
    }

    /// Returns true while a process group is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.pgid.is_some()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.pgid.is_some() {
            tracing::debug!(scratch = %self.path().display(), "tearing down sandbox on drop");
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let context = ExecutionContext::create(tmp.path(), &InvocationId::new()).unwrap();
        let scratch = context.path().to_path_buf();
        std::fs::write(context.payload_path(), "{}").unwrap();
        assert!(scratch.exists());

        drop(context);
        assert!(!scratch.exists());
    }

    #[test]
    fn scratch_name_starts_with_invocation_id() {
        let tmp = tempfile::tempdir().unwrap();
        let id = InvocationId::new();
        let context = ExecutionContext::create(tmp.path(), &id).unwrap();
        let name = context.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&id.to_string()));
    }

    #[test]
    fn kill_detaches() {
        let tmp = tempfile::tempdir().unwrap();
        let mut context = ExecutionContext::create(tmp.path(), &InvocationId::new()).unwrap();
        context.attach(i32::MAX as u32);
        assert!(context.is_attached());
        context.kill();
        assert!(!context.is_attached());
    }

    #[test]
    fn drop_kills_an_attached_group() {
        use std::os::unix::process::CommandExt;

        let tmp = tempfile::tempdir().unwrap();
        let mut process = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let mut context = ExecutionContext::create(tmp.path(), &InvocationId::new()).unwrap();
        context.attach(process.id());

        drop(context);

        let status = process.wait().unwrap();
        assert!(!status.success());
    }
}
